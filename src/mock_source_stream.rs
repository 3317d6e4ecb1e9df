//! テスト用の SourceStream
//!
//! あらかじめ積んでおいた読み込み結果を順番に返す。`ReadMode::Async` で
//! 積んだ結果は、ハンドルから `complete_next_read()` を呼ぶまで `Poll::Pending`
//! を返し続けるため、非同期な上流をテストで再現できる。
//!
//! ```rust
//! use shiguredo_netstack::mock_source_stream::{MockSourceStream, ReadMode};
//! use shiguredo_netstack::SourceStream;
//!
//! let mut source = MockSourceStream::new();
//! let handle = source.handle();
//! handle.add_read_result(b"hello", ReadMode::Async);
//!
//! let mut buf = [0u8; 16];
//! assert!(source.try_read(&mut buf).is_none());
//! handle.complete_next_read();
//! assert_eq!(source.try_read(&mut buf), Some(Ok(5)));
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::Error;
use crate::source_stream::{SourceStream, SourceType};

/// 読み込み結果の返し方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// 即座に返す
    Sync,
    /// `complete_next_read()` が呼ばれるまで保留する
    Async,
}

#[derive(Debug)]
struct QueuedRead {
    data: Vec<u8>,
    error: Option<Error>,
    mode: ReadMode,
}

#[derive(Debug, Default)]
struct MockState {
    results: VecDeque<QueuedRead>,
    read_one_byte_at_a_time: bool,
    always_report_has_more_bytes: bool,
    awaiting_completion: bool,
    completion_ready: bool,
    waker: Option<Waker>,
}

impl MockState {
    fn push(&mut self, data: &[u8], error: Option<Error>, mode: ReadMode) {
        if self.read_one_byte_at_a_time && error.is_none() && data.len() > 1 {
            for byte in data {
                self.results.push_back(QueuedRead {
                    data: vec![*byte],
                    error: None,
                    mode,
                });
            }
            return;
        }
        self.results.push_back(QueuedRead {
            data: data.to_vec(),
            error,
            mode,
        });
    }

    fn deliver(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let Some(mut read) = self.results.pop_front() else {
            return Err(Error::Unexpected("no queued read result".to_string()));
        };
        if let Some(error) = read.error {
            return Err(error);
        }
        let len = read.data.len().min(buf.len());
        buf[..len].copy_from_slice(&read.data[..len]);
        if len < read.data.len() {
            // 呼び出し側のバッファに収まらなかった残りは次の読み込みで返す
            read.data.drain(..len);
            read.mode = ReadMode::Sync;
            self.results.push_front(read);
        }
        Ok(len)
    }
}

/// テスト用の SourceStream
#[derive(Debug, Default)]
pub struct MockSourceStream {
    state: Rc<RefCell<MockState>>,
}

/// MockSourceStream を外部から操作するハンドル
///
/// ストリームをフィルターに渡した後も結果の追加や保留中の読み込みの完了ができる。
#[derive(Debug, Clone)]
pub struct MockSourceHandle {
    state: Rc<RefCell<MockState>>,
}

impl MockSourceStream {
    /// 空の MockSourceStream を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// 操作用ハンドルを取得
    pub fn handle(&self) -> MockSourceHandle {
        MockSourceHandle {
            state: Rc::clone(&self.state),
        }
    }
}

impl MockSourceHandle {
    /// 読み込み結果としてデータを積む (空スライスは終端を表す)
    pub fn add_read_result(&self, data: &[u8], mode: ReadMode) {
        self.state.borrow_mut().push(data, None, mode);
    }

    /// 読み込み結果としてエラーを積む
    pub fn add_read_error(&self, error: Error, mode: ReadMode) {
        self.state.borrow_mut().push(&[], Some(error), mode);
    }

    /// 保留中の読み込みを完了させる
    ///
    /// 保留中の読み込みがなければ false を返す。
    pub fn complete_next_read(&self) -> bool {
        let waker = {
            let mut state = self.state.borrow_mut();
            if !state.awaiting_completion || state.completion_ready {
                return false;
            }
            state.completion_ready = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// 読み込みが保留中かどうか
    pub fn awaiting_completion(&self) -> bool {
        self.state.borrow().awaiting_completion
    }

    /// 未消費の読み込み結果の数
    pub fn pending_results(&self) -> usize {
        self.state.borrow().results.len()
    }

    /// 以降に積むデータを 1 バイトずつの読み込み結果に分割する
    pub fn set_read_one_byte_at_a_time(&self, enabled: bool) {
        self.state.borrow_mut().read_one_byte_at_a_time = enabled;
    }

    /// 結果が尽きても `may_have_more_bytes()` が true を返すようにする
    pub fn set_always_report_has_more_bytes(&self, enabled: bool) {
        self.state.borrow_mut().always_report_has_more_bytes = enabled;
    }
}

impl SourceStream for MockSourceStream {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize, Error>> {
        let mut state = self.state.borrow_mut();
        if state.awaiting_completion {
            if !state.completion_ready {
                state.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            state.awaiting_completion = false;
            state.completion_ready = false;
            return Poll::Ready(state.deliver(buf));
        }

        match state.results.front() {
            Some(read) if read.mode == ReadMode::Async => {
                state.awaiting_completion = true;
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            _ => Poll::Ready(state.deliver(buf)),
        }
    }

    fn description(&self) -> String {
        String::new()
    }

    fn may_have_more_bytes(&self) -> bool {
        let state = self.state.borrow();
        state.always_report_has_more_bytes || !state.results.is_empty()
    }

    fn source_type(&self) -> SourceType {
        SourceType::None
    }
}
