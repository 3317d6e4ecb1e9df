//! 上流の SourceStream を変換するデコレーター
//!
//! `FilterSourceStream` は上流を一つだけ排他的に所有し、固定長の入力バッファへ
//! 読み込んだバイト列を `Filter` に渡して変換する。変換処理そのもの
//! (`Filter::filter_data`) は同期的で、保留になることはない。
//!
//! 状態遷移:
//!
//! ```text
//! Idle -> FilterData -> FilterDataComplete -> Idle
//!            ^                  |
//!            |                  | 出力 0 かつ追加の入力が必要
//!            |                  v
//!   ReadDataComplete <------ ReadData
//! ```
//!
//! 読み込みは常にフィルターから始める。フィルターが出力を生成できず、
//! かつ追加の入力を必要とする間は、呼び出し側に制御を返さずに上流からの
//! 読み込みを続ける。`Filter::need_more_data` が false になった後は
//! 上流を読まない。

use std::task::{Context, Poll, ready};

use crate::Error;
use crate::limits::FilterLimits;
use crate::source_stream::{SourceStream, SourceType};

/// `Filter::filter_data` の処理結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterProgress {
    /// 出力バッファに書き込んだバイト数
    pub produced: usize,
    /// 入力から消費したバイト数
    pub consumed: usize,
}

/// バイト列の変換処理
///
/// 出力が 0 バイトの場合は、渡された入力をすべて消費しなければならない。
/// 出力がある場合の消費量は入力長以下であればよい。
pub trait Filter {
    /// `input` を変換して `output` に書き込む
    ///
    /// `upstream_eof_reached` は上流が終端に達したことを表す。
    fn filter_data(
        &mut self,
        output: &mut [u8],
        input: &[u8],
        upstream_eof_reached: bool,
    ) -> Result<FilterProgress, Error>;

    /// フィルターの種別
    fn source_type(&self) -> SourceType;

    /// 上流からの追加の入力を必要とするか
    ///
    /// false を返すと、出力が 0 バイトになった時点で終端として扱う。
    fn need_more_data(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    ReadData,
    ReadDataComplete,
    FilterData,
    FilterDataComplete,
}

/// 上流の SourceStream を変換するデコレーター
pub struct FilterSourceStream<F> {
    upstream: Box<dyn SourceStream>,
    filter: F,
    input_buffer: Box<[u8]>,
    input_start: usize,
    input_end: usize,
    upstream_end_reached: bool,
    end_returned: bool,
    next_state: ReadState,
}

impl<F: Filter> FilterSourceStream<F> {
    /// デフォルトの制限で作成
    pub fn new(upstream: Box<dyn SourceStream>, filter: F) -> Self {
        Self::with_limits(upstream, filter, &FilterLimits::default())
    }

    /// 制限を指定して作成
    pub fn with_limits(upstream: Box<dyn SourceStream>, filter: F, limits: &FilterLimits) -> Self {
        Self {
            upstream,
            filter,
            input_buffer: vec![0u8; limits.input_buffer_size.max(1)].into_boxed_slice(),
            input_start: 0,
            input_end: 0,
            upstream_end_reached: false,
            end_returned: false,
            next_state: ReadState::Idle,
        }
    }

    /// フィルターへの参照を取得
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// 上流が終端に達したかどうか
    pub fn upstream_end_reached(&self) -> bool {
        self.upstream_end_reached
    }

    fn input_remaining(&self) -> usize {
        self.input_end - self.input_start
    }

    fn do_loop(&mut self, cx: &mut Context<'_>, output: &mut [u8]) -> Poll<Result<usize, Error>> {
        let mut rv: Result<usize, Error> = Ok(0);
        loop {
            let state = std::mem::replace(&mut self.next_state, ReadState::Idle);
            rv = match state {
                ReadState::ReadData => match self.do_read_data(cx) {
                    Poll::Ready(result) => result,
                    Poll::Pending => {
                        // 再 poll で同じ読み込みを継続する
                        self.next_state = ReadState::ReadData;
                        return Poll::Pending;
                    }
                },
                ReadState::ReadDataComplete => self.do_read_data_complete(rv),
                ReadState::FilterData => self.do_filter_data(output),
                ReadState::FilterDataComplete => self.do_filter_data_complete(rv),
                ReadState::Idle => {
                    return Poll::Ready(Err(Error::Unexpected(
                        "filter stream loop entered without a pending step".to_string(),
                    )));
                }
            };
            if self.next_state == ReadState::Idle {
                return Poll::Ready(rv);
            }
        }
    }

    fn do_read_data(&mut self, cx: &mut Context<'_>) -> Poll<Result<usize, Error>> {
        debug_assert_eq!(self.input_remaining(), 0);
        let result = ready!(self.upstream.poll_read(cx, &mut self.input_buffer));
        self.next_state = ReadState::ReadDataComplete;
        Poll::Ready(result)
    }

    fn do_read_data_complete(&mut self, result: Result<usize, Error>) -> Result<usize, Error> {
        let n = result?;
        tracing::trace!(
            source_type = self.filter.source_type().as_str(),
            bytes = n,
            "upstream read complete"
        );
        self.input_start = 0;
        self.input_end = n;
        if n == 0 {
            self.upstream_end_reached = true;
        }
        self.next_state = ReadState::FilterData;
        Ok(n)
    }

    fn do_filter_data(&mut self, output: &mut [u8]) -> Result<usize, Error> {
        let input = &self.input_buffer[self.input_start..self.input_end];
        let remaining = input.len();
        let progress = self
            .filter
            .filter_data(output, input, self.upstream_end_reached)
            .inspect_err(|e| {
                tracing::debug!(
                    source_type = self.filter.source_type().as_str(),
                    error = %e,
                    "filter failed"
                );
            })?;

        if progress.produced == 0 {
            debug_assert_eq!(
                progress.consumed, remaining,
                "a filter that produces nothing must consume all of its input"
            );
        } else {
            debug_assert!(progress.consumed <= remaining);
        }
        self.input_start += progress.consumed.min(remaining);
        self.next_state = ReadState::FilterDataComplete;
        Ok(progress.produced)
    }

    fn do_filter_data_complete(&mut self, result: Result<usize, Error>) -> Result<usize, Error> {
        let produced = result?;
        if produced == 0 {
            if self.filter.need_more_data() && !self.upstream_end_reached {
                self.next_state = ReadState::ReadData;
            } else {
                self.end_returned = true;
            }
        }
        Ok(produced)
    }
}

impl<F: Filter> SourceStream for FilterSourceStream<F> {
    fn poll_read(&mut self, cx: &mut Context<'_>, output: &mut [u8]) -> Poll<Result<usize, Error>> {
        if output.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if self.next_state == ReadState::Idle {
            // 入力が空でも先にフィルターへ渡す。上流から読むのは、出力が 0 で
            // フィルターが追加の入力を必要とする場合だけ
            self.next_state = ReadState::FilterData;
        }
        self.do_loop(cx, output)
    }

    fn description(&self) -> String {
        let upstream = self.upstream.description();
        let own = self.filter.source_type().as_str();
        if upstream.is_empty() {
            own.to_string()
        } else {
            format!("{},{}", upstream, own)
        }
    }

    fn may_have_more_bytes(&self) -> bool {
        !self.end_returned
    }

    fn source_type(&self) -> SourceType {
        self.filter.source_type()
    }
}
