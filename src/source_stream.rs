//! バイト列の供給元 (SourceStream)
//!
//! ソケット、メモリ上のバッファ、展開フィルターなど、バイト列を下流へ
//! 引き渡すすべての段はこのトレイトを実装する。
//!
//! 読み込みは poll 形式で行う。`Poll::Pending` を返した場合、実装は
//! `cx` の Waker を保持し、読み込みが完了できるようになった時点で一度だけ
//! wake する。呼び出し側は同じ読み込みを再度 poll して結果を受け取る。
//! 一つのストリームに対して同時に複数の読み込みを進めてはならない。

use std::task::{Context, Poll, Waker};

use crate::Error;

/// ストリームの種別
///
/// 値はログや統計で永続化されるため、並びと番号を変更してはならない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceType {
    Brotli = 0,
    Deflate = 1,
    Gzip = 2,
    SdchDeprecated = 3,
    GzipFallbackDeprecated = 4,
    SdchPossibleDeprecated = 5,
    None = 6,
    Invalid = 7,
    Rejected = 8,
    Unknown = 9,
    Zstd = 10,
}

impl SourceType {
    /// 種別の数 (番号の上限値)
    pub const MAX: u8 = 11;

    /// ログ用の種別名
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Brotli => "BROTLI",
            SourceType::Deflate => "DEFLATE",
            SourceType::Gzip => "GZIP",
            SourceType::SdchDeprecated => "SDCH",
            SourceType::GzipFallbackDeprecated => "GZIP_FALLBACK",
            SourceType::SdchPossibleDeprecated => "SDCH_POSSIBLE",
            SourceType::None => "NONE",
            SourceType::Invalid => "INVALID",
            SourceType::Rejected => "REJECTED",
            SourceType::Unknown => "UNKNOWN",
            SourceType::Zstd => "ZSTD",
        }
    }

    /// 番号から種別を取得
    pub fn from_u8(value: u8) -> Option<Self> {
        let source_type = match value {
            0 => SourceType::Brotli,
            1 => SourceType::Deflate,
            2 => SourceType::Gzip,
            3 => SourceType::SdchDeprecated,
            4 => SourceType::GzipFallbackDeprecated,
            5 => SourceType::SdchPossibleDeprecated,
            6 => SourceType::None,
            7 => SourceType::Invalid,
            8 => SourceType::Rejected,
            9 => SourceType::Unknown,
            10 => SourceType::Zstd,
            _ => return None,
        };
        Some(source_type)
    }
}

/// バイト列の供給元
pub trait SourceStream {
    /// `buf` にバイト列を読み込む
    ///
    /// # 戻り値
    /// - `Poll::Ready(Ok(n))`: `n` バイト読み込んだ。`0` はストリームの終端
    /// - `Poll::Ready(Err(e))`: エラー
    /// - `Poll::Pending`: まだ読み込めない。読み込めるようになると Waker が呼ばれる
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize, Error>>;

    /// デバッグ用の説明文字列
    fn description(&self) -> String;

    /// まだバイト列が残っている可能性があるか
    ///
    /// false を返した場合はこれ以上データがないことを保証する。
    /// true は「分からない」を意味する。
    fn may_have_more_bytes(&self) -> bool {
        true
    }

    /// ストリームの種別
    fn source_type(&self) -> SourceType;

    /// 同期的に読み込みを試みる
    ///
    /// 読み込みが保留になった場合は `None` を返す。保留中の読み込みは
    /// 次回の `poll_read` または `try_read` で継続される。
    fn try_read(&mut self, buf: &mut [u8]) -> Option<Result<usize, Error>> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.poll_read(&mut cx, buf) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        }
    }
}

impl<S: SourceStream + ?Sized> SourceStream for Box<S> {
    fn poll_read(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize, Error>> {
        (**self).poll_read(cx, buf)
    }

    fn description(&self) -> String {
        (**self).description()
    }

    fn may_have_more_bytes(&self) -> bool {
        (**self).may_have_more_bytes()
    }

    fn source_type(&self) -> SourceType {
        (**self).source_type()
    }
}
