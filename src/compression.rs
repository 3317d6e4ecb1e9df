//! 展開トレイト (Sans I/O)
//!
//! gzip / deflate 展開器を差し替え可能にするためのトレイト定義と、
//! flate2 を利用した inflate 実装を提供する。

use core::fmt;

use flate2::{Decompress, FlushDecompress, Status};

/// 壊れたストリームを補修するために挿入する zlib ヘッダー
///
/// CMF = 0x78 (deflate, 32KB ウィンドウ)、FLG = 0x01 (辞書なし、最低圧縮レベル)。
pub const ZLIB_DUMMY_HEADER: [u8; 2] = [0x78, 0x01];

/// 展開エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// 入力データが不正
    InvalidData(String),
    /// 展開が進まない
    Stalled,
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionError::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            CompressionError::Stalled => write!(f, "decompression made no progress"),
        }
    }
}

impl std::error::Error for CompressionError {}

/// 処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStatus {
    /// 処理継続中
    Continue {
        /// 消費した入力バイト数
        consumed: usize,
        /// 生成した出力バイト数
        produced: usize,
    },
    /// 処理完了
    Complete {
        /// 消費した入力バイト数
        consumed: usize,
        /// 生成した出力バイト数
        produced: usize,
    },
    /// 出力バッファが満杯
    OutputFull {
        /// 消費した入力バイト数
        consumed: usize,
        /// 生成した出力バイト数
        produced: usize,
    },
}

impl CompressionStatus {
    /// 消費した入力バイト数を取得
    #[inline]
    pub fn consumed(&self) -> usize {
        match self {
            CompressionStatus::Continue { consumed, .. } => *consumed,
            CompressionStatus::Complete { consumed, .. } => *consumed,
            CompressionStatus::OutputFull { consumed, .. } => *consumed,
        }
    }

    /// 生成した出力バイト数を取得
    #[inline]
    pub fn produced(&self) -> usize {
        match self {
            CompressionStatus::Continue { produced, .. } => *produced,
            CompressionStatus::Complete { produced, .. } => *produced,
            CompressionStatus::OutputFull { produced, .. } => *produced,
        }
    }

    /// 処理が完了したかどうかを判定
    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, CompressionStatus::Complete { .. })
    }

    /// 出力バッファが満杯かどうかを判定
    #[inline]
    pub fn is_output_full(&self) -> bool {
        matches!(self, CompressionStatus::OutputFull { .. })
    }
}

/// 展開トレイト (Sans I/O)
///
/// # 使い方
///
/// ```ignore
/// let mut decompressor = InflateDecompressor::raw();
/// let mut output = vec![0u8; 8192];
///
/// // 圧縮データを展開
/// let status = decompressor.decompress(compressed, &mut output)?;
/// // output[..status.produced()] に展開データ
///
/// // 出力バッファが満杯だった場合は入力なしで再度呼び出すと残りが取り出せる
/// while status.is_output_full() {
///     let status = decompressor.decompress(&[], &mut output)?;
/// }
/// ```
pub trait Decompressor {
    /// 圧縮データを展開して出力バッファに書き込む
    ///
    /// # 戻り値
    /// - `Continue`: 処理継続中、さらに入力が必要
    /// - `OutputFull`: 出力バッファが満杯、再度呼び出す必要あり
    /// - `Complete`: 展開完了
    fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<CompressionStatus, CompressionError>;

    /// 展開器をリセットして再利用可能にする
    fn reset(&mut self);
}

/// inflate のフレーミング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflateFraming {
    /// RFC 1950 の zlib ヘッダー付き
    Zlib,
    /// ヘッダーなしの raw deflate (RFC 1951)
    Raw,
}

/// flate2 による inflate 展開器
#[derive(Debug)]
pub struct InflateDecompressor {
    inner: Decompress,
    framing: InflateFraming,
}

impl InflateDecompressor {
    /// zlib ヘッダー付きの展開器を作成
    pub fn zlib() -> Self {
        Self::new(InflateFraming::Zlib)
    }

    /// raw deflate の展開器を作成
    pub fn raw() -> Self {
        Self::new(InflateFraming::Raw)
    }

    /// フレーミングを指定して展開器を作成
    pub fn new(framing: InflateFraming) -> Self {
        Self {
            inner: Decompress::new(framing == InflateFraming::Zlib),
            framing,
        }
    }

    /// 展開器をリセットし、ダミーの zlib ヘッダーを読ませる
    ///
    /// zlib フレーミングでのみ意味を持つ。ヘッダーが受理されれば true を返し、
    /// 以降はヘッダーなしの deflate データをそのまま展開できる。
    pub fn insert_zlib_header(&mut self) -> bool {
        self.reset();
        let mut dummy_output = [0u8; 4];
        matches!(
            self.decompress(&ZLIB_DUMMY_HEADER, &mut dummy_output),
            Ok(CompressionStatus::Continue {
                consumed: 2,
                produced: 0
            })
        )
    }
}

impl Decompressor for InflateDecompressor {
    fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<CompressionStatus, CompressionError> {
        let before_in = self.inner.total_in();
        let before_out = self.inner.total_out();
        let status = self
            .inner
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| CompressionError::InvalidData(e.to_string()))?;
        let consumed = (self.inner.total_in() - before_in) as usize;
        let produced = (self.inner.total_out() - before_out) as usize;

        match status {
            Status::StreamEnd => Ok(CompressionStatus::Complete { consumed, produced }),
            Status::BufError
                if consumed == 0 && produced == 0 && !input.is_empty() && !output.is_empty() =>
            {
                Err(CompressionError::Stalled)
            }
            Status::Ok | Status::BufError => {
                if !output.is_empty() && produced == output.len() {
                    Ok(CompressionStatus::OutputFull { consumed, produced })
                } else {
                    Ok(CompressionStatus::Continue { consumed, produced })
                }
            }
        }
    }

    fn reset(&mut self) {
        self.inner.reset(self.framing == InflateFraming::Zlib);
    }
}
