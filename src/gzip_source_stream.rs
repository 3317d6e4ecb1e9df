//! gzip / deflate 展開ストリーム
//!
//! `GzipFilter` は `FilterSourceStream` 用のフィルターで、gzip または deflate
//! でエンコードされたバイト列を展開する。
//!
//! - gzip: ヘッダーを `GzipHeader` で読み飛ばし、本体を raw inflate で展開し、
//!   8 バイトのフッター (CRC32 + 長さ) を検証せずに読み捨てる
//! - deflate: まず zlib ヘッダー付きとして展開を試みる。失敗した場合は
//!   ダミーの zlib ヘッダー (`0x78 0x01`) を補い、それまでに受け取った
//!   バイト列を再生してヘッダーなしの deflate として展開する
//!
//! ストリームの終端以降に続くバイト列は読み捨てる。
//!
//! ```rust
//! use shiguredo_netstack::gzip_source_stream::GzipSourceStream;
//! use shiguredo_netstack::mock_source_stream::{MockSourceStream, ReadMode};
//! use shiguredo_netstack::{SourceStream, SourceType};
//!
//! // "hello" を gzip で圧縮したもの
//! let compressed = [
//!     0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9,
//!     0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
//! ];
//! let source = MockSourceStream::new();
//! source.handle().add_read_result(&compressed, ReadMode::Sync);
//! source.handle().add_read_result(b"", ReadMode::Sync);
//!
//! let mut stream = GzipSourceStream::create(Box::new(source), SourceType::Gzip).unwrap();
//! let mut buf = [0u8; 64];
//! assert_eq!(stream.try_read(&mut buf), Some(Ok(5)));
//! assert_eq!(&buf[..5], b"hello");
//! ```

use crate::Error;
use crate::compression::{Decompressor, InflateDecompressor};
use crate::filter_source_stream::{Filter, FilterProgress, FilterSourceStream};
use crate::gzip_header::{GzipHeader, GzipHeaderStatus};
use crate::limits::FilterLimits;
use crate::source_stream::{SourceStream, SourceType};

/// gzip フッターのバイト数 (CRC32 + ISIZE)
pub const GZIP_FOOTER_BYTES: usize = 8;

/// gzip / deflate 展開ストリーム
pub type GzipSourceStream = FilterSourceStream<GzipFilter>;

impl FilterSourceStream<GzipFilter> {
    /// 上流を gzip / deflate 展開ストリームで包む
    ///
    /// `source_type` が `Gzip` / `Deflate` 以外の場合は `None` を返す。
    pub fn create(upstream: Box<dyn SourceStream>, source_type: SourceType) -> Option<Self> {
        Self::create_with_limits(upstream, source_type, &FilterLimits::default())
    }

    /// 制限を指定して作成
    pub fn create_with_limits(
        upstream: Box<dyn SourceStream>,
        source_type: SourceType,
        limits: &FilterLimits,
    ) -> Option<Self> {
        let filter = GzipFilter::from_source_type(source_type, limits)?;
        Some(FilterSourceStream::with_limits(upstream, filter, limits))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    /// まだ何も読んでいない
    Start,
    /// gzip ヘッダーを読み込み中
    GzipHeader,
    /// deflate に zlib ヘッダーがあるか判定中
    SniffingDeflateHeader,
    /// 判定中に溜めたバイト列を再生中
    ReplayData,
    /// 圧縮本体を展開中
    CompressedBody,
    /// gzip フッターを読み捨て中
    GzipFooter,
    /// ストリーム終端以降のバイト列を読み捨て中
    IgnoringExtraBytes,
}

#[derive(Debug, Default)]
struct Cursor {
    /// 入力の読み込み位置
    pos: usize,
    /// 出力済みバイト数
    bytes_out: usize,
    /// この呼び出しで CompressedBody を処理したか
    compressed_entered: bool,
}

/// gzip / deflate 展開フィルター
#[derive(Debug)]
pub struct GzipFilter {
    source_type: SourceType,
    inflate: InflateDecompressor,
    header: GzipHeader,
    input_state: InputState,
    replay_state: InputState,
    replay_data: Vec<u8>,
    footer_bytes_left: usize,
    max_sniff_bytes: usize,
    output_pending: bool,
    failed: bool,
}

impl GzipFilter {
    /// gzip 用のフィルターを作成
    pub fn gzip(limits: &FilterLimits) -> Self {
        Self::new(SourceType::Gzip, InflateDecompressor::raw(), limits)
    }

    /// deflate 用のフィルターを作成
    pub fn deflate(limits: &FilterLimits) -> Self {
        Self::new(SourceType::Deflate, InflateDecompressor::zlib(), limits)
    }

    /// 種別からフィルターを作成
    pub fn from_source_type(source_type: SourceType, limits: &FilterLimits) -> Option<Self> {
        match source_type {
            SourceType::Gzip => Some(Self::gzip(limits)),
            SourceType::Deflate => Some(Self::deflate(limits)),
            _ => None,
        }
    }

    fn new(source_type: SourceType, inflate: InflateDecompressor, limits: &FilterLimits) -> Self {
        Self {
            source_type,
            inflate,
            header: GzipHeader::new(),
            input_state: InputState::Start,
            replay_state: InputState::CompressedBody,
            replay_data: Vec::new(),
            footer_bytes_left: 0,
            max_sniff_bytes: limits.max_zlib_header_sniff_bytes,
            output_pending: false,
            failed: false,
        }
    }

    /// 圧縮ストリームの終端以降に到達したか
    pub fn is_finished(&self) -> bool {
        self.input_state == InputState::IgnoringExtraBytes
    }

    fn can_step(&self, input: &[u8], output: &[u8], cursor: &Cursor) -> bool {
        if cursor.bytes_out >= output.len() {
            return false;
        }
        let has_input = cursor.pos < input.len();
        match self.input_state {
            InputState::ReplayData => {
                has_input || !self.replay_data.is_empty() || self.output_pending
            }
            InputState::CompressedBody => {
                !cursor.compressed_entered && (has_input || self.output_pending)
            }
            _ => has_input,
        }
    }

    fn filter_input(
        &mut self,
        output: &mut [u8],
        input: &[u8],
        upstream_eof_reached: bool,
    ) -> Result<FilterProgress, Error> {
        let mut cursor = Cursor::default();
        while self.can_step(input, output, &cursor) {
            if self.input_state == InputState::ReplayData {
                let produced = self.replay(&mut output[cursor.bytes_out..])?;
                if produced > 0 {
                    // 再生で出力が得られた場合は新しい入力に進まずに返す
                    return Ok(FilterProgress {
                        produced: cursor.bytes_out + produced,
                        consumed: cursor.pos,
                    });
                }
                continue;
            }
            self.step(output, input, &mut cursor)?;
        }

        if cursor.bytes_out == 0 && cursor.pos < input.len() {
            // 展開器が入力を受け付けなくなった
            return Err(Error::ContentDecodingFailed);
        }
        if upstream_eof_reached
            && cursor.bytes_out == 0
            && cursor.pos == input.len()
            && self.is_truncated()
        {
            tracing::debug!(
                state = ?self.input_state,
                "gzip stream truncated before the end of the compressed body"
            );
            return Err(Error::ContentDecodingFailed);
        }
        Ok(FilterProgress {
            produced: cursor.bytes_out,
            consumed: cursor.pos,
        })
    }

    /// 判定中に溜めたバイト列を再生する
    ///
    /// 再生中の状態は `replay_state` に退避し、呼び出し前後で `input_state` は
    /// `ReplayData` のままになる。再生するものがなければ退避していた状態に戻す。
    fn replay(&mut self, output: &mut [u8]) -> Result<usize, Error> {
        if self.replay_data.is_empty() {
            std::mem::swap(&mut self.input_state, &mut self.replay_state);
            return Ok(0);
        }

        let replay = std::mem::take(&mut self.replay_data);
        self.input_state = self.replay_state;
        let progress = self.decode_steps(output, &replay)?;
        self.replay_data = replay[progress.consumed..].to_vec();
        self.replay_state = self.input_state;
        self.input_state = InputState::ReplayData;
        Ok(progress.produced)
    }

    /// `ReplayData` 以外の状態を入力が尽きるまで進める
    fn decode_steps(&mut self, output: &mut [u8], input: &[u8]) -> Result<FilterProgress, Error> {
        let mut cursor = Cursor::default();
        while self.can_step(input, output, &cursor) {
            if self.input_state == InputState::ReplayData {
                return Err(Error::Unexpected(
                    "replayed data re-entered the replay state".to_string(),
                ));
            }
            self.step(output, input, &mut cursor)?;
        }
        Ok(FilterProgress {
            produced: cursor.bytes_out,
            consumed: cursor.pos,
        })
    }

    fn step(&mut self, output: &mut [u8], input: &[u8], cursor: &mut Cursor) -> Result<(), Error> {
        let rest = &input[cursor.pos..];
        match self.input_state {
            InputState::Start => {
                self.input_state = if self.source_type == SourceType::Deflate {
                    InputState::SniffingDeflateHeader
                } else {
                    InputState::GzipHeader
                };
            }
            InputState::GzipHeader => match self.header.read_more(rest) {
                GzipHeaderStatus::Incomplete => cursor.pos = input.len(),
                GzipHeaderStatus::Complete { header_end } => {
                    self.footer_bytes_left = GZIP_FOOTER_BYTES;
                    cursor.pos += header_end;
                    self.input_state = InputState::CompressedBody;
                }
                GzipHeaderStatus::Invalid => {
                    tracing::debug!("invalid gzip header");
                    return Err(Error::ContentDecodingFailed);
                }
            },
            InputState::SniffingDeflateHeader => {
                match self.inflate.decompress(rest, &mut output[cursor.bytes_out..]) {
                    Err(e) => {
                        // zlib ヘッダーなしとみなす。今回の入力はまだ消費していないので、
                        // 再生するのは前回までに溜めた分だけでよい
                        if !self.inflate.insert_zlib_header() {
                            return Err(Error::ContentDecodingFailed);
                        }
                        tracing::debug!(
                            error = %e,
                            replay_bytes = self.replay_data.len(),
                            "deflate stream has no zlib header, replaying as raw deflate"
                        );
                        debug_assert_eq!(self.replay_state, InputState::CompressedBody);
                        self.input_state = InputState::ReplayData;
                    }
                    Ok(status) => {
                        let used = status.consumed();
                        cursor.bytes_out += status.produced();
                        self.output_pending = status.is_output_full();
                        if status.produced() > 0
                            || used + self.replay_data.len() >= self.max_sniff_bytes
                            || status.is_complete()
                        {
                            tracing::trace!(
                                sniffed_bytes = used + self.replay_data.len(),
                                "deflate stream has a zlib header"
                            );
                            self.replay_data.clear();
                            self.input_state = if status.is_complete() {
                                InputState::GzipFooter
                            } else {
                                InputState::CompressedBody
                            };
                        } else {
                            self.replay_data.extend_from_slice(&rest[..used]);
                        }
                        cursor.pos += used;
                    }
                }
            }
            InputState::ReplayData => {
                return Err(Error::Unexpected(
                    "replay state must be handled by the caller".to_string(),
                ));
            }
            InputState::CompressedBody => {
                cursor.compressed_entered = true;
                let status = self
                    .inflate
                    .decompress(rest, &mut output[cursor.bytes_out..])
                    .inspect_err(|e| tracing::debug!(error = %e, "inflate failed"))?;
                cursor.pos += status.consumed();
                cursor.bytes_out += status.produced();
                self.output_pending = status.is_output_full();
                if status.is_complete() {
                    self.output_pending = false;
                    self.input_state = InputState::GzipFooter;
                }
            }
            InputState::GzipFooter => {
                let n = self.footer_bytes_left.min(rest.len());
                self.footer_bytes_left -= n;
                cursor.pos += n;
                if self.footer_bytes_left == 0 {
                    self.input_state = InputState::IgnoringExtraBytes;
                }
            }
            InputState::IgnoringExtraBytes => cursor.pos = input.len(),
        }
        Ok(())
    }

    /// gzip の本体が終わる前に入力が尽きたか
    fn is_truncated(&self) -> bool {
        // deflate はヘッダーを補った場合に Adler-32 が届かず終端を判定できないため対象外
        self.source_type == SourceType::Gzip
            && matches!(
                self.input_state,
                InputState::GzipHeader | InputState::CompressedBody
            )
    }
}

impl Filter for GzipFilter {
    fn filter_data(
        &mut self,
        output: &mut [u8],
        input: &[u8],
        upstream_eof_reached: bool,
    ) -> Result<FilterProgress, Error> {
        if self.failed {
            return Err(Error::ContentDecodingFailed);
        }
        let result = self.filter_input(output, input, upstream_eof_reached);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn need_more_data(&self) -> bool {
        self.input_state != InputState::IgnoringExtraBytes
    }
}
