//! gzip ヘッダーパーサー (RFC 1952 Section 2.3)
//!
//! 10 バイトの固定ヘッダーと、FLG のビットで有効になる任意フィールド
//! (FEXTRA, FNAME, FCOMMENT, FHCRC) を読み飛ばす。入力が途中で途切れても
//! 位置を保持しているため、続きのバイト列を渡して再開できる。
//!
//! ```rust
//! use shiguredo_netstack::gzip_header::{GzipHeader, GzipHeaderStatus};
//!
//! let mut header = GzipHeader::new();
//! let bytes = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x03, 0xaa];
//! assert_eq!(header.read_more(&bytes[..4]), GzipHeaderStatus::Incomplete);
//! assert_eq!(
//!     header.read_more(&bytes[4..]),
//!     GzipHeaderStatus::Complete { header_end: 6 }
//! );
//! ```

/// gzip のマジックバイト
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 圧縮方式 (deflate)
const CM_DEFLATE: u8 = 8;

/// FLG ビット
pub const FLAG_FTEXT: u8 = 0x01;
pub const FLAG_FHCRC: u8 = 0x02;
pub const FLAG_FEXTRA: u8 = 0x04;
pub const FLAG_FNAME: u8 = 0x08;
pub const FLAG_FCOMMENT: u8 = 0x10;

/// ヘッダーの読み込み状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GzipHeaderStatus {
    /// ヘッダーが途中で途切れている
    Incomplete,
    /// ヘッダーを読み終えた
    Complete {
        /// 今回渡された入力のうち、ヘッダー直後のバイト位置
        header_end: usize,
    },
    /// マジックバイトまたは圧縮方式が不正
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum HeaderState {
    Id1,
    Id2,
    Cm,
    Flg,
    Mtime0,
    Mtime1,
    Mtime2,
    Mtime3,
    Xfl,
    Os,
    XlenByte0,
    XlenByte1,
    Fextra,
    Fname,
    Fcomment,
    FhcrcByte0,
    FhcrcByte1,
    Done,
}

/// gzip ヘッダーパーサー
#[derive(Debug, Clone)]
pub struct GzipHeader {
    state: HeaderState,
    flags: u8,
    extra_length: u16,
}

impl Default for GzipHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipHeader {
    /// 新しいパーサーを作成
    pub fn new() -> Self {
        Self {
            state: HeaderState::Id1,
            flags: 0,
            extra_length: 0,
        }
    }

    /// 先頭から読み直せるように状態を初期化
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 続きのバイト列を読み込む
    pub fn read_more(&mut self, input: &[u8]) -> GzipHeaderStatus {
        let mut pos = 0;
        while pos < input.len() {
            match self.state {
                HeaderState::Id1 => {
                    if input[pos] != GZIP_MAGIC[0] {
                        return GzipHeaderStatus::Invalid;
                    }
                    pos += 1;
                    self.state = HeaderState::Id2;
                }
                HeaderState::Id2 => {
                    if input[pos] != GZIP_MAGIC[1] {
                        return GzipHeaderStatus::Invalid;
                    }
                    pos += 1;
                    self.state = HeaderState::Cm;
                }
                HeaderState::Cm => {
                    if input[pos] != CM_DEFLATE {
                        return GzipHeaderStatus::Invalid;
                    }
                    pos += 1;
                    self.state = HeaderState::Flg;
                }
                HeaderState::Flg => {
                    // FTEXT と予約ビットは無視する
                    self.flags =
                        input[pos] & (FLAG_FHCRC | FLAG_FEXTRA | FLAG_FNAME | FLAG_FCOMMENT);
                    pos += 1;
                    self.state = HeaderState::Mtime0;
                }
                HeaderState::Mtime0 => {
                    pos += 1;
                    self.state = HeaderState::Mtime1;
                }
                HeaderState::Mtime1 => {
                    pos += 1;
                    self.state = HeaderState::Mtime2;
                }
                HeaderState::Mtime2 => {
                    pos += 1;
                    self.state = HeaderState::Mtime3;
                }
                HeaderState::Mtime3 => {
                    pos += 1;
                    self.state = HeaderState::Xfl;
                }
                HeaderState::Xfl => {
                    pos += 1;
                    self.state = HeaderState::Os;
                }
                HeaderState::Os => {
                    pos += 1;
                    self.state = HeaderState::XlenByte0;
                }
                HeaderState::XlenByte0 => {
                    if self.flags & FLAG_FEXTRA == 0 {
                        self.state = HeaderState::Fname;
                        continue;
                    }
                    self.extra_length = u16::from(input[pos]);
                    pos += 1;
                    self.state = HeaderState::XlenByte1;
                }
                HeaderState::XlenByte1 => {
                    self.extra_length |= u16::from(input[pos]) << 8;
                    pos += 1;
                    self.state = HeaderState::Fextra;
                    // 長さ 0 の FEXTRA は次のバイトを待たずにここで読み終える
                    self.skip_extra(input, &mut pos);
                }
                HeaderState::Fextra => {
                    self.skip_extra(input, &mut pos);
                }
                HeaderState::Fname => {
                    if self.flags & FLAG_FNAME == 0 {
                        self.state = HeaderState::Fcomment;
                        continue;
                    }
                    if self.skip_zero_terminated(input, &mut pos) {
                        self.flags &= !FLAG_FNAME;
                        self.state = HeaderState::Fcomment;
                    }
                }
                HeaderState::Fcomment => {
                    if self.flags & FLAG_FCOMMENT == 0 {
                        self.state = HeaderState::FhcrcByte0;
                        continue;
                    }
                    if self.skip_zero_terminated(input, &mut pos) {
                        self.flags &= !FLAG_FCOMMENT;
                        self.state = HeaderState::FhcrcByte0;
                    }
                }
                HeaderState::FhcrcByte0 => {
                    if self.flags & FLAG_FHCRC == 0 {
                        self.state = HeaderState::Done;
                        continue;
                    }
                    pos += 1;
                    self.state = HeaderState::FhcrcByte1;
                }
                HeaderState::FhcrcByte1 => {
                    pos += 1;
                    self.flags &= !FLAG_FHCRC;
                    self.state = HeaderState::Done;
                }
                HeaderState::Done => {
                    return GzipHeaderStatus::Complete { header_end: pos };
                }
            }
        }

        if self.state > HeaderState::Os && self.flags == 0 {
            GzipHeaderStatus::Complete { header_end: pos }
        } else {
            GzipHeaderStatus::Incomplete
        }
    }

    fn skip_extra(&mut self, input: &[u8], pos: &mut usize) {
        let available = input.len() - *pos;
        let n = usize::from(self.extra_length).min(available);
        *pos += n;
        // n は extra_length 以下
        self.extra_length -= n as u16;
        if self.extra_length == 0 {
            self.flags &= !FLAG_FEXTRA;
            self.state = HeaderState::Fname;
        }
    }

    /// NUL 終端まで読み飛ばす。終端を読み終えたら true
    fn skip_zero_terminated(&mut self, input: &[u8], pos: &mut usize) -> bool {
        match input[*pos..].iter().position(|&b| b == 0) {
            Some(offset) => {
                *pos += offset + 1;
                true
            }
            None => {
                *pos = input.len();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03];

    fn header_with_flags(flags: u8) -> Vec<u8> {
        let mut header = BASIC.to_vec();
        header[3] = flags;
        header
    }

    #[test]
    fn test_basic_header_complete() {
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&BASIC),
            GzipHeaderStatus::Complete { header_end: 10 }
        );
    }

    #[test]
    fn test_basic_header_with_body_following() {
        let mut input = BASIC.to_vec();
        input.extend_from_slice(b"body");
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&input),
            GzipHeaderStatus::Complete { header_end: 10 }
        );
    }

    #[test]
    fn test_byte_by_byte() {
        let mut input = header_with_flags(FLAG_FNAME | FLAG_FCOMMENT | FLAG_FHCRC);
        input.extend_from_slice(b"name\0");
        input.extend_from_slice(b"comment\0");
        input.extend_from_slice(&[0xab, 0xcd]);
        let mut header = GzipHeader::new();
        for byte in &input[..input.len() - 1] {
            assert_eq!(
                header.read_more(std::slice::from_ref(byte)),
                GzipHeaderStatus::Incomplete
            );
        }
        assert_eq!(
            header.read_more(&input[input.len() - 1..]),
            GzipHeaderStatus::Complete { header_end: 1 }
        );
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&[0x1f, 0x8c]), GzipHeaderStatus::Invalid);

        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&[0x00]), GzipHeaderStatus::Invalid);
    }

    #[test]
    fn test_invalid_compression_method() {
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&[0x1f, 0x8b, 0x07]),
            GzipHeaderStatus::Invalid
        );
    }

    #[test]
    fn test_fextra() {
        let mut input = header_with_flags(FLAG_FEXTRA);
        input.extend_from_slice(&[3, 0, b'a', b'b', b'c']);
        input.extend_from_slice(b"data");
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&input),
            GzipHeaderStatus::Complete { header_end: 15 }
        );
    }

    #[test]
    fn test_fextra_split() {
        let mut input = header_with_flags(FLAG_FEXTRA);
        input.extend_from_slice(&[0x00, 0x01]); // 256 バイト
        input.extend(std::iter::repeat_n(0x55, 256));
        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&input[..100]), GzipHeaderStatus::Incomplete);
        assert_eq!(header.read_more(&input[100..200]), GzipHeaderStatus::Incomplete);
        assert_eq!(
            header.read_more(&input[200..]),
            GzipHeaderStatus::Complete { header_end: 68 }
        );
    }

    #[test]
    fn test_zero_length_fextra_completes_immediately() {
        let mut input = header_with_flags(FLAG_FEXTRA);
        input.extend_from_slice(&[0, 0]);
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&input),
            GzipHeaderStatus::Complete { header_end: 12 }
        );
    }

    #[test]
    fn test_ftext_and_reserved_bits_ignored() {
        let input = header_with_flags(FLAG_FTEXT | 0xe0);
        let mut header = GzipHeader::new();
        assert_eq!(
            header.read_more(&input),
            GzipHeaderStatus::Complete { header_end: 10 }
        );
    }

    #[test]
    fn test_fname_incomplete() {
        let mut input = header_with_flags(FLAG_FNAME);
        input.extend_from_slice(b"file.txt");
        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&input), GzipHeaderStatus::Incomplete);
        assert_eq!(
            header.read_more(b"\0rest"),
            GzipHeaderStatus::Complete { header_end: 1 }
        );
    }

    #[test]
    fn test_truncated_fixed_header() {
        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&BASIC[..9]), GzipHeaderStatus::Incomplete);
    }

    #[test]
    fn test_reset() {
        let mut header = GzipHeader::new();
        assert_eq!(header.read_more(&[0x00]), GzipHeaderStatus::Invalid);
        header.reset();
        assert_eq!(
            header.read_more(&BASIC),
            GzipHeaderStatus::Complete { header_end: 10 }
        );
    }
}
