//! Content-Encoding と展開ストリームの組み立て
//!
//! ## 概要
//!
//! Content-Encoding ヘッダーをパースし、適用されたコーディングの逆順に
//! 展開フィルターを重ねた `SourceStream` を組み立てます。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_netstack::content_encoding::ContentEncoding;
//! use shiguredo_netstack::SourceType;
//!
//! let ce = ContentEncoding::parse("deflate, x-gzip").unwrap();
//! assert_eq!(
//!     ce.source_types(),
//!     vec![SourceType::Deflate, SourceType::Gzip]
//! );
//! ```

use core::fmt;

use crate::filter_source_stream::FilterSourceStream;
use crate::gzip_source_stream::GzipFilter;
use crate::limits::FilterLimits;
use crate::source_stream::{SourceStream, SourceType};

/// Content-Encoding パースエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEncodingError {
    /// 空の入力
    Empty,
    /// 不正なエンコーディングトークン
    InvalidEncoding,
}

impl fmt::Display for ContentEncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentEncodingError::Empty => write!(f, "empty Content-Encoding"),
            ContentEncodingError::InvalidEncoding => {
                write!(f, "invalid Content-Encoding token")
            }
        }
    }
}

impl std::error::Error for ContentEncodingError {}

/// コンテント コーディング (Content Coding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
    Identity,
    Other(String),
}

impl ContentCoding {
    /// 正規化したトークン値
    pub fn as_str(&self) -> &str {
        match self {
            ContentCoding::Gzip => "gzip",
            ContentCoding::Deflate => "deflate",
            ContentCoding::Brotli => "br",
            ContentCoding::Zstd => "zstd",
            ContentCoding::Identity => "identity",
            ContentCoding::Other(value) => value.as_str(),
        }
    }

    /// 対応する展開ストリームの種別
    pub fn source_type(&self) -> SourceType {
        match self {
            ContentCoding::Gzip => SourceType::Gzip,
            ContentCoding::Deflate => SourceType::Deflate,
            ContentCoding::Brotli => SourceType::Brotli,
            ContentCoding::Zstd => SourceType::Zstd,
            ContentCoding::Identity => SourceType::None,
            ContentCoding::Other(_) => SourceType::Unknown,
        }
    }
}

/// Content-Encoding ヘッダー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEncoding {
    encodings: Vec<ContentCoding>,
}

impl ContentEncoding {
    /// Content-Encoding ヘッダーをパース
    pub fn parse(input: &str) -> Result<Self, ContentEncodingError> {
        let mut encodings = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            encodings.push(parse_coding(part)?);
        }

        if encodings.is_empty() {
            return Err(ContentEncodingError::Empty);
        }

        Ok(ContentEncoding { encodings })
    }

    /// 適用された順のエンコーディング一覧
    pub fn encodings(&self) -> &[ContentCoding] {
        &self.encodings
    }

    /// 適用された順の展開ストリーム種別 (identity は除く)
    pub fn source_types(&self) -> Vec<SourceType> {
        self.encodings
            .iter()
            .map(ContentCoding::source_type)
            .filter(|t| *t != SourceType::None)
            .collect()
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<&str> = self.encodings.iter().map(ContentCoding::as_str).collect();
        write!(f, "{}", values.join(", "))
    }
}

/// 上流を Content-Encoding に従って展開するストリームで包む
///
/// 最後に適用されたコーディングから順に展開する。展開できない
/// コーディングが一つでも含まれている場合は、上流をそのまま返す。
pub fn build_source_stream(
    upstream: Box<dyn SourceStream>,
    encoding: &ContentEncoding,
    limits: &FilterLimits,
) -> Box<dyn SourceStream> {
    let filters: Option<Vec<GzipFilter>> = encoding
        .source_types()
        .into_iter()
        .map(|t| GzipFilter::from_source_type(t, limits))
        .collect();
    let Some(filters) = filters else {
        tracing::warn!(
            encoding = %encoding,
            "unsupported content encoding, passing the body through"
        );
        return upstream;
    };

    filters.into_iter().rev().fold(upstream, |stream, filter| {
        let filtered: Box<dyn SourceStream> =
            Box::new(FilterSourceStream::with_limits(stream, filter, limits));
        filtered
    })
}

fn parse_coding(token: &str) -> Result<ContentCoding, ContentEncodingError> {
    if !token.bytes().all(is_token_char) {
        return Err(ContentEncodingError::InvalidEncoding);
    }

    let normalized = token.to_ascii_lowercase();
    let coding = match normalized.as_str() {
        "gzip" | "x-gzip" => ContentCoding::Gzip,
        "deflate" => ContentCoding::Deflate,
        "br" => ContentCoding::Brotli,
        "zstd" => ContentCoding::Zstd,
        "identity" => ContentCoding::Identity,
        _ => ContentCoding::Other(normalized),
    };

    Ok(coding)
}

fn is_token_char(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'0'..=b'9' | b'A'..=b'Z' | b'^' | b'_' | b'`' | b'a'..=b'z' | b'|' | b'~'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_source_stream::{MockSourceStream, ReadMode};
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;

    fn read_all(stream: &mut dyn SourceStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match stream.try_read(&mut buf) {
                Some(Ok(0)) => return out,
                Some(Ok(n)) => out.extend_from_slice(&buf[..n]),
                other => panic!("unexpected read result: {other:?}"),
            }
        }
    }

    fn mock(data: &[u8]) -> Box<dyn SourceStream> {
        let source = MockSourceStream::new();
        source.handle().add_read_result(data, ReadMode::Sync);
        source.handle().add_read_result(b"", ReadMode::Sync);
        Box::new(source)
    }

    #[test]
    fn parse_single() {
        let ce = ContentEncoding::parse("gzip").unwrap();
        assert_eq!(ce.encodings().len(), 1);
        assert_eq!(ce.encodings()[0], ContentCoding::Gzip);
        assert_eq!(ce.source_types(), vec![SourceType::Gzip]);
    }

    #[test]
    fn parse_multiple() {
        let ce = ContentEncoding::parse("gzip, deflate, identity").unwrap();
        assert_eq!(ce.encodings().len(), 3);
        assert_eq!(ce.source_types(), vec![SourceType::Gzip, SourceType::Deflate]);
    }

    #[test]
    fn parse_unknown() {
        let ce = ContentEncoding::parse("x-custom").unwrap();
        assert_eq!(ce.encodings()[0], ContentCoding::Other("x-custom".to_string()));
        assert_eq!(ce.encodings()[0].source_type(), SourceType::Unknown);
    }

    #[test]
    fn parse_invalid() {
        assert_eq!(ContentEncoding::parse(""), Err(ContentEncodingError::Empty));
        assert_eq!(ContentEncoding::parse(" , "), Err(ContentEncodingError::Empty));
        assert!(ContentEncoding::parse("gzip,").is_ok());
        assert_eq!(
            ContentEncoding::parse("g zip"),
            Err(ContentEncodingError::InvalidEncoding)
        );
    }

    #[test]
    fn display() {
        let ce = ContentEncoding::parse("X-GZIP, Deflate").unwrap();
        assert_eq!(ce.to_string(), "gzip, deflate");
    }

    #[test]
    fn chain_is_applied_in_reverse() {
        let data = b"layered content".repeat(20);
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&data).unwrap();
        let deflated = zlib.finish().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&deflated).unwrap();
        let body = gz.finish().unwrap();

        let ce = ContentEncoding::parse("deflate, gzip").unwrap();
        let mut stream = build_source_stream(mock(&body), &ce, &FilterLimits::default());
        assert_eq!(stream.description(), "GZIP,DEFLATE");
        assert_eq!(stream.source_type(), SourceType::Deflate);
        assert_eq!(read_all(stream.as_mut()), data);
    }

    #[test]
    fn identity_only_passes_through() {
        let ce = ContentEncoding::parse("identity").unwrap();
        let mut stream = build_source_stream(mock(b"plain"), &ce, &FilterLimits::default());
        assert_eq!(stream.source_type(), SourceType::None);
        assert_eq!(read_all(stream.as_mut()), b"plain");
    }

    #[test]
    fn unsupported_coding_passes_through() {
        let ce = ContentEncoding::parse("gzip, br").unwrap();
        let mut stream = build_source_stream(mock(b"raw"), &ce, &FilterLimits::default());
        assert_eq!(stream.source_type(), SourceType::None);
        assert_eq!(read_all(stream.as_mut()), b"raw");
    }
}
