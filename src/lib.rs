//! # shiguredo_netstack
//!
//! ネットワークスタックのストリーム展開とプロキシ解決 (Sans I/O)
//!
//! ## 特徴
//!
//! - **Sans I/O**: ソケットもタイマーも持たず、呼び出し側が駆動する
//! - **フィルターストリーム**: `SourceStream` を重ねて gzip / deflate を展開する
//! - **プロキシ解決**: 自動検出、PAC、手動ルールを順に試す状態機械
//!
//! ## 使い方
//!
//! ### gzip の展開
//!
//! ```rust
//! use shiguredo_netstack::gzip_source_stream::GzipSourceStream;
//! use shiguredo_netstack::mock_source_stream::{MockSourceStream, ReadMode};
//! use shiguredo_netstack::{SourceStream, SourceType};
//!
//! // "hello" を gzip 圧縮したもの
//! let body = [
//!     0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9,
//!     0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
//! ];
//! let source = MockSourceStream::new();
//! source.handle().add_read_result(&body, ReadMode::Sync);
//! source.handle().add_read_result(b"", ReadMode::Sync);
//!
//! let mut stream = GzipSourceStream::create(Box::new(source), SourceType::Gzip).unwrap();
//! let mut buf = [0u8; 64];
//! let n = stream.try_read(&mut buf).unwrap().unwrap();
//! assert_eq!(&buf[..n], b"hello");
//! ```
//!
//! ### プロキシ解決
//!
//! ```rust
//! use shiguredo_netstack::proxy::{ProxyService, ResolveResult};
//!
//! let mut service = ProxyService::create_fixed_from_rules("foopy:80,direct://");
//! let result = service.resolve_proxy("http://example.com/", "GET", |_| {});
//! let ResolveResult::Ready(Ok(info)) = result else {
//!     panic!("manual rules resolve synchronously");
//! };
//! assert_eq!(info.to_pac_string(), "PROXY foopy:80;DIRECT");
//! ```

pub mod clock;
pub mod compression;
pub mod content_encoding;
mod error;
pub mod filter_source_stream;
pub mod gzip_header;
pub mod gzip_source_stream;
mod limits;
pub mod mock_source_stream;
pub mod proxy;
mod source_stream;
pub mod uri;

pub use error::Error;
pub use filter_source_stream::{Filter, FilterProgress, FilterSourceStream};
pub use limits::FilterLimits;
pub use source_stream::{SourceStream, SourceType};
