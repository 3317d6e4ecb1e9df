//! tokio_netstack - Tokio integration for shiguredo_netstack
//!
//! Sans I/O の `SourceStream` と tokio の `AsyncRead` を相互に変換するアダプターと、
//! JSON ファイルからプロキシ設定を読み込む `ProxyConfigService` を提供する。
//!
//! ## 展開
//!
//! ```ignore
//! use shiguredo_netstack::SourceType;
//! use shiguredo_netstack::gzip_source_stream::GzipSourceStream;
//! use tokio_netstack::{AsyncReadSourceStream, read_to_end};
//!
//! let file = tokio::fs::File::open("body.gz").await?;
//! let upstream = Box::new(AsyncReadSourceStream::new(file));
//! let mut stream = GzipSourceStream::create(upstream, SourceType::Gzip).unwrap();
//! let body = read_to_end(&mut stream).await?;
//! ```
//!
//! ## プロキシ設定
//!
//! ```ignore
//! use shiguredo_netstack::proxy::{NullProxyResolverFactory, ProxyService};
//! use tokio_netstack::config::JsonProxyConfigService;
//!
//! let config_service = JsonProxyConfigService::load("proxy.json").await?;
//! let mut service = ProxyService::new(
//!     Box::new(config_service),
//!     Box::new(NullProxyResolverFactory),
//! );
//! ```

pub mod config;
pub mod error;
mod io;

pub use error::{Error, Result};
pub use io::{AsyncReadSourceStream, SourceStreamReader, read, read_to_end};
