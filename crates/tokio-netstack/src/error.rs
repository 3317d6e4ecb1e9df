//! tokio-netstack エラー型

use std::fmt;

/// tokio-netstack エラー
#[derive(Debug)]
pub enum Error {
    /// I/O エラー
    Io(std::io::Error),
    /// ストリームの展開やプロキシ解決のエラー
    Netstack(shiguredo_netstack::Error),
    /// JSON パースエラー
    Json(nojson::JsonParseError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Netstack(e) => write!(f, "netstack error: {}", e),
            Error::Json(e) => write!(f, "JSON parse error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Netstack(e) => Some(e),
            Error::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<shiguredo_netstack::Error> for Error {
    fn from(e: shiguredo_netstack::Error) -> Self {
        Error::Netstack(e)
    }
}

impl From<nojson::JsonParseError> for Error {
    fn from(e: nojson::JsonParseError) -> Self {
        Error::Json(e)
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
