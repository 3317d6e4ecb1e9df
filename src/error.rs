use std::fmt;

use crate::compression::CompressionError;
use crate::uri::UriError;

/// ネットワークスタックのエラー
///
/// ストリームの展開エラーとプロキシ解決エラーを同じ型で扱う。
/// 上流の I/O エラーは種別とメッセージを保持したまま素通しする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 汎用的な失敗
    Failed,
    /// 内部状態の不整合
    Unexpected(String),
    /// 上流の I/O エラー
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
    /// コンテンツの展開に失敗した
    ContentDecodingFailed,
    /// 不正な URL
    InvalidUrl(String),
    /// 未実装の操作
    NotImplemented,
    /// プロキシへの接続に失敗した
    ProxyConnectionFailed,
    /// 利用可能なプロキシ候補が残っていない
    NoSupportedProxies,
    /// 必須の PAC 設定を取得できなかった
    MandatoryProxyConfigurationFailed,
    /// PAC スクリプトが不正、または実行に失敗した
    PacScriptFailed,
    /// PAC スクリプトの実行環境が終了した
    PacScriptTerminated,
    /// PAC ファイルの取得に失敗した
    PacFetchFailed(String),
    /// 名前解決に失敗した
    NameNotResolved,
}

impl Error {
    /// net エラー名 (ログ用)
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::Failed => "ERR_FAILED",
            Error::Unexpected(_) => "ERR_UNEXPECTED",
            Error::Io { .. } => "ERR_IO",
            Error::ContentDecodingFailed => "ERR_CONTENT_DECODING_FAILED",
            Error::InvalidUrl(_) => "ERR_INVALID_URL",
            Error::NotImplemented => "ERR_NOT_IMPLEMENTED",
            Error::ProxyConnectionFailed => "ERR_PROXY_CONNECTION_FAILED",
            Error::NoSupportedProxies => "ERR_NO_SUPPORTED_PROXIES",
            Error::MandatoryProxyConfigurationFailed => {
                "ERR_MANDATORY_PROXY_CONFIGURATION_FAILED"
            }
            Error::PacScriptFailed => "ERR_PAC_SCRIPT_FAILED",
            Error::PacScriptTerminated => "ERR_PAC_SCRIPT_TERMINATED",
            Error::PacFetchFailed(_) => "ERR_PAC_FETCH_FAILED",
            Error::NameNotResolved => "ERR_NAME_NOT_RESOLVED",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed => write!(f, "operation failed"),
            Error::Unexpected(msg) => write!(f, "unexpected state: {}", msg),
            Error::Io { kind, message } => write!(f, "I/O error ({:?}): {}", kind, message),
            Error::ContentDecodingFailed => write!(f, "content decoding failed"),
            Error::InvalidUrl(msg) => write!(f, "invalid URL: {}", msg),
            Error::NotImplemented => write!(f, "not implemented"),
            Error::ProxyConnectionFailed => write!(f, "proxy connection failed"),
            Error::NoSupportedProxies => write!(f, "no supported proxies"),
            Error::MandatoryProxyConfigurationFailed => {
                write!(f, "mandatory proxy configuration failed")
            }
            Error::PacScriptFailed => write!(f, "PAC script failed"),
            Error::PacScriptTerminated => write!(f, "PAC script terminated"),
            Error::PacFetchFailed(msg) => write!(f, "PAC fetch failed: {}", msg),
            Error::NameNotResolved => write!(f, "name not resolved"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CompressionError> for Error {
    fn from(_: CompressionError) -> Self {
        // 展開器の詳細は利用者に見せず、単一の展開エラーにまとめる
        Error::ContentDecodingFailed
    }
}

impl From<UriError> for Error {
    fn from(e: UriError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_compression_error() {
        let e: Error = CompressionError::InvalidData("bad block".to_string()).into();
        assert_eq!(e, Error::ContentDecodingFailed);
    }

    #[test]
    fn test_from_io_error_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let e: Error = io.into();
        match e {
            Error::Io { kind, message } => {
                assert_eq!(kind, std::io::ErrorKind::ConnectionReset);
                assert_eq!(message, "reset by peer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display_and_name() {
        assert_eq!(
            Error::ContentDecodingFailed.to_string(),
            "content decoding failed"
        );
        assert_eq!(
            Error::MandatoryProxyConfigurationFailed.as_str(),
            "ERR_MANDATORY_PROXY_CONFIGURATION_FAILED"
        );
    }
}
