//! プロキシサーバーの識別子
//!
//! 二つの文字列表現を扱う。
//!
//! - URI 形式: `socks5://proxy.example:1080`、`proxy.example:8080`、`direct://`
//! - PAC 形式: `PROXY proxy.example:8080`、`SOCKS5 proxy.example:1080`、`DIRECT`
//!
//! ```rust
//! use shiguredo_netstack::proxy::{ProxyScheme, ProxyServer};
//!
//! let server = ProxyServer::from_uri("socks://proxy.example", ProxyScheme::Http).unwrap();
//! assert_eq!(server.scheme(), ProxyScheme::Socks5);
//! assert_eq!(server.port(), 1080);
//! assert_eq!(server.to_pac_string(), "SOCKS5 proxy.example:1080");
//!
//! let server = ProxyServer::from_pac_token("PROXY foopy:3128").unwrap();
//! assert_eq!(server.to_uri(), "foopy:3128");
//! ```

use core::fmt;

/// プロキシの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    /// プロキシを使わない
    Direct,
    Http,
    Https,
    Socks4,
    Socks5,
    Quic,
}

impl ProxyScheme {
    /// URI 形式のスキーム名
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Direct => "direct",
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Quic => "quic",
        }
    }

    /// デフォルトポート
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyScheme::Direct => 0,
            ProxyScheme::Http => 80,
            ProxyScheme::Https | ProxyScheme::Quic => 443,
            ProxyScheme::Socks4 | ProxyScheme::Socks5 => 1080,
        }
    }

    fn from_uri_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            "socks4" => Some(ProxyScheme::Socks4),
            // URI 形式の socks は SOCKS5
            "socks" | "socks5" => Some(ProxyScheme::Socks5),
            "quic" => Some(ProxyScheme::Quic),
            "direct" => Some(ProxyScheme::Direct),
            _ => None,
        }
    }

    fn from_pac_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "proxy" => Some(ProxyScheme::Http),
            "https" => Some(ProxyScheme::Https),
            // PAC 形式の SOCKS は SOCKS4
            "socks" | "socks4" => Some(ProxyScheme::Socks4),
            "socks5" => Some(ProxyScheme::Socks5),
            "quic" => Some(ProxyScheme::Quic),
            "direct" => Some(ProxyScheme::Direct),
            _ => None,
        }
    }
}

/// プロキシサーバー
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyServer {
    scheme: ProxyScheme,
    host: String,
    port: u16,
}

impl ProxyServer {
    /// 直接接続
    pub fn direct() -> Self {
        Self {
            scheme: ProxyScheme::Direct,
            host: String::new(),
            port: 0,
        }
    }

    /// スキーム、ホスト、ポートから作成
    ///
    /// `Direct` を指定した場合、ホストとポートは無視する。
    /// ホストが空の場合は `None` を返す。
    pub fn new(scheme: ProxyScheme, host: &str, port: u16) -> Option<Self> {
        if scheme == ProxyScheme::Direct {
            return Some(Self::direct());
        }
        let host = normalize_host(host)?;
        Some(Self { scheme, host, port })
    }

    /// URI 形式からパースする
    ///
    /// スキームを省略した場合は `default_scheme` を使う。
    pub fn from_uri(input: &str, default_scheme: ProxyScheme) -> Option<Self> {
        let input = input.trim();
        let (scheme, rest) = match input.find("://") {
            Some(pos) => (ProxyScheme::from_uri_scheme(&input[..pos])?, &input[pos + 3..]),
            None => (default_scheme, input),
        };
        Self::from_scheme_and_host_port(scheme, rest)
    }

    /// PAC 形式の要素 (`"PROXY host:port"` など) をパースする
    pub fn from_pac_token(input: &str) -> Option<Self> {
        let input = input.trim();
        let (keyword, rest) = match input.find(|c: char| c.is_ascii_whitespace()) {
            Some(pos) => (&input[..pos], input[pos..].trim_start()),
            None => (input, ""),
        };
        let scheme = ProxyScheme::from_pac_keyword(keyword)?;
        Self::from_scheme_and_host_port(scheme, rest)
    }

    fn from_scheme_and_host_port(scheme: ProxyScheme, host_port: &str) -> Option<Self> {
        if scheme == ProxyScheme::Direct {
            return Some(Self::direct());
        }
        let (host, port) = split_host_port(host_port.trim())?;
        Self::new(scheme, host, port.unwrap_or_else(|| scheme.default_port()))
    }

    pub fn scheme(&self) -> ProxyScheme {
        self.scheme
    }

    /// ホスト名 (IPv6 アドレスは角括弧付き)
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_direct(&self) -> bool {
        self.scheme == ProxyScheme::Direct
    }

    pub fn is_http(&self) -> bool {
        self.scheme == ProxyScheme::Http
    }

    pub fn is_socks(&self) -> bool {
        matches!(self.scheme, ProxyScheme::Socks4 | ProxyScheme::Socks5)
    }

    /// `host:port` 形式
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URI 形式
    ///
    /// HTTP プロキシはスキームを省略する。この値は再試行情報のキーにも使う。
    pub fn to_uri(&self) -> String {
        match self.scheme {
            ProxyScheme::Direct => "direct://".to_string(),
            ProxyScheme::Http => self.host_port(),
            scheme => format!("{}://{}", scheme.as_str(), self.host_port()),
        }
    }

    /// PAC 形式
    pub fn to_pac_string(&self) -> String {
        let keyword = match self.scheme {
            ProxyScheme::Direct => return "DIRECT".to_string(),
            ProxyScheme::Http => "PROXY",
            ProxyScheme::Https => "HTTPS",
            ProxyScheme::Socks4 => "SOCKS",
            ProxyScheme::Socks5 => "SOCKS5",
            ProxyScheme::Quic => "QUIC",
        };
        format!("{} {}", keyword, self.host_port())
    }
}

impl fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

/// `host[:port]` を分割する。ポートが不正な場合は `None`
fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if input.is_empty() {
        return None;
    }
    if input.starts_with('[') {
        let end = input.find(']')?;
        let host = &input[..=end];
        let rest = &input[end + 1..];
        if rest.is_empty() {
            return Some((host, None));
        }
        let port = rest.strip_prefix(':')?.parse().ok()?;
        return Some((host, Some(port)));
    }
    match input.rfind(':') {
        Some(pos) => {
            let port = input[pos + 1..].parse().ok()?;
            Some((&input[..pos], Some(port)))
        }
        None => Some((input, None)),
    }
}

fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() || host.contains(|c: char| c.is_ascii_whitespace() || c == '/') {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uri_with_scheme() {
        let cases = [
            ("http://foopy", ProxyScheme::Http, "foopy", 80),
            ("https://foopy", ProxyScheme::Https, "foopy", 443),
            ("socks4://foopy", ProxyScheme::Socks4, "foopy", 1080),
            ("socks5://foopy:10", ProxyScheme::Socks5, "foopy", 10),
            ("socks://foopy", ProxyScheme::Socks5, "foopy", 1080),
            ("quic://foopy", ProxyScheme::Quic, "foopy", 443),
            ("HTTP://FooPy:8080", ProxyScheme::Http, "foopy", 8080),
            ("http://[::1]:3128", ProxyScheme::Http, "[::1]", 3128),
        ];
        for (input, scheme, host, port) in cases {
            let server = ProxyServer::from_uri(input, ProxyScheme::Http).unwrap();
            assert_eq!(server.scheme(), scheme, "{input}");
            assert_eq!(server.host(), host, "{input}");
            assert_eq!(server.port(), port, "{input}");
        }
    }

    #[test]
    fn from_uri_default_scheme() {
        let server = ProxyServer::from_uri("foopy:80", ProxyScheme::Http).unwrap();
        assert!(server.is_http());
        let server = ProxyServer::from_uri("foopy", ProxyScheme::Socks4).unwrap();
        assert_eq!(server.scheme(), ProxyScheme::Socks4);
        assert_eq!(server.port(), 1080);
    }

    #[test]
    fn from_uri_direct() {
        let server = ProxyServer::from_uri("direct://", ProxyScheme::Http).unwrap();
        assert!(server.is_direct());
        assert_eq!(server.to_uri(), "direct://");
    }

    #[test]
    fn from_uri_invalid() {
        assert!(ProxyServer::from_uri("", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("   ", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("ftp://foopy", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("foopy:port", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("foopy:99999", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("http://", ProxyScheme::Http).is_none());
        assert!(ProxyServer::from_uri("[::1", ProxyScheme::Http).is_none());
    }

    #[test]
    fn from_pac_token() {
        let cases = [
            ("PROXY foopy:10", "foopy:10"),
            ("proxy   foopy", "foopy:80"),
            ("SOCKS foopy", "socks4://foopy:1080"),
            ("SOCKS4 foopy:20", "socks4://foopy:20"),
            ("SOCKS5 foopy", "socks5://foopy:1080"),
            ("HTTPS foopy", "https://foopy:443"),
            ("QUIC foopy", "quic://foopy:443"),
            ("DIRECT", "direct://"),
            ("  direct  ", "direct://"),
        ];
        for (input, uri) in cases {
            let server = ProxyServer::from_pac_token(input).unwrap();
            assert_eq!(server.to_uri(), uri, "{input}");
        }
    }

    #[test]
    fn from_pac_token_invalid() {
        assert!(ProxyServer::from_pac_token("").is_none());
        assert!(ProxyServer::from_pac_token("PROXY").is_none());
        assert!(ProxyServer::from_pac_token("FOOPY bar:80").is_none());
        assert!(ProxyServer::from_pac_token("PROXY bar:x").is_none());
    }

    #[test]
    fn to_pac_string() {
        let server = ProxyServer::new(ProxyScheme::Socks4, "foopy", 1080).unwrap();
        assert_eq!(server.to_pac_string(), "SOCKS foopy:1080");
        let server = ProxyServer::new(ProxyScheme::Http, "foopy", 80).unwrap();
        assert_eq!(server.to_pac_string(), "PROXY foopy:80");
        assert_eq!(ProxyServer::direct().to_pac_string(), "DIRECT");
    }
}
