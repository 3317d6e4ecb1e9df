//! プロキシを使わない宛先のルール
//!
//! `,` または `;` で区切ったルールの並び。各ルールは次のいずれか。
//!
//! - `[scheme://]host_pattern[:port]`: `*` を任意の文字列として扱う。
//!   `.example.com` は `*.example.com` と同じ
//! - `ip/prefix`: IPv4 / IPv6 のアドレス範囲
//! - `<local>`: ドットを含まないホスト名
//!
//! ```rust
//! use shiguredo_netstack::proxy::ProxyBypassRules;
//! use shiguredo_netstack::uri::Uri;
//!
//! let rules = ProxyBypassRules::parse("*.internal, http://intranet:8080; <local>");
//! assert!(rules.matches(&Uri::parse("https://build.internal/").unwrap()));
//! assert!(rules.matches(&Uri::parse("http://intranet:8080/").unwrap()));
//! assert!(rules.matches(&Uri::parse("http://intranet/").unwrap()));
//! assert!(!rules.matches(&Uri::parse("https://example.com/").unwrap()));
//! ```

use core::fmt;
use std::net::IpAddr;

use crate::uri::Uri;

#[derive(Debug, Clone, PartialEq, Eq)]
enum BypassRule {
    Hostname {
        scheme: Option<String>,
        pattern: String,
        port: Option<u16>,
    },
    IpRange {
        network: IpAddr,
        prefix_len: u8,
    },
    SimpleHostnames,
}

impl BypassRule {
    fn parse(input: &str) -> Option<Self> {
        if input.eq_ignore_ascii_case("<local>") {
            return Some(BypassRule::SimpleHostnames);
        }
        if let Some(rule) = parse_ip_range(input) {
            return Some(rule);
        }

        let (scheme, rest) = match input.find("://") {
            Some(pos) => (Some(input[..pos].to_ascii_lowercase()), &input[pos + 3..]),
            None => (None, input),
        };
        let (host, port) = split_pattern_port(rest)?;
        if host.is_empty() || host.contains('/') {
            return None;
        }
        let mut pattern = host.to_ascii_lowercase();
        if pattern.starts_with('.') {
            pattern.insert(0, '*');
        }
        Some(BypassRule::Hostname {
            scheme,
            pattern,
            port,
        })
    }

    fn matches(&self, url: &Uri) -> bool {
        let Some(host) = url.host().map(str::to_ascii_lowercase) else {
            return false;
        };
        match self {
            BypassRule::Hostname {
                scheme,
                pattern,
                port,
            } => {
                if scheme.as_deref().is_some_and(|s| !url.scheme_is(s)) {
                    return false;
                }
                if port.is_some() && *port != url.effective_port() {
                    return false;
                }
                wildcard_match(pattern, &host)
            }
            BypassRule::IpRange {
                network,
                prefix_len,
            } => {
                let literal = host.trim_start_matches('[').trim_end_matches(']');
                literal
                    .parse::<IpAddr>()
                    .is_ok_and(|addr| ip_in_range(addr, *network, *prefix_len))
            }
            BypassRule::SimpleHostnames => {
                !host.contains('.') && !host.starts_with('[') && host.parse::<IpAddr>().is_err()
            }
        }
    }
}

impl fmt::Display for BypassRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BypassRule::Hostname {
                scheme,
                pattern,
                port,
            } => {
                if let Some(scheme) = scheme {
                    write!(f, "{}://", scheme)?;
                }
                write!(f, "{}", pattern)?;
                if let Some(port) = port {
                    write!(f, ":{}", port)?;
                }
                Ok(())
            }
            BypassRule::IpRange {
                network: IpAddr::V6(addr),
                prefix_len,
            } => write!(f, "[{}]/{}", addr, prefix_len),
            BypassRule::IpRange {
                network,
                prefix_len,
            } => write!(f, "{}/{}", network, prefix_len),
            BypassRule::SimpleHostnames => write!(f, "<local>"),
        }
    }
}

/// プロキシを使わない宛先のルール
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyBypassRules {
    rules: Vec<BypassRule>,
}

impl ProxyBypassRules {
    /// ルールの並びをパースする。解釈できないルールは無視する
    pub fn parse(input: &str) -> Self {
        let rules = input
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| {
                let rule = BypassRule::parse(s);
                if rule.is_none() {
                    tracing::debug!(rule = s, "ignoring invalid proxy bypass rule");
                }
                rule
            })
            .collect();
        Self { rules }
    }

    /// URL がいずれかのルールに一致するか
    pub fn matches(&self, url: &Uri) -> bool {
        self.rules.iter().any(|rule| rule.matches(url))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

impl fmt::Display for ProxyBypassRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
        write!(f, "{}", rules.join(";"))
    }
}

fn split_pattern_port(input: &str) -> Option<(&str, Option<u16>)> {
    if input.starts_with('[') {
        let end = input.find(']')?;
        let rest = &input[end + 1..];
        let port = match rest.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if rest.is_empty() => None,
            None => return None,
        };
        return Some((&input[..=end], port));
    }
    match input.rfind(':') {
        Some(pos) => Some((&input[..pos], Some(input[pos + 1..].parse().ok()?))),
        None => Some((input, None)),
    }
}

fn parse_ip_range(input: &str) -> Option<BypassRule> {
    let (addr, prefix) = input.split_once('/')?;
    let addr = addr.trim_start_matches('[').trim_end_matches(']');
    let network: IpAddr = addr.parse().ok()?;
    let prefix_len: u8 = prefix.parse().ok()?;
    let max = if network.is_ipv4() { 32 } else { 128 };
    if prefix_len > max {
        return None;
    }
    Some(BypassRule::IpRange {
        network,
        prefix_len,
    })
}

fn ip_in_range(addr: IpAddr, network: IpAddr, prefix_len: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            u32::from(a) & mask == u32::from(n) & mask
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
            u128::from(a) & mask == u128::from(n) & mask
        }
        _ => false,
    }
}

/// `*` だけを特殊文字として扱うパターン照合
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&b| b == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn wildcard() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*.example.com", "www.example.com"));
        assert!(!wildcard_match("*.example.com", "example.com"));
        assert!(wildcard_match("a*c*e", "abcde"));
        assert!(!wildcard_match("a*c*e", "abcdf"));
        assert!(wildcard_match("exact", "exact"));
    }

    #[test]
    fn hostname_rules() {
        let rules = ProxyBypassRules::parse("www.google.com, .example.org ;*.corp:8080");
        assert_eq!(rules.len(), 3);
        assert!(rules.matches(&url("http://www.google.com/")));
        assert!(rules.matches(&url("http://WWW.GOOGLE.COM/")));
        assert!(!rules.matches(&url("http://google.com/")));
        assert!(rules.matches(&url("https://a.example.org/")));
        assert!(rules.matches(&url("http://host.corp:8080/")));
        assert!(!rules.matches(&url("http://host.corp/")));
    }

    #[test]
    fn scheme_rule() {
        let rules = ProxyBypassRules::parse("https://secure.example");
        assert!(rules.matches(&url("https://secure.example/")));
        assert!(!rules.matches(&url("http://secure.example/")));
    }

    #[test]
    fn default_port_rule() {
        let rules = ProxyBypassRules::parse("example.com:443");
        assert!(rules.matches(&url("https://example.com/")));
        assert!(!rules.matches(&url("http://example.com/")));
    }

    #[test]
    fn local_rule() {
        let rules = ProxyBypassRules::parse("<local>");
        assert!(rules.matches(&url("http://intranet/")));
        assert!(!rules.matches(&url("http://intranet.example/")));
        assert!(!rules.matches(&url("http://[::1]/")));
    }

    #[test]
    fn ip_range_rules() {
        let rules = ProxyBypassRules::parse("192.168.0.0/16, [fe80::]/10");
        assert!(rules.matches(&url("http://192.168.1.20/")));
        assert!(!rules.matches(&url("http://192.169.1.20/")));
        assert!(rules.matches(&url("http://[fe80::1]:8080/")));
        assert!(!rules.matches(&url("http://[2001:db8::1]/")));
        assert!(!rules.matches(&url("http://host.example/")));
    }

    #[test]
    fn invalid_rules_ignored() {
        let rules = ProxyBypassRules::parse("host:notaport, 10.0.0.0/40, ,ok.example");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.to_string(), "ok.example");
    }

    #[test]
    fn display() {
        let rules = ProxyBypassRules::parse("http://.a.example:81;<local>;10.0.0.0/8");
        assert_eq!(rules.to_string(), "http://*.a.example:81;<local>;10.0.0.0/8");
    }
}
