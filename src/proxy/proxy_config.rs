//! プロキシ設定
//!
//! 設定は自動設定 (WPAD による自動検出と PAC URL) と手動ルールからなる。
//! 自動設定を持つ場合は PAC スクリプトの評価が必要になり、持たない場合は
//! 手動ルールだけで同期的に解決できる。
//!
//! 手動ルールの書式:
//!
//! ```text
//! "foopy:80,bar,direct://"        すべての URL に同じ候補を使う
//! "http=foopy;https=bar:8080"     スキームごとの候補
//! "http=foopy;socks=foopy2"       http 以外は SOCKS4 の foopy2 を使う
//! ```

use crate::proxy::proxy_bypass_rules::ProxyBypassRules;
use crate::proxy::proxy_info::ProxyInfo;
use crate::proxy::proxy_list::ProxyList;
use crate::proxy::proxy_server::ProxyScheme;
use crate::uri::Uri;

/// 設定の世代を表す ID
///
/// 設定が変わるたびに増える。解決結果がどの設定で得られたかを判定するのに使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigId(u32);

impl ConfigId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// 設定の取得元
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyConfigSource {
    #[default]
    Unknown,
    /// OS の設定
    System,
    /// アプリケーションが指定した設定
    Custom,
    /// テスト用
    Test,
}

impl ProxyConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyConfigSource::Unknown => "unknown",
            ProxyConfigSource::System => "system",
            ProxyConfigSource::Custom => "custom",
            ProxyConfigSource::Test => "test",
        }
    }
}

/// 手動ルールの種類
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyRulesType {
    /// ルールなし (直接接続)
    #[default]
    Empty,
    /// すべての URL に同じ候補を使う
    ProxyList,
    /// URL のスキームごとに候補を使い分ける
    ProxyListPerScheme,
}

/// 手動のプロキシルール
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyRules {
    pub bypass_rules: ProxyBypassRules,
    /// true の場合、バイパスルールに一致した URL だけプロキシを使う
    pub reverse_bypass: bool,
    pub rules_type: ProxyRulesType,
    /// `ProxyList` の場合の候補
    pub single_proxies: ProxyList,
    pub proxies_for_http: ProxyList,
    pub proxies_for_https: ProxyList,
    pub proxies_for_ftp: ProxyList,
    /// スキーム別の候補がない場合に使う候補 (`socks=`)
    pub fallback_proxies: ProxyList,
}

impl ProxyRules {
    /// ルール文字列をパースする
    ///
    /// - `;` で区切った要素を順に見る
    /// - `=` を含まない要素はすべての URL 向けのリストとし、そこでパースを終える。
    ///   ただし既にスキーム別の要素があれば無視する
    /// - `scheme=list` の scheme は http / https / ftp / socks のみ有効
    /// - `socks=` は他に候補のないスキーム向けで、スキーム省略時は SOCKS4 になる
    ///
    /// バイパスルールはパース結果に含まれない。
    pub fn parse(input: &str) -> Self {
        let mut rules = Self::default();
        for entry in input.split(';') {
            let mut tokens = entry.split('=').filter(|t| !t.trim().is_empty());
            while let Some(first) = tokens.next() {
                let Some(list) = tokens.next() else {
                    if rules.rules_type == ProxyRulesType::ProxyListPerScheme {
                        continue;
                    }
                    rules.single_proxies = ProxyList::from_uri_list(first, ProxyScheme::Http);
                    rules.rules_type = ProxyRulesType::ProxyList;
                    return rules;
                };

                let url_scheme = first.trim().to_ascii_lowercase();
                rules.rules_type = ProxyRulesType::ProxyListPerScheme;
                let (entry, default_scheme) = match url_scheme.as_str() {
                    "http" => (&mut rules.proxies_for_http, ProxyScheme::Http),
                    "https" => (&mut rules.proxies_for_https, ProxyScheme::Http),
                    "ftp" => (&mut rules.proxies_for_ftp, ProxyScheme::Http),
                    // socks は URL のスキームではなく「その他すべて」を表す
                    "socks" => (&mut rules.fallback_proxies, ProxyScheme::Socks4),
                    _ => {
                        tracing::debug!(scheme = url_scheme, "ignoring unsupported proxy rule scheme");
                        continue;
                    }
                };
                for server in ProxyList::from_uri_list(list, default_scheme).iter() {
                    entry.add(server.clone());
                }
            }
        }
        rules
    }

    /// バイパスルールを設定する
    pub fn with_bypass_rules(mut self, bypass_rules: ProxyBypassRules) -> Self {
        self.bypass_rules = bypass_rules;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules_type == ProxyRulesType::Empty
    }

    /// URL のスキームに対応する候補
    ///
    /// スキーム別の候補が空なら `socks=` の候補を使う。どちらもなければ `None`。
    pub fn map_url_scheme_to_proxy_list(&self, scheme: &str) -> Option<&ProxyList> {
        let list = match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(&self.proxies_for_http),
            "https" => Some(&self.proxies_for_https),
            "ftp" => Some(&self.proxies_for_ftp),
            _ => None,
        };
        match list {
            Some(list) if !list.is_empty() => Some(list),
            _ if !self.fallback_proxies.is_empty() => Some(&self.fallback_proxies),
            _ => None,
        }
    }

    /// ルールを URL に適用する
    ///
    /// バイパス判定、スキーム別の候補、`socks=` の候補、直接接続の順に決める。
    pub fn apply(&self, url: &Uri, info: &mut ProxyInfo) {
        if self.rules_type == ProxyRulesType::Empty {
            info.use_direct();
            return;
        }

        if self.bypass_rules.matches(url) != self.reverse_bypass {
            info.use_direct_with_bypassed_proxy();
            return;
        }

        match self.rules_type {
            ProxyRulesType::ProxyList => info.use_proxy_list(self.single_proxies.clone()),
            ProxyRulesType::ProxyListPerScheme => {
                match url
                    .scheme()
                    .and_then(|scheme| self.map_url_scheme_to_proxy_list(scheme))
                {
                    Some(list) => info.use_proxy_list(list.clone()),
                    None => info.use_direct(),
                }
            }
            ProxyRulesType::Empty => info.use_direct(),
        }
    }
}

/// プロキシ設定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// WPAD による自動検出を行うか
    pub auto_detect: bool,
    /// PAC スクリプトの URL
    pub pac_url: Option<String>,
    /// PAC スクリプトを取得できない場合にすべての通信を止めるか
    pub pac_mandatory: bool,
    /// 手動ルール
    pub proxy_rules: ProxyRules,
    pub source: ProxyConfigSource,
    id: Option<ConfigId>,
}

impl ProxyConfig {
    /// 直接接続の設定
    pub fn direct() -> Self {
        Self::default()
    }

    /// 自動検出の設定
    pub fn auto_detect() -> Self {
        Self {
            auto_detect: true,
            ..Self::default()
        }
    }

    /// PAC URL の設定
    pub fn from_pac_url(pac_url: &str) -> Self {
        Self {
            pac_url: Some(pac_url.to_string()),
            ..Self::default()
        }
    }

    /// 手動ルールの設定
    pub fn from_rules(rules: &str) -> Self {
        Self {
            proxy_rules: ProxyRules::parse(rules),
            ..Self::default()
        }
    }

    /// PAC を必須にする
    pub fn with_pac_mandatory(mut self, pac_mandatory: bool) -> Self {
        self.pac_mandatory = pac_mandatory;
        self
    }

    pub fn with_source(mut self, source: ProxyConfigSource) -> Self {
        self.source = source;
        self
    }

    /// 自動検出または PAC URL を持つか
    pub fn has_automatic_settings(&self) -> bool {
        self.auto_detect || self.pac_url.is_some()
    }

    /// 自動設定を取り除き、手動ルールだけにする
    pub fn clear_automatic_settings(&mut self) {
        self.auto_detect = false;
        self.pac_url = None;
    }

    pub fn id(&self) -> Option<ConfigId> {
        self.id
    }

    pub fn set_id(&mut self, id: ConfigId) {
        self.id = Some(id);
    }

    /// サービスに取り込まれた設定か
    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uris(list: &ProxyList) -> Vec<String> {
        list.iter().map(|p| p.to_uri()).collect()
    }

    fn apply(rules: &ProxyRules, url: &str) -> ProxyInfo {
        let mut info = ProxyInfo::new();
        rules.apply(&Uri::parse(url).unwrap(), &mut info);
        info
    }

    #[test]
    fn parse_single_list() {
        let rules = ProxyRules::parse("foopy:80,bar,direct://");
        assert_eq!(rules.rules_type, ProxyRulesType::ProxyList);
        assert_eq!(uris(&rules.single_proxies), ["foopy:80", "bar:80", "direct://"]);
    }

    #[test]
    fn parse_per_scheme_with_socks_fallback() {
        let rules = ProxyRules::parse("http=foopy;socks=foopy2");
        assert_eq!(rules.rules_type, ProxyRulesType::ProxyListPerScheme);
        assert_eq!(uris(&rules.proxies_for_http), ["foopy:80"]);
        assert!(rules.proxies_for_https.is_empty());
        assert_eq!(uris(&rules.fallback_proxies), ["socks4://foopy2:1080"]);

        assert_eq!(apply(&rules, "http://a/").to_pac_string(), "PROXY foopy:80");
        assert_eq!(apply(&rules, "https://a/").to_pac_string(), "SOCKS foopy2:1080");
        assert_eq!(apply(&rules, "ws://a/").to_pac_string(), "SOCKS foopy2:1080");
    }

    #[test]
    fn parse_per_scheme_lists() {
        let rules = ProxyRules::parse("http=foopy:80,bar;https=https://secure;ftp=socks5://f");
        assert_eq!(uris(&rules.proxies_for_http), ["foopy:80", "bar:80"]);
        assert_eq!(uris(&rules.proxies_for_https), ["https://secure:443"]);
        assert_eq!(uris(&rules.proxies_for_ftp), ["socks5://f:1080"]);
        assert!(apply(&rules, "gopher://a/").is_direct());
    }

    #[test]
    fn first_scheme_less_list_wins() {
        let rules = ProxyRules::parse("foopy;http=bar");
        assert_eq!(rules.rules_type, ProxyRulesType::ProxyList);
        assert_eq!(uris(&rules.single_proxies), ["foopy:80"]);
        assert!(rules.proxies_for_http.is_empty());
    }

    #[test]
    fn later_scheme_less_list_is_ignored() {
        let rules = ProxyRules::parse("http=foopy;bar;https=baz");
        assert_eq!(rules.rules_type, ProxyRulesType::ProxyListPerScheme);
        assert_eq!(uris(&rules.proxies_for_http), ["foopy:80"]);
        assert_eq!(uris(&rules.proxies_for_https), ["baz:80"]);
        assert!(rules.single_proxies.is_empty());
    }

    #[test]
    fn unknown_scheme_is_ignored() {
        let rules = ProxyRules::parse("gopher=foopy;http=bar");
        assert_eq!(rules.rules_type, ProxyRulesType::ProxyListPerScheme);
        assert_eq!(uris(&rules.proxies_for_http), ["bar:80"]);
        assert!(rules.fallback_proxies.is_empty());
    }

    #[test]
    fn empty_rules_use_direct() {
        let rules = ProxyRules::parse("");
        assert!(rules.is_empty());
        let info = apply(&rules, "http://a/");
        assert!(info.is_direct());
        assert!(!info.did_bypass_proxy());
    }

    #[test]
    fn bypass_and_reverse_bypass() {
        let mut rules = ProxyRules::parse("foopy")
            .with_bypass_rules(ProxyBypassRules::parse("*.local.example"));
        let info = apply(&rules, "http://a.local.example/");
        assert!(info.is_direct());
        assert!(info.did_bypass_proxy());
        assert!(!apply(&rules, "http://remote.example/").is_direct());

        rules.reverse_bypass = true;
        assert!(!apply(&rules, "http://a.local.example/").is_direct());
        assert!(apply(&rules, "http://remote.example/").did_bypass_proxy());
    }

    #[test]
    fn config_automatic_settings() {
        let mut config = ProxyConfig::from_pac_url("http://wpad.example/proxy.pac")
            .with_pac_mandatory(true);
        assert!(config.has_automatic_settings());
        config.clear_automatic_settings();
        assert!(!config.has_automatic_settings());
        assert!(config.pac_mandatory);

        assert!(ProxyConfig::auto_detect().has_automatic_settings());
        assert!(!ProxyConfig::direct().has_automatic_settings());
    }

    #[test]
    fn config_is_valid_once_it_has_an_id() {
        let mut a = ProxyConfig::from_rules("foopy");
        let b = ProxyConfig::from_rules("foopy").with_source(ProxyConfigSource::System);
        a.set_id(ConfigId::new(3));
        assert!(a.is_valid());
        assert!(!b.is_valid());
        assert_eq!(a.id(), Some(ConfigId::new(3)));
    }
}
