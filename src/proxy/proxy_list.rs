//! 優先順に並んだプロキシ候補
//!
//! 接続に失敗したら先頭を取り除いて次の候補へ進む (フォールバック)。
//! 失敗したプロキシは `ProxyRetryInfoMap` に記録し、期限までは後回しにする。

use core::fmt;
use std::time::{Duration, Instant};

use crate::Error;
use crate::proxy::proxy_retry_info::{ProxyRetryInfo, ProxyRetryInfoMap};
use crate::proxy::proxy_server::{ProxyScheme, ProxyServer};

/// フォールバック時に失敗したプロキシを避ける期間
pub const DEFAULT_PROXY_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// 優先順に並んだプロキシ候補
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyList {
    proxies: Vec<ProxyServer>,
}

impl ProxyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接接続だけの候補
    pub fn direct() -> Self {
        Self {
            proxies: vec![ProxyServer::direct()],
        }
    }

    /// 単一のプロキシからなる候補
    pub fn from_server(server: ProxyServer) -> Self {
        Self {
            proxies: vec![server],
        }
    }

    /// `,` または `;` 区切りの URI 形式のリストから作成する
    ///
    /// スキームのない要素は `default_scheme` として扱い、不正な要素は無視する。
    pub fn from_uri_list(input: &str, default_scheme: ProxyScheme) -> Self {
        let proxies = input
            .split([',', ';'])
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| ProxyServer::from_uri(s, default_scheme))
            .collect();
        Self { proxies }
    }

    /// PAC の戻り値 (`"PROXY a:80; DIRECT"` など) から設定する
    ///
    /// 有効な要素が一つもない場合は直接接続になる。
    pub fn set_from_pac_string(&mut self, pac_string: &str) {
        self.proxies = pac_string
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .filter_map(ProxyServer::from_pac_token)
            .collect();
        if self.proxies.is_empty() {
            tracing::debug!(pac_string, "no valid entries in PAC result, using DIRECT");
            self.proxies.push(ProxyServer::direct());
        }
    }

    /// PAC 形式の文字列
    pub fn to_pac_string(&self) -> String {
        if self.proxies.is_empty() {
            return "DIRECT".to_string();
        }
        self.proxies
            .iter()
            .map(ProxyServer::to_pac_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn add(&mut self, server: ProxyServer) {
        self.proxies.push(server);
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// 先頭の候補
    pub fn first(&self) -> Option<&ProxyServer> {
        self.proxies.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyServer> {
        self.proxies.iter()
    }

    /// 再試行期限内のプロキシを後ろに回す
    ///
    /// 期限内でも `try_while_bad` のものは末尾に残し、それ以外は取り除く。
    pub fn deprioritize_bad_proxies(&mut self, retry_info: &ProxyRetryInfoMap, now: Instant) {
        let mut good = Vec::with_capacity(self.proxies.len());
        let mut bad = Vec::new();
        for proxy in self.proxies.drain(..) {
            match retry_info.get(&proxy.to_uri()) {
                Some(info) if info.is_bad_at(now) => {
                    if info.try_while_bad {
                        bad.push(proxy);
                    }
                }
                _ => good.push(proxy),
            }
        }
        good.extend(bad);
        self.proxies = good;
    }

    /// 先頭の候補を失敗として記録し、次の候補へ進む
    ///
    /// 候補が残っていれば true を返す。
    pub fn fallback(
        &mut self,
        retry_info: &mut ProxyRetryInfoMap,
        net_error: Option<Error>,
        now: Instant,
    ) -> bool {
        self.fallback_with_delay(retry_info, DEFAULT_PROXY_RETRY_DELAY, net_error, now)
    }

    /// `fallback` と同じだが、再試行までの間隔を指定する
    pub fn fallback_with_delay(
        &mut self,
        retry_info: &mut ProxyRetryInfoMap,
        retry_delay: Duration,
        net_error: Option<Error>,
        now: Instant,
    ) -> bool {
        if self.proxies.is_empty() {
            return false;
        }
        self.update_retry_info_on_fallback(
            retry_info,
            retry_delay,
            true,
            &[],
            net_error,
            now,
        );
        self.proxies.remove(0);
        !self.proxies.is_empty()
    }

    /// 先頭の候補と `additional_bad_proxies` を再試行情報に記録する
    ///
    /// 先頭が直接接続の場合は何も記録しない。既存の記録は期限が延びる場合だけ上書きする。
    pub fn update_retry_info_on_fallback(
        &self,
        retry_info: &mut ProxyRetryInfoMap,
        retry_delay: Duration,
        reconsider: bool,
        additional_bad_proxies: &[ProxyServer],
        net_error: Option<Error>,
        now: Instant,
    ) {
        let Some(first) = self.proxies.first() else {
            return;
        };
        if first.is_direct() {
            return;
        }
        for proxy in std::iter::once(first).chain(additional_bad_proxies) {
            add_to_retry_list(retry_info, retry_delay, reconsider, proxy, net_error.clone(), now);
        }
    }
}

fn add_to_retry_list(
    retry_info: &mut ProxyRetryInfoMap,
    retry_delay: Duration,
    try_while_bad: bool,
    proxy: &ProxyServer,
    net_error: Option<Error>,
    now: Instant,
) {
    let bad_until = now + retry_delay;
    let key = proxy.to_uri();
    if retry_info
        .get(&key)
        .is_some_and(|existing| existing.bad_until >= bad_until)
    {
        return;
    }
    tracing::debug!(proxy = %key, delay = ?retry_delay, "marking proxy as bad");
    retry_info.insert(
        key,
        ProxyRetryInfo {
            bad_until,
            current_delay: retry_delay,
            try_while_bad,
            net_error,
        },
    );
}

impl fmt::Display for ProxyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_pac_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uris(list: &ProxyList) -> Vec<String> {
        list.iter().map(ProxyServer::to_uri).collect()
    }

    #[test]
    fn from_uri_list() {
        let list = ProxyList::from_uri_list("foopy:80,bar,direct://", ProxyScheme::Http);
        assert_eq!(uris(&list), ["foopy:80", "bar:80", "direct://"]);

        let list = ProxyList::from_uri_list("foo:1; ,invalid:x, socks5://s", ProxyScheme::Http);
        assert_eq!(uris(&list), ["foo:1", "socks5://s:1080"]);
    }

    #[test]
    fn pac_string() {
        let mut list = ProxyList::new();
        list.set_from_pac_string("PROXY foopy:10 ; SOCKS5 bar ; DIRECT");
        assert_eq!(list.to_pac_string(), "PROXY foopy:10;SOCKS5 bar:1080;DIRECT");

        list.set_from_pac_string("BOGUS foo; PROXY");
        assert_eq!(list.to_pac_string(), "DIRECT");
        assert!(list.first().unwrap().is_direct());
    }

    #[test]
    fn deprioritize() {
        let now = Instant::now();
        let mut list = ProxyList::from_uri_list("a,b,c,d", ProxyScheme::Http);
        let mut map = ProxyRetryInfoMap::new();
        let bad = |try_while_bad, until: Duration| ProxyRetryInfo {
            bad_until: now + until,
            current_delay: until,
            try_while_bad,
            net_error: None,
        };
        map.insert("a:80".into(), bad(true, Duration::from_secs(60)));
        map.insert("b:80".into(), bad(false, Duration::from_secs(60)));
        // 期限切れ
        map.insert("c:80".into(), bad(false, Duration::ZERO));

        list.deprioritize_bad_proxies(&map, now);
        assert_eq!(uris(&list), ["c:80", "d:80", "a:80"]);
    }

    #[test]
    fn fallback_records_first_proxy() {
        let now = Instant::now();
        let mut list = ProxyList::from_uri_list("a,b", ProxyScheme::Http);
        let mut map = ProxyRetryInfoMap::new();

        assert!(list.fallback(&mut map, Some(Error::ProxyConnectionFailed), now));
        assert_eq!(uris(&list), ["b:80"]);
        let info = &map["a:80"];
        assert_eq!(info.bad_until, now + DEFAULT_PROXY_RETRY_DELAY);
        assert!(info.try_while_bad);
        assert_eq!(info.net_error, Some(Error::ProxyConnectionFailed));

        assert!(!list.fallback(&mut map, None, now));
        assert!(list.is_empty());
        assert!(!list.fallback(&mut map, None, now));
    }

    #[test]
    fn fallback_from_direct_is_not_recorded() {
        let now = Instant::now();
        let mut list = ProxyList::from_uri_list("direct://,a", ProxyScheme::Http);
        let mut map = ProxyRetryInfoMap::new();
        assert!(list.fallback(&mut map, None, now));
        assert!(map.is_empty());
    }

    #[test]
    fn update_retry_info_keeps_later_deadline() {
        let now = Instant::now();
        let list = ProxyList::from_uri_list("a", ProxyScheme::Http);
        let mut map = ProxyRetryInfoMap::new();
        let extra = [ProxyServer::from_uri("b", ProxyScheme::Http).unwrap()];

        list.update_retry_info_on_fallback(
            &mut map,
            Duration::from_secs(100),
            false,
            &extra,
            None,
            now,
        );
        assert_eq!(map.len(), 2);
        assert!(!map["b:80"].try_while_bad);

        list.update_retry_info_on_fallback(&mut map, Duration::from_secs(10), true, &[], None, now);
        assert_eq!(map["a:80"].bad_until, now + Duration::from_secs(100));
        assert!(!map["a:80"].try_while_bad);

        list.update_retry_info_on_fallback(&mut map, Duration::from_secs(200), true, &[], None, now);
        assert_eq!(map["a:80"].bad_until, now + Duration::from_secs(200));
        assert!(map["a:80"].try_while_bad);
    }
}
