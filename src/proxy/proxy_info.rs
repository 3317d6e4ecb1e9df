//! プロキシ解決の結果

use std::time::{Duration, Instant};

use crate::Error;
use crate::proxy::proxy_config::{ConfigId, ProxyConfigSource};
use crate::proxy::proxy_list::ProxyList;
use crate::proxy::proxy_retry_info::ProxyRetryInfoMap;
use crate::proxy::proxy_server::{ProxyScheme, ProxyServer};

/// プロキシ解決の結果
///
/// 候補のリストに加えて、フォールバックで失敗したプロキシの記録を持つ。
/// 接続に成功したら `ProxyService::report_success` にこの値を渡すと、
/// 記録がサービス側に反映される。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyInfo {
    proxy_list: ProxyList,
    proxy_retry_info: ProxyRetryInfoMap,
    pub(crate) config_id: Option<ConfigId>,
    pub(crate) config_source: ProxyConfigSource,
    pub(crate) did_bypass_proxy: bool,
    pub(crate) did_use_pac_script: bool,
    pub(crate) proxy_resolve_start_time: Option<Instant>,
    pub(crate) proxy_resolve_end_time: Option<Instant>,
}

impl ProxyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接接続を使う
    pub fn use_direct(&mut self) {
        self.reset(false);
        self.proxy_list = ProxyList::direct();
    }

    /// バイパスルールに一致したため直接接続を使う
    pub fn use_direct_with_bypassed_proxy(&mut self) {
        self.reset(true);
        self.proxy_list = ProxyList::direct();
    }

    /// URI 形式のリスト (`"foopy:80,direct://"` など) を使う
    pub fn use_named_proxy(&mut self, proxy_uri_list: &str) {
        self.reset(false);
        self.proxy_list = ProxyList::from_uri_list(proxy_uri_list, ProxyScheme::Http);
    }

    /// 単一のプロキシを使う
    pub fn use_proxy_server(&mut self, server: ProxyServer) {
        self.reset(false);
        self.proxy_list = ProxyList::from_server(server);
    }

    /// PAC の戻り値を使う
    pub fn use_pac_string(&mut self, pac_string: &str) {
        self.reset(false);
        self.proxy_list.set_from_pac_string(pac_string);
    }

    /// 候補のリストを使う
    pub fn use_proxy_list(&mut self, list: ProxyList) {
        self.reset(false);
        self.proxy_list = list;
    }

    fn reset(&mut self, did_bypass_proxy: bool) {
        self.proxy_retry_info.clear();
        self.did_bypass_proxy = did_bypass_proxy;
        self.did_use_pac_script = false;
    }

    /// 先頭の候補を失敗として記録し、次の候補へ進む
    pub fn fallback(&mut self, net_error: Option<Error>, now: Instant) -> bool {
        self.proxy_list
            .fallback(&mut self.proxy_retry_info, net_error, now)
    }

    /// `fallback` と同じだが、再試行までの間隔を指定する
    pub fn fallback_with_delay(
        &mut self,
        net_error: Option<Error>,
        retry_delay: Duration,
        now: Instant,
    ) -> bool {
        self.proxy_list
            .fallback_with_delay(&mut self.proxy_retry_info, retry_delay, net_error, now)
    }

    /// 再試行期限内のプロキシを後ろに回す
    pub fn deprioritize_bad_proxies(&mut self, retry_info: &ProxyRetryInfoMap, now: Instant) {
        self.proxy_list.deprioritize_bad_proxies(retry_info, now);
    }

    /// 現在の候補 (先頭)
    pub fn proxy_server(&self) -> Option<&ProxyServer> {
        self.proxy_list.first()
    }

    pub fn proxy_list(&self) -> &ProxyList {
        &self.proxy_list
    }

    /// このリクエストで失敗したプロキシの記録
    pub fn proxy_retry_info(&self) -> &ProxyRetryInfoMap {
        &self.proxy_retry_info
    }

    /// 候補がなくなったか
    pub fn is_empty(&self) -> bool {
        self.proxy_list.is_empty()
    }

    /// 現在の候補が直接接続か
    pub fn is_direct(&self) -> bool {
        self.proxy_server().is_some_and(ProxyServer::is_direct)
    }

    /// 直接接続だけからなるか
    pub fn is_direct_only(&self) -> bool {
        self.proxy_list.len() == 1 && self.is_direct()
    }

    pub fn to_pac_string(&self) -> String {
        self.proxy_list.to_pac_string()
    }

    /// 解決に使った設定の ID
    pub fn config_id(&self) -> Option<ConfigId> {
        self.config_id
    }

    pub fn config_source(&self) -> ProxyConfigSource {
        self.config_source
    }

    pub fn did_bypass_proxy(&self) -> bool {
        self.did_bypass_proxy
    }

    pub fn did_use_pac_script(&self) -> bool {
        self.did_use_pac_script
    }

    pub fn proxy_resolve_start_time(&self) -> Option<Instant> {
        self.proxy_resolve_start_time
    }

    pub fn proxy_resolve_end_time(&self) -> Option<Instant> {
        self.proxy_resolve_end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn use_direct() {
        let mut info = ProxyInfo::new();
        info.use_direct();
        assert!(info.is_direct());
        assert!(info.is_direct_only());
        assert!(!info.did_bypass_proxy());

        info.use_direct_with_bypassed_proxy();
        assert!(info.is_direct());
        assert!(info.did_bypass_proxy());
    }

    #[test]
    fn use_named_proxy_then_fallback() {
        let now = Instant::now();
        let mut info = ProxyInfo::new();
        info.use_named_proxy("foopy1:8080,foopy2:9090");
        assert_eq!(info.proxy_server().unwrap().to_uri(), "foopy1:8080");

        assert!(info.fallback(Some(Error::ProxyConnectionFailed), now));
        assert_eq!(info.proxy_server().unwrap().to_uri(), "foopy2:9090");
        assert!(info.proxy_retry_info().contains_key("foopy1:8080"));

        assert!(!info.fallback(Some(Error::ProxyConnectionFailed), now));
        assert!(info.is_empty());
        assert!(info.proxy_server().is_none());
    }

    #[test]
    fn use_clears_retry_info() {
        let now = Instant::now();
        let mut info = ProxyInfo::new();
        info.use_pac_string("PROXY a:1;PROXY b:2");
        info.fallback(None, now + Duration::from_secs(1));
        assert_eq!(info.proxy_retry_info().len(), 1);

        info.use_pac_string("DIRECT");
        assert!(info.proxy_retry_info().is_empty());
        assert_eq!(info.to_pac_string(), "DIRECT");
    }
}
