//! プロキシ設定の取得元

use crate::proxy::proxy_config::ProxyConfig;

/// 設定の取得状況
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAvailability {
    /// 設定を取得できた
    Valid(ProxyConfig),
    /// 設定がない (直接接続として扱う)
    Unset,
    /// まだ取得できていない
    ///
    /// 取得できたら `ProxyService::on_proxy_config_changed` で通知する。
    Pending,
}

/// プロキシ設定の取得元
///
/// 設定の変化は取得元の所有者が `ProxyService::on_proxy_config_changed` で通知する。
pub trait ProxyConfigService {
    /// 最新の設定
    fn latest_proxy_config(&mut self) -> ConfigAvailability;

    /// ネットワークの利用があったことを知らせる
    ///
    /// ポーリングで設定を監視する実装は、このタイミングで再取得してよい。
    fn on_lazy_poll(&mut self) {}
}

/// 固定の設定を返す
#[derive(Debug, Clone)]
pub struct FixedProxyConfigService {
    config: ProxyConfig,
}

impl FixedProxyConfigService {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }
}

impl ProxyConfigService for FixedProxyConfigService {
    fn latest_proxy_config(&mut self) -> ConfigAvailability {
        ConfigAvailability::Valid(self.config.clone())
    }
}

/// 常に直接接続の設定を返す
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectProxyConfigService;

impl ProxyConfigService for DirectProxyConfigService {
    fn latest_proxy_config(&mut self) -> ConfigAvailability {
        ConfigAvailability::Valid(ProxyConfig::direct())
    }
}

/// 設定を持たない
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsetProxyConfigService;

impl ProxyConfigService for UnsetProxyConfigService {
    fn latest_proxy_config(&mut self) -> ConfigAvailability {
        ConfigAvailability::Unset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_returns_clone() {
        let config = ProxyConfig::from_rules("foopy:8080");
        let mut service = FixedProxyConfigService::new(config.clone());
        assert_eq!(service.latest_proxy_config(), ConfigAvailability::Valid(config));
    }

    #[test]
    fn direct_and_unset() {
        assert_eq!(
            DirectProxyConfigService.latest_proxy_config(),
            ConfigAvailability::Valid(ProxyConfig::direct())
        );
        assert_eq!(
            UnsetProxyConfigService.latest_proxy_config(),
            ConfigAvailability::Unset
        );
    }
}
