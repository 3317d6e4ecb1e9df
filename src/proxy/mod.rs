//! プロキシ解決
//!
//! ## 概要
//!
//! - 候補のモデル: `ProxyServer`, `ProxyList`, `ProxyInfo`
//! - 設定: `ProxyConfig` (自動検出、PAC URL、手動ルール), `ProxyRules`, `ProxyBypassRules`
//! - 外部の協力者: `ProxyConfigService`, `PacFileFetcher`, `ProxyResolverFactory`,
//!   `ProxyResolver`, `ProxyDelegate`
//! - 状態機械: `ProxyService`
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_netstack::proxy::{ProxyList, ProxyScheme, ProxyServer};
//!
//! let list = ProxyList::from_uri_list("foopy:80,bar,direct://", ProxyScheme::Http);
//! assert_eq!(list.to_pac_string(), "PROXY foopy:80;PROXY bar:80;DIRECT");
//!
//! let server = ProxyServer::from_pac_token("SOCKS5 foopy:1080").unwrap();
//! assert_eq!(server.to_uri(), "socks5://foopy:1080");
//! ```

mod pac_file_decider;
mod pac_file_fetcher;
mod pac_poller;
mod poll_policy;
mod proxy_bypass_rules;
mod proxy_config;
mod proxy_config_service;
mod proxy_delegate;
mod proxy_info;
mod proxy_list;
mod proxy_resolver;
mod proxy_retry_info;
mod proxy_server;
mod proxy_service;

pub use pac_file_decider::{DecidedPac, DeciderStep, PacFileDecider, WPAD_URL};
pub use pac_file_fetcher::{PacFileFetcher, StaticPacFileFetcher};
pub use poll_policy::{
    DefaultPollPolicy, POLL_DELAY_AFTER_ERROR_1, POLL_DELAY_AFTER_ERROR_2,
    POLL_DELAY_AFTER_ERROR_3, POLL_DELAY_AFTER_ERROR_4, POLL_DELAY_AFTER_SUCCESS, PacPollPolicy,
    PollMode,
};
pub use proxy_bypass_rules::ProxyBypassRules;
pub use proxy_config::{ConfigId, ProxyConfig, ProxyConfigSource, ProxyRules, ProxyRulesType};
pub use proxy_config_service::{
    ConfigAvailability, DirectProxyConfigService, FixedProxyConfigService, ProxyConfigService,
    UnsetProxyConfigService,
};
pub use proxy_delegate::ProxyDelegate;
pub use proxy_info::ProxyInfo;
pub use proxy_list::{DEFAULT_PROXY_RETRY_DELAY, ProxyList};
pub use proxy_resolver::{
    Completion, JobId, NullProxyResolver, NullProxyResolverFactory, PacFileData,
    PacResultProxyResolver, PacResultProxyResolverFactory, ProxyResolver, ProxyResolverFactory,
};
pub use proxy_retry_info::{ProxyRetryInfo, ProxyRetryInfoMap};
pub use proxy_server::{ProxyScheme, ProxyServer};
pub use proxy_service::{
    DEFAULT_STALL_AFTER_NETWORK_CHANGE, LoadState, ProxyService, ProxyServiceSettings,
    ProxyServiceState, RequestHandle, ResolveCallback, ResolveResult,
};
