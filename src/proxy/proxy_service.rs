//! プロキシ解決サービス
//!
//! URL と HTTP メソッドから使用するプロキシ (または直接接続) を決める状態機械。
//!
//! ## 状態
//!
//! ```text
//! None -> WaitingForProxyConfig -> WaitingForInitProxyResolver -> Ready
//! ```
//!
//! 設定の変更、ネットワークの変化、明示的な再読み込みで `None` に戻り、
//! 初めからやり直す。`Ready` 以外の間に来たリクエストは保留し、
//! `Ready` になったら到着順に処理する。
//!
//! ## I/O
//!
//! 設定の取得、PAC スクリプトの取得、リゾルバーの生成と評価は外部の協力者が行う。
//! 協力者が `Completion::Pending` を返した場合、結果は
//! `on_pac_fetch_complete` / `on_resolver_created` / `on_resolve_job_complete` で渡す。
//! 時間で動く処理 (ネットワーク変化後の待機、PAC の定期取得) は
//! `next_timeout()` の時刻に `handle_timeout()` を呼ぶことで進む。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_netstack::proxy::{ProxyService, ResolveResult};
//!
//! let mut service = ProxyService::create_fixed_from_rules("http=foopy:80;socks=foopy2");
//! let ResolveResult::Ready(Ok(info)) = service.resolve_proxy("http://example.com/", "GET", |_| {})
//! else {
//!     panic!("manual rules resolve synchronously");
//! };
//! assert_eq!(info.to_pac_string(), "PROXY foopy:80");
//!
//! let ResolveResult::Ready(Ok(info)) = service.resolve_proxy("ftp://example.com/", "GET", |_| {})
//! else {
//!     panic!("manual rules resolve synchronously");
//! };
//! assert_eq!(info.to_pac_string(), "SOCKS foopy2:1080");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::proxy::pac_file_decider::{DecidedPac, PacFileDecider};
use crate::proxy::pac_file_fetcher::PacFileFetcher;
use crate::proxy::pac_poller::{PacPoller, PollChange};
use crate::proxy::poll_policy::{DefaultPollPolicy, PacPollPolicy};
use crate::proxy::proxy_config::{ConfigId, ProxyConfig, ProxyConfigSource};
use crate::proxy::proxy_config_service::{
    ConfigAvailability, DirectProxyConfigService, FixedProxyConfigService, ProxyConfigService,
};
use crate::proxy::proxy_delegate::ProxyDelegate;
use crate::proxy::proxy_info::ProxyInfo;
use crate::proxy::proxy_list::{DEFAULT_PROXY_RETRY_DELAY, ProxyList};
use crate::proxy::proxy_resolver::{
    Completion, JobId, NullProxyResolverFactory, PacResultProxyResolverFactory, ProxyResolver,
    ProxyResolverFactory,
};
use crate::proxy::proxy_retry_info::ProxyRetryInfoMap;
use crate::proxy::proxy_server::{ProxyScheme, ProxyServer};
use crate::uri::{SanitizeUrlPolicy, Uri};

/// ネットワーク変化後に PAC の取得を始めるまでの待ち時間
pub const DEFAULT_STALL_AFTER_NETWORK_CHANGE: Duration = Duration::from_secs(2);

/// 非同期に完了したリクエストの通知先
pub type ResolveCallback = Box<dyn FnOnce(Result<ProxyInfo, Error>)>;

/// サービスの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyServiceState {
    /// 設定を適用していない
    None,
    /// 設定の取得待ち
    WaitingForProxyConfig,
    /// PAC の決定とリゾルバーの生成待ち
    WaitingForInitProxyResolver,
    /// リクエストを処理できる
    Ready,
}

/// 保留中のリクエストの進み具合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// 保留中のリクエストではない
    Idle,
    /// プロキシを解決している
    ResolvingProxyForUrl,
    /// PAC スクリプトを取得している
    DownloadingPacFile,
}

/// サービスの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyServiceSettings {
    /// `reconsider_proxy_after_error` で失敗したプロキシを避ける期間
    ///
    /// デフォルト: 5 分
    pub proxy_retry_delay: Duration,
    /// ネットワーク変化の後、PAC の取得を始めるまで待つ時間
    ///
    /// デフォルト: 2 秒
    pub stall_after_network_change: Duration,
    /// リゾルバーに渡す URL のサニタイズ方針
    pub sanitize_url_policy: SanitizeUrlPolicy,
}

impl Default for ProxyServiceSettings {
    fn default() -> Self {
        Self {
            proxy_retry_delay: DEFAULT_PROXY_RETRY_DELAY,
            stall_after_network_change: DEFAULT_STALL_AFTER_NETWORK_CHANGE,
            sanitize_url_policy: SanitizeUrlPolicy::Safe,
        }
    }
}

/// 保留中のリクエストの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestHandle(u64);

/// `resolve_proxy` の結果
#[derive(Debug, PartialEq, Eq)]
pub enum ResolveResult {
    /// 同期的に完了した。コールバックは呼ばれない
    Ready(Result<ProxyInfo, Error>),
    /// 保留した。完了時にコールバックが呼ばれる
    Pending(RequestHandle),
}

impl ResolveResult {
    pub fn is_pending(&self) -> bool {
        matches!(self, ResolveResult::Pending(_))
    }

    /// 保留した場合のハンドル
    pub fn handle(&self) -> Option<RequestHandle> {
        match self {
            ResolveResult::Pending(handle) => Some(*handle),
            ResolveResult::Ready(_) => None,
        }
    }
}

struct PacRequest {
    url: Uri,
    method: String,
    callback: ResolveCallback,
    /// リゾルバーで評価中のジョブ。`None` なら未開始
    job: Option<JobId>,
    config_id: Option<ConfigId>,
    config_source: ProxyConfigSource,
    creation_time: Instant,
}

enum InitProxyResolver {
    Deciding(PacFileDecider),
    CreatingResolver { job: JobId, decided: DecidedPac },
}

enum Begin {
    Done(Result<ProxyInfo, Error>),
    Async(Uri),
}

/// プロキシ解決サービス
///
/// 単一スレッドで使う。コールバックはサービスのメソッドの中から呼ばれるため、
/// コールバックからサービスを呼び返してはいけない。
/// サービスを破棄すると、保留中のコールバックは呼ばれずに破棄される。
pub struct ProxyService {
    config_service: Box<dyn ProxyConfigService>,
    resolver_factory: Box<dyn ProxyResolverFactory>,
    pac_fetcher: Option<Box<dyn PacFileFetcher>>,
    resolver: Option<Box<dyn ProxyResolver>>,
    delegate: Option<Box<dyn ProxyDelegate>>,
    clock: Box<dyn Clock>,
    poll_policy: Box<dyn PacPollPolicy>,
    settings: ProxyServiceSettings,

    state: ProxyServiceState,
    fetched_config: Option<ProxyConfig>,
    config: Option<ProxyConfig>,
    next_config_id: u32,
    permanent_error: Option<Error>,
    proxy_retry_info: ProxyRetryInfoMap,
    pending_requests: BTreeMap<RequestHandle, PacRequest>,
    next_request_id: u64,
    init: Option<InitProxyResolver>,
    poller: Option<PacPoller>,
    stall_autoconfig_until: Option<Instant>,
}

impl ProxyService {
    /// 設定の取得元とリゾルバーの生成方法を指定して作る
    ///
    /// 設定は最初の `resolve_proxy` で取得する。
    pub fn new(
        config_service: Box<dyn ProxyConfigService>,
        resolver_factory: Box<dyn ProxyResolverFactory>,
    ) -> Self {
        Self {
            config_service,
            resolver_factory,
            pac_fetcher: None,
            resolver: None,
            delegate: None,
            clock: Box::new(SystemClock),
            poll_policy: Box::new(DefaultPollPolicy),
            settings: ProxyServiceSettings::default(),
            state: ProxyServiceState::None,
            fetched_config: None,
            config: None,
            next_config_id: 1,
            permanent_error: None,
            proxy_retry_info: ProxyRetryInfoMap::new(),
            pending_requests: BTreeMap::new(),
            next_request_id: 1,
            init: None,
            poller: None,
            stall_autoconfig_until: None,
        }
    }

    /// 常に直接接続するサービス
    pub fn create_direct() -> Self {
        Self::new(
            Box::new(DirectProxyConfigService),
            Box::new(NullProxyResolverFactory),
        )
    }

    /// 固定の設定を使うサービス
    ///
    /// PAC は評価できないため、自動設定を含む場合は解決時に直接接続になる。
    pub fn create_fixed(config: ProxyConfig) -> Self {
        Self::new(
            Box::new(FixedProxyConfigService::new(config)),
            Box::new(NullProxyResolverFactory),
        )
    }

    /// 手動ルールの文字列から作る
    pub fn create_fixed_from_rules(rules: &str) -> Self {
        Self::create_fixed(ProxyConfig::from_rules(rules))
    }

    /// すべての URL に同じ PAC の戻り値 (`"PROXY foopy:80; DIRECT"` など) を返すサービス
    pub fn create_fixed_from_pac_result(pac_string: &str) -> Self {
        Self::new(
            Box::new(FixedProxyConfigService::new(ProxyConfig::auto_detect())),
            Box::new(PacResultProxyResolverFactory::new(pac_string)),
        )
    }

    /// PAC を評価しないサービス
    pub fn create_without_proxy_resolver(config_service: Box<dyn ProxyConfigService>) -> Self {
        Self::new(config_service, Box::new(NullProxyResolverFactory))
    }

    pub fn with_settings(mut self, settings: ProxyServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_poll_policy(mut self, policy: impl PacPollPolicy + 'static) -> Self {
        self.poll_policy = Box::new(policy);
        self
    }

    pub fn with_pac_file_fetcher(mut self, fetcher: impl PacFileFetcher + 'static) -> Self {
        self.pac_fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn with_proxy_delegate(mut self, delegate: impl ProxyDelegate + 'static) -> Self {
        self.delegate = Some(Box::new(delegate));
        self
    }

    pub fn set_proxy_delegate(&mut self, delegate: Option<Box<dyn ProxyDelegate>>) {
        self.delegate = delegate;
    }

    pub fn state(&self) -> ProxyServiceState {
        self.state
    }

    /// 使用中の設定
    pub fn config(&self) -> Option<&ProxyConfig> {
        self.config.as_ref()
    }

    /// 最後に取得した設定
    pub fn fetched_config(&self) -> Option<&ProxyConfig> {
        self.fetched_config.as_ref()
    }

    pub fn settings(&self) -> &ProxyServiceSettings {
        &self.settings
    }

    /// 失敗したプロキシの記録
    pub fn proxy_retry_info(&self) -> &ProxyRetryInfoMap {
        &self.proxy_retry_info
    }

    /// 失敗したプロキシの記録を消す
    pub fn clear_bad_proxies(&mut self) {
        self.proxy_retry_info.clear();
    }

    /// 保留中のリクエスト数
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// プロキシを解決する
    ///
    /// 同期的に決まれば `ResolveResult::Ready` を返し、`callback` は呼ばない。
    /// 決まらなければ `ResolveResult::Pending` を返し、完了時に `callback` を呼ぶ。
    pub fn resolve_proxy(
        &mut self,
        url: &str,
        method: &str,
        callback: impl FnOnce(Result<ProxyInfo, Error>) + 'static,
    ) -> ResolveResult {
        match self.begin_resolve(url, method) {
            Begin::Done(result) => ResolveResult::Ready(result),
            Begin::Async(url) => self.enqueue_request(url, method, Box::new(callback)),
        }
    }

    /// 同期的に決まる場合だけ解決する
    ///
    /// 決まらない場合や失敗した場合は `None` を返す。リクエストは作らない。
    pub fn try_resolve_proxy_synchronously(&mut self, url: &str, method: &str) -> Option<ProxyInfo> {
        match self.begin_resolve(url, method) {
            Begin::Done(result) => result.ok(),
            Begin::Async(_) => None,
        }
    }

    /// 保留中のリクエストを取り消す
    ///
    /// コールバックは呼ばれない。完了済みや取り消し済みのハンドルは無視する。
    pub fn cancel_request(&mut self, handle: RequestHandle) {
        let Some(request) = self.pending_requests.remove(&handle) else {
            return;
        };
        if let (Some(job), Some(resolver)) = (request.job, self.resolver.as_mut()) {
            resolver.cancel(job);
        }
        tracing::debug!(url = %request.url, "proxy resolution cancelled");
    }

    /// 保留中のリクエストの進み具合
    pub fn get_load_state(&self, handle: RequestHandle) -> LoadState {
        if !self.pending_requests.contains_key(&handle) {
            return LoadState::Idle;
        }
        match (&self.state, &self.init) {
            (
                ProxyServiceState::WaitingForInitProxyResolver,
                Some(InitProxyResolver::Deciding(decider)),
            ) if decider.pending_fetch().is_some() => LoadState::DownloadingPacFile,
            _ => LoadState::ResolvingProxyForUrl,
        }
    }

    /// 接続に失敗した後、次の候補を決める
    ///
    /// `info` を解決した後に設定が変わっていれば解決し直す。変わっていなければ
    /// 先頭の候補を `proxy_retry_delay` の間避けるように記録して次の候補へ進む。
    /// 候補が残っていなければ `Error::NoSupportedProxies` を返す。
    pub fn reconsider_proxy_after_error(
        &mut self,
        url: &str,
        method: &str,
        net_error: Error,
        mut info: ProxyInfo,
        callback: impl FnOnce(Result<ProxyInfo, Error>) + 'static,
    ) -> ResolveResult {
        if info.config_id() != self.config.as_ref().and_then(ProxyConfig::id) {
            tracing::debug!("proxy configuration changed since resolution, resolving again");
            self.proxy_retry_info.clear();
            return self.resolve_proxy(url, method, callback);
        }

        let Some(bad_proxy) = info.proxy_server().cloned() else {
            return ResolveResult::Ready(Err(Error::NoSupportedProxies));
        };
        let now = self.clock.now();
        let has_next =
            info.fallback_with_delay(Some(net_error), self.settings.proxy_retry_delay, now);
        let newly_bad: ProxyRetryInfoMap = info
            .proxy_retry_info()
            .get(&bad_proxy.to_uri())
            .map(|entry| (bad_proxy.to_uri(), entry.clone()))
            .into_iter()
            .collect();
        self.merge_retry_info(&newly_bad);

        if !has_next {
            tracing::debug!(bad_proxy = %bad_proxy, "no proxies left to fall back to");
            return ResolveResult::Ready(Err(Error::NoSupportedProxies));
        }
        tracing::debug!(bad_proxy = %bad_proxy, next = %info.proxy_list(), "falling back");
        ResolveResult::Ready(Ok(info))
    }

    /// `info` の先頭の候補と `additional_bad_proxies` を `retry_delay` の間使わない
    ///
    /// 記録後も使える候補が残っていれば true を返す。
    pub fn mark_proxies_as_bad_until(
        &mut self,
        info: &ProxyInfo,
        retry_delay: Duration,
        additional_bad_proxies: &[ProxyServer],
    ) -> bool {
        let now = self.clock.now();
        info.proxy_list().update_retry_info_on_fallback(
            &mut self.proxy_retry_info,
            retry_delay,
            false,
            additional_bad_proxies,
            None,
            now,
        );
        info.proxy_list().len() > additional_bad_proxies.len() + 1
    }

    /// `info` で接続に成功したことを伝える
    ///
    /// `info` のフォールバックで失敗したプロキシをサービスの記録に反映し、
    /// 成功したプロキシの記録は消す。
    pub fn report_success(&mut self, info: &ProxyInfo) {
        self.merge_retry_info(info.proxy_retry_info());
        if let Some(proxy) = info.proxy_server()
            && self.proxy_retry_info.remove(&proxy.to_uri()).is_some()
        {
            tracing::debug!(proxy = %proxy, "proxy is working again");
        }
    }

    /// 設定を取得し直して初めからやり直す
    pub fn force_reload_proxy_config(&mut self) {
        tracing::debug!("reloading proxy configuration");
        self.reset_proxy_config(false);
        self.apply_proxy_config_if_available();
    }

    /// 設定の取得元が新しい設定を得たことを伝える
    pub fn on_proxy_config_changed(&mut self, availability: ConfigAvailability) {
        let config = match availability {
            ConfigAvailability::Pending => return,
            ConfigAvailability::Valid(config) => config,
            ConfigAvailability::Unset => ProxyConfig::direct(),
        };
        tracing::debug!(
            auto_detect = config.auto_detect,
            pac_url = ?config.pac_url,
            source = config.source.as_str(),
            "proxy configuration changed"
        );
        self.fetched_config = Some(config);
        self.initialize_using_last_fetched_config();
    }

    /// IP アドレスが変わったことを伝える
    pub fn on_ip_address_changed(&mut self) {
        self.on_network_changed();
    }

    /// DNS 設定が変わったことを伝える
    pub fn on_dns_changed(&mut self) {
        self.on_network_changed();
    }

    /// 設定の取得元を差し替える
    pub fn reset_config_service(&mut self, config_service: Box<dyn ProxyConfigService>) {
        let previous = self.reset_proxy_config(true);
        self.config_service = config_service;
        if previous != ProxyServiceState::None {
            self.apply_proxy_config_if_available();
        }
    }

    /// PAC スクリプトの取得方法を差し替える
    pub fn set_pac_file_fetcher(&mut self, fetcher: Option<Box<dyn PacFileFetcher>>) {
        let previous = self.reset_proxy_config(false);
        self.pac_fetcher = fetcher;
        if previous != ProxyServiceState::None {
            self.apply_proxy_config_if_available();
        }
    }

    /// 保留していた PAC スクリプトの取得結果を渡す
    pub fn on_pac_fetch_complete(&mut self, job: JobId, result: Result<String, Error>) {
        if let Some(InitProxyResolver::Deciding(decider)) = self.init.as_mut()
            && decider.pending_fetch() == Some(job)
        {
            decider.on_fetch_complete(job, result);
            self.advance_init();
            return;
        }

        let now = self.clock.now();
        let change = match self.poller.as_mut() {
            Some(poller) if poller.pending_fetch() == Some(job) => poller.on_fetch_complete(
                job,
                result,
                &mut self.pac_fetcher,
                self.poll_policy.as_ref(),
                now,
            ),
            _ => {
                tracing::trace!(job = job.get(), "ignoring stale PAC fetch result");
                None
            }
        };
        if let Some(change) = change {
            self.initialize_using_decided_config(change);
        }
    }

    /// 保留していたリゾルバーの生成結果を渡す
    pub fn on_resolver_created(
        &mut self,
        job: JobId,
        result: Result<Box<dyn ProxyResolver>, Error>,
    ) {
        match self.init.take() {
            Some(InitProxyResolver::CreatingResolver {
                job: expected,
                decided,
            }) if expected == job => self.on_resolver_creation_done(result, decided),
            other => {
                tracing::trace!(job = job.get(), "ignoring stale resolver creation result");
                self.init = other;
            }
        }
    }

    /// 保留していたプロキシ解決の結果を渡す
    pub fn on_resolve_job_complete(&mut self, job: JobId, result: Result<ProxyList, Error>) {
        let Some(handle) = self
            .pending_requests
            .iter()
            .find(|(_, request)| request.job == Some(job))
            .map(|(handle, _)| *handle)
        else {
            tracing::trace!(job = job.get(), "ignoring stale resolve result");
            return;
        };
        self.complete_request(handle, result.map(proxy_list_into_info), true);
    }

    /// 次に `handle_timeout` を呼ぶべき時刻
    pub fn next_timeout(&self) -> Option<Instant> {
        let init_deadline = match &self.init {
            Some(InitProxyResolver::Deciding(decider)) => decider.wait_deadline(),
            _ => None,
        };
        let poll_deadline = self.poller.as_ref().and_then(PacPoller::next_timeout);
        match (init_deadline, poll_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// 期限が来た処理を進める
    pub fn handle_timeout(&mut self) {
        let now = self.clock.now();
        if let Some(InitProxyResolver::Deciding(decider)) = &self.init
            && decider.wait_deadline().is_some_and(|deadline| deadline <= now)
        {
            self.advance_init();
        }

        let change = match self.poller.as_mut() {
            Some(poller) => poller.on_timeout(&mut self.pac_fetcher, self.poll_policy.as_ref(), now),
            None => None,
        };
        if let Some(change) = change {
            self.initialize_using_decided_config(change);
        }
    }

    fn begin_resolve(&mut self, url: &str, method: &str) -> Begin {
        let url = match parse_request_url(url) {
            Ok(url) => url,
            Err(e) => return Begin::Done(Err(e)),
        };
        let start = self.clock.now();

        self.config_service.on_lazy_poll();
        self.poll_lazily();
        if self.state == ProxyServiceState::None {
            self.apply_proxy_config_if_available();
        }

        let url = url.sanitized(self.settings.sanitize_url_policy);
        match self.try_to_complete_synchronously(&url) {
            Some(result) => {
                let (config_id, config_source) = self.current_config_id();
                Begin::Done(self.finish_result(
                    &url,
                    method,
                    result,
                    config_id,
                    config_source,
                    start,
                    false,
                ))
            }
            None => Begin::Async(url),
        }
    }

    fn enqueue_request(&mut self, url: Uri, method: &str, callback: ResolveCallback) -> ResolveResult {
        let handle = RequestHandle(self.next_request_id);
        self.next_request_id += 1;
        self.pending_requests.insert(
            handle,
            PacRequest {
                url,
                method: method.to_string(),
                callback,
                job: None,
                config_id: None,
                config_source: ProxyConfigSource::Unknown,
                creation_time: self.clock.now(),
            },
        );

        if self.state == ProxyServiceState::Ready
            && let Some(result) = self.start_request(handle)
        {
            let Some(request) = self.pending_requests.remove(&handle) else {
                return ResolveResult::Ready(Err(Error::Unexpected(
                    "request disappeared while starting".to_string(),
                )));
            };
            return ResolveResult::Ready(self.query_did_complete(&request, result, true));
        }

        tracing::debug!(state = ?self.state, "proxy resolution pending");
        ResolveResult::Pending(handle)
    }

    /// リゾルバーに問い合わせる。同期的に完了したら結果を返す
    fn start_request(&mut self, handle: RequestHandle) -> Option<Result<ProxyInfo, Error>> {
        let (config_id, config_source) = self.current_config_id();
        let request = self.pending_requests.get_mut(&handle)?;
        request.config_id = config_id;
        request.config_source = config_source;

        let Some(resolver) = self.resolver.as_mut() else {
            return Some(Err(Error::Unexpected("no proxy resolver".to_string())));
        };
        let job = JobId::next();
        match resolver.get_proxy_for_url(job, &request.url, &request.method) {
            Completion::Ready(result) => Some(result.map(proxy_list_into_info)),
            Completion::Pending => {
                request.job = Some(job);
                None
            }
        }
    }

    fn start_and_complete_checking_for_synchronous(&mut self, handle: RequestHandle) {
        let Some(url) = self.pending_requests.get(&handle).map(|r| r.url.clone()) else {
            return;
        };
        let (result, used_resolver) = match self.try_to_complete_synchronously(&url) {
            Some(result) => (result, false),
            None => match self.start_request(handle) {
                Some(result) => (result, true),
                None => return,
            },
        };
        self.complete_request(handle, result, used_resolver);
    }

    fn complete_request(
        &mut self,
        handle: RequestHandle,
        result: Result<ProxyInfo, Error>,
        used_resolver: bool,
    ) {
        let Some(request) = self.pending_requests.remove(&handle) else {
            return;
        };
        let result = self.query_did_complete(&request, result, used_resolver);
        (request.callback)(result);
    }

    fn query_did_complete(
        &mut self,
        request: &PacRequest,
        result: Result<ProxyInfo, Error>,
        used_resolver: bool,
    ) -> Result<ProxyInfo, Error> {
        let (config_id, config_source) = match request.config_id {
            Some(id) => (Some(id), request.config_source),
            None => self.current_config_id(),
        };
        self.finish_result(
            &request.url,
            &request.method,
            result,
            config_id,
            config_source,
            request.creation_time,
            used_resolver,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_result(
        &mut self,
        url: &Uri,
        method: &str,
        result: Result<ProxyInfo, Error>,
        config_id: Option<ConfigId>,
        config_source: ProxyConfigSource,
        start: Instant,
        used_resolver: bool,
    ) -> Result<ProxyInfo, Error> {
        let result = self.did_finish_resolving_proxy(url, method, result);
        let end = self.clock.now();
        result.map(|mut info| {
            info.config_id = config_id;
            info.config_source = config_source;
            info.did_use_pac_script = used_resolver;
            info.proxy_resolve_start_time = Some(start);
            info.proxy_resolve_end_time = Some(end);
            info
        })
    }

    fn did_finish_resolving_proxy(
        &mut self,
        url: &Uri,
        method: &str,
        result: Result<ProxyInfo, Error>,
    ) -> Result<ProxyInfo, Error> {
        let error = match result {
            Ok(mut info) => {
                if let Some(delegate) = self.delegate.as_mut() {
                    delegate.on_resolve_proxy(url, method, &mut info);
                }
                if !self.proxy_retry_info.is_empty() {
                    info.deprioritize_bad_proxies(&self.proxy_retry_info, self.clock.now());
                }
                return Ok(info);
            }
            Err(error) => error,
        };

        let mandatory = self.config.as_ref().is_some_and(|c| c.pac_mandatory);
        let result = if mandatory {
            tracing::warn!(url = %url, error = %error, "mandatory proxy configuration failed");
            Err(Error::MandatoryProxyConfigurationFailed)
        } else {
            tracing::debug!(url = %url, error = %error, "proxy resolution failed, using direct");
            let mut info = ProxyInfo::new();
            info.use_direct();
            if let Some(delegate) = self.delegate.as_mut() {
                delegate.on_resolve_proxy(url, method, &mut info);
            }
            Ok(info)
        };

        if error == Error::PacScriptTerminated {
            tracing::info!("PAC script terminated, reinitializing");
            self.reset_proxy_config(false);
            if !self.pending_requests.is_empty() {
                self.apply_proxy_config_if_available();
            }
        }
        result
    }

    fn try_to_complete_synchronously(&self, url: &Uri) -> Option<Result<ProxyInfo, Error>> {
        if self.state != ProxyServiceState::Ready {
            return None;
        }
        if let Some(error) = &self.permanent_error {
            return Some(Err(error.clone()));
        }
        let config = self.config.as_ref()?;
        if config.has_automatic_settings() {
            return None;
        }
        let mut info = ProxyInfo::new();
        config.proxy_rules.apply(url, &mut info);
        Some(Ok(info))
    }

    fn current_config_id(&self) -> (Option<ConfigId>, ProxyConfigSource) {
        match &self.config {
            Some(config) => (config.id(), config.source),
            None => (None, ProxyConfigSource::Unknown),
        }
    }

    /// 他の記録を取り込む。新しく失敗と分かったプロキシはデリゲートに通知する
    fn merge_retry_info(&mut self, retry_info: &ProxyRetryInfoMap) {
        for (key, entry) in retry_info {
            match self.proxy_retry_info.get_mut(key) {
                Some(existing) => {
                    if existing.bad_until < entry.bad_until {
                        existing.bad_until = entry.bad_until;
                    }
                }
                None => {
                    self.proxy_retry_info.insert(key.clone(), entry.clone());
                    if let (Some(delegate), Some(bad_proxy)) = (
                        self.delegate.as_mut(),
                        ProxyServer::from_uri(key, ProxyScheme::Http),
                    ) {
                        delegate.on_fallback(&bad_proxy, entry.net_error.as_ref());
                    }
                }
            }
        }
    }

    fn apply_proxy_config_if_available(&mut self) {
        self.config_service.on_lazy_poll();
        if self.fetched_config.is_some() {
            self.initialize_using_last_fetched_config();
            return;
        }

        self.state = ProxyServiceState::WaitingForProxyConfig;
        match self.config_service.latest_proxy_config() {
            ConfigAvailability::Pending => tracing::debug!("waiting for proxy configuration"),
            availability => self.on_proxy_config_changed(availability),
        }
    }

    fn initialize_using_last_fetched_config(&mut self) {
        self.reset_proxy_config(false);

        let id = ConfigId::new(self.next_config_id);
        self.next_config_id += 1;
        let Some(fetched) = self.fetched_config.as_mut() else {
            return;
        };
        fetched.set_id(id);
        let fetched = fetched.clone();

        if !fetched.has_automatic_settings() {
            self.config = Some(fetched);
            self.set_ready();
            return;
        }

        self.state = ProxyServiceState::WaitingForInitProxyResolver;
        let now = self.clock.now();
        let wait_until = self.stall_autoconfig_until.filter(|until| *until > now);
        tracing::debug!(wait_until = ?wait_until, "deciding PAC script");
        let decider = PacFileDecider::new(
            &fetched,
            self.resolver_factory.expects_pac_bytes(),
            wait_until,
        );
        self.init = Some(InitProxyResolver::Deciding(decider));
        self.advance_init();
    }

    /// 定期取得で変わった PAC で初期化し直す
    fn initialize_using_decided_config(&mut self, decided: PollChange) {
        self.reset_proxy_config(false);
        self.state = ProxyServiceState::WaitingForInitProxyResolver;
        match decided {
            Ok(decided) => self.create_resolver(decided),
            Err(error) => self.on_init_proxy_resolver_complete(Err(error), None),
        }
    }

    fn advance_init(&mut self) {
        let now = self.clock.now();
        let result = match self.init.as_mut() {
            Some(InitProxyResolver::Deciding(decider)) => {
                match decider.run(&mut self.pac_fetcher, now) {
                    Some(result) => result,
                    None => return,
                }
            }
            _ => return,
        };
        match result {
            Ok(decided) => self.create_resolver(decided),
            Err(error) => self.on_init_proxy_resolver_complete(Err(error), None),
        }
    }

    fn create_resolver(&mut self, decided: DecidedPac) {
        let job = JobId::next();
        match self
            .resolver_factory
            .create_proxy_resolver(job, &decided.script_data)
        {
            Completion::Ready(result) => self.on_resolver_creation_done(result, decided),
            Completion::Pending => {
                self.init = Some(InitProxyResolver::CreatingResolver { job, decided });
            }
        }
    }

    fn on_resolver_creation_done(
        &mut self,
        result: Result<Box<dyn ProxyResolver>, Error>,
        decided: DecidedPac,
    ) {
        let result = result.map(|resolver| {
            self.resolver = Some(resolver);
        });
        self.on_init_proxy_resolver_complete(result, Some(decided));
    }

    fn on_init_proxy_resolver_complete(
        &mut self,
        result: Result<(), Error>,
        decided: Option<DecidedPac>,
    ) {
        self.init = None;
        let Some(fetched) = self.fetched_config.clone() else {
            return;
        };
        let (effective_config, script_data) = match decided {
            Some(decided) => (Some(decided.effective_config), Some(decided.script_data)),
            None => (None, None),
        };

        let now = self.clock.now();
        self.poller = Some(PacPoller::new(
            fetched.clone(),
            self.resolver_factory.expects_pac_bytes(),
            result.as_ref().err().cloned(),
            script_data,
            self.poll_policy.as_ref(),
            now,
        ));

        let mut config = match result {
            Ok(()) => {
                self.permanent_error = None;
                effective_config.unwrap_or_else(|| fetched.clone())
            }
            Err(error) if fetched.pac_mandatory => {
                tracing::warn!(error = %error, "failed to initialize mandatory PAC script");
                self.permanent_error = Some(Error::MandatoryProxyConfigurationFailed);
                fetched.clone()
            }
            Err(error) => {
                tracing::info!(error = %error, "PAC script unavailable, using manual rules");
                self.permanent_error = None;
                let mut config = fetched.clone();
                config.clear_automatic_settings();
                config
            }
        };
        if let Some(id) = fetched.id() {
            config.set_id(id);
        }
        config.source = fetched.source;
        self.config = Some(config);
        self.set_ready();
    }

    fn set_ready(&mut self) {
        self.state = ProxyServiceState::Ready;
        let handles: Vec<RequestHandle> = self
            .pending_requests
            .iter()
            .filter(|(_, request)| request.job.is_none())
            .map(|(handle, _)| *handle)
            .collect();
        tracing::debug!(pending = handles.len(), "proxy service is ready");

        for handle in handles {
            // コールバック中の PAC 終了で初期化し直した場合はそちらに任せる
            if self.state != ProxyServiceState::Ready {
                break;
            }
            if self
                .pending_requests
                .get(&handle)
                .is_some_and(|request| request.job.is_none())
            {
                self.start_and_complete_checking_for_synchronous(handle);
            }
        }
    }

    fn on_network_changed(&mut self) {
        let now = self.clock.now();
        self.stall_autoconfig_until = Some(now + self.settings.stall_after_network_change);
        tracing::debug!("network changed, redeciding proxy configuration");
        let previous = self.reset_proxy_config(false);
        if previous != ProxyServiceState::None {
            self.apply_proxy_config_if_available();
        }
    }

    fn poll_lazily(&mut self) {
        let now = self.clock.now();
        let change = match self.poller.as_mut() {
            Some(poller) => {
                poller.on_lazy_poll(&mut self.pac_fetcher, self.poll_policy.as_ref(), now)
            }
            None => None,
        };
        if let Some(change) = change {
            self.initialize_using_decided_config(change);
        }
    }

    /// 初期化の途中経過と使用中の設定を捨てて `None` に戻る。直前の状態を返す
    ///
    /// 開始済みのリクエストはリゾルバーのジョブを取り消して未開始に戻す。
    fn reset_proxy_config(&mut self, reset_fetched_config: bool) -> ProxyServiceState {
        let previous = self.state;
        self.permanent_error = None;
        self.proxy_retry_info.clear();
        if let Some(mut poller) = self.poller.take() {
            poller.cancel(&mut self.pac_fetcher);
        }
        if let Some(init) = self.init.take() {
            self.cancel_init(init);
        }
        self.suspend_all_pending_requests();
        self.resolver = None;
        self.config = None;
        if reset_fetched_config {
            self.fetched_config = None;
        }
        self.state = ProxyServiceState::None;
        previous
    }

    fn cancel_init(&mut self, init: InitProxyResolver) {
        match init {
            InitProxyResolver::Deciding(mut decider) => decider.cancel(&mut self.pac_fetcher),
            InitProxyResolver::CreatingResolver { job, .. } => self.resolver_factory.cancel(job),
        }
    }

    fn suspend_all_pending_requests(&mut self) {
        for request in self.pending_requests.values_mut() {
            if let Some(job) = request.job.take()
                && let Some(resolver) = self.resolver.as_mut()
            {
                resolver.cancel(job);
            }
        }
    }
}

impl Drop for ProxyService {
    fn drop(&mut self) {
        if let Some(resolver) = self.resolver.as_mut() {
            for job in self.pending_requests.values().filter_map(|r| r.job) {
                resolver.cancel(job);
            }
        }
        if let Some(init) = self.init.take() {
            self.cancel_init(init);
        }
        if let Some(mut poller) = self.poller.take() {
            poller.cancel(&mut self.pac_fetcher);
        }
    }
}

impl fmt::Debug for ProxyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyService")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("pending_requests", &self.pending_requests.len())
            .field("proxy_retry_info", &self.proxy_retry_info)
            .finish_non_exhaustive()
    }
}

fn parse_request_url(url: &str) -> Result<Uri, Error> {
    let uri = Uri::parse(url)?;
    if !uri.is_absolute() || uri.host().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(uri)
}

fn proxy_list_into_info(list: ProxyList) -> ProxyInfo {
    let mut info = ProxyInfo::new();
    info.use_proxy_list(list);
    info
}
