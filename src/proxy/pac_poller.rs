//! PAC スクリプトの変更の監視
//!
//! 初期化が終わった後も定期的に PAC スクリプトを取得し直し、
//! 内容や取得結果が変わっていたら変更として通知する。
//! 間隔と方式は `PacPollPolicy` が決める。

use std::time::{Duration, Instant};

use crate::Error;
use crate::proxy::pac_file_decider::{DecidedPac, PacFileDecider};
use crate::proxy::pac_file_fetcher::PacFileFetcher;
use crate::proxy::poll_policy::{PacPollPolicy, PollMode};
use crate::proxy::proxy_config::ProxyConfig;
use crate::proxy::proxy_resolver::{JobId, PacFileData};

/// 監視で検出した変更。新しい決定結果を持つ
pub(crate) type PollChange = Result<DecidedPac, Error>;

#[derive(Debug)]
pub(crate) struct PacPoller {
    config: ProxyConfig,
    expects_pac_bytes: bool,
    last_error: Option<Error>,
    last_script_data: Option<PacFileData>,
    mode: PollMode,
    delay: Duration,
    last_poll: Instant,
    timer_deadline: Option<Instant>,
    decider: Option<PacFileDecider>,
}

impl PacPoller {
    /// 初期化の結果を基準に監視を始める
    pub(crate) fn new(
        config: ProxyConfig,
        expects_pac_bytes: bool,
        init_error: Option<Error>,
        init_script_data: Option<PacFileData>,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Self {
        let (mode, delay) = policy.next_delay(init_error.as_ref(), None);
        let mut poller = Self {
            config,
            expects_pac_bytes,
            last_error: init_error,
            last_script_data: init_script_data,
            mode,
            delay,
            last_poll: now,
            timer_deadline: None,
            decider: None,
        };
        poller.schedule(now);
        poller
    }

    /// タイマーの期限
    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        self.timer_deadline
    }

    /// 監視のための取得を待っている場合はその ID
    pub(crate) fn pending_fetch(&self) -> Option<JobId> {
        self.decider.as_ref().and_then(PacFileDecider::pending_fetch)
    }

    /// 利用があったことを伝える
    ///
    /// 活動契機の方式で、前回から間隔以上経っていれば取得し直す。
    pub(crate) fn on_lazy_poll(
        &mut self,
        fetcher: &mut Option<Box<dyn PacFileFetcher>>,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Option<PollChange> {
        if self.mode != PollMode::StartAfterActivity || self.decider.is_some() {
            return None;
        }
        if now.saturating_duration_since(self.last_poll) < self.delay {
            return None;
        }
        self.poll(fetcher, policy, now)
    }

    /// タイマーの期限を処理する
    pub(crate) fn on_timeout(
        &mut self,
        fetcher: &mut Option<Box<dyn PacFileFetcher>>,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Option<PollChange> {
        match self.timer_deadline {
            Some(deadline) if deadline <= now => {
                self.timer_deadline = None;
                self.poll(fetcher, policy, now)
            }
            _ => None,
        }
    }

    /// 取得結果を渡す
    pub(crate) fn on_fetch_complete(
        &mut self,
        job: JobId,
        result: Result<String, Error>,
        fetcher: &mut Option<Box<dyn PacFileFetcher>>,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Option<PollChange> {
        let decider = self.decider.as_mut()?;
        if !decider.on_fetch_complete(job, result) {
            return None;
        }
        let result = decider.run(fetcher, now)?;
        self.on_decided(result, policy, now)
    }

    /// 保留中の取得を取り消す
    pub(crate) fn cancel(&mut self, fetcher: &mut Option<Box<dyn PacFileFetcher>>) {
        if let Some(mut decider) = self.decider.take() {
            decider.cancel(fetcher);
        }
        self.timer_deadline = None;
    }

    fn poll(
        &mut self,
        fetcher: &mut Option<Box<dyn PacFileFetcher>>,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Option<PollChange> {
        tracing::debug!(delay = ?self.delay, "polling PAC script for changes");
        self.last_poll = now;
        let decider = self
            .decider
            .insert(PacFileDecider::new(&self.config, self.expects_pac_bytes, None));
        let result = decider.run(fetcher, now)?;
        self.on_decided(result, policy, now)
    }

    fn on_decided(
        &mut self,
        result: PollChange,
        policy: &dyn PacPollPolicy,
        now: Instant,
    ) -> Option<PollChange> {
        self.decider = None;
        if self.has_changed(&result) {
            tracing::info!("PAC script changed");
            return Some(result);
        }
        let (mode, delay) = policy.next_delay(self.last_error.as_ref(), Some(self.delay));
        self.mode = mode;
        self.delay = delay;
        self.schedule(now);
        None
    }

    fn has_changed(&self, result: &PollChange) -> bool {
        match (result, &self.last_error) {
            (Err(e), Some(last)) => e != last,
            (Err(_), None) | (Ok(_), Some(_)) => true,
            (Ok(decided), None) => self.last_script_data.as_ref() != Some(&decided.script_data),
        }
    }

    fn schedule(&mut self, now: Instant) {
        self.timer_deadline = match self.mode {
            PollMode::UseTimer => Some(now + self.delay),
            PollMode::StartAfterActivity => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::pac_file_fetcher::StaticPacFileFetcher;
    use crate::proxy::poll_policy::{
        DefaultPollPolicy, POLL_DELAY_AFTER_ERROR_1, POLL_DELAY_AFTER_ERROR_2,
        POLL_DELAY_AFTER_SUCCESS,
    };

    const PAC_URL: &str = "http://example.test/proxy.pac";
    const SCRIPT_1: &str = "function FindProxyForURL(u, h) { return 'PROXY a:80'; }";
    const SCRIPT_2: &str = "function FindProxyForURL(u, h) { return 'PROXY b:80'; }";

    struct ActivityPolicy;

    impl PacPollPolicy for ActivityPolicy {
        fn next_delay(&self, _: Option<&Error>, _: Option<Duration>) -> (PollMode, Duration) {
            (PollMode::StartAfterActivity, Duration::from_secs(60))
        }
    }

    fn script(text: &str) -> PacFileData {
        PacFileData::Script {
            url: PAC_URL.to_string(),
            text: text.to_string(),
        }
    }

    fn fetcher_with(text: &str) -> Option<Box<dyn PacFileFetcher>> {
        let mut fetcher = StaticPacFileFetcher::new();
        fetcher.insert(PAC_URL, text);
        Some(Box::new(fetcher))
    }

    fn poller(init_error: Option<Error>, now: Instant, policy: &dyn PacPollPolicy) -> PacPoller {
        let init_script = init_error.is_none().then(|| script(SCRIPT_1));
        PacPoller::new(
            ProxyConfig::from_pac_url(PAC_URL),
            true,
            init_error,
            init_script,
            policy,
            now,
        )
    }

    #[test]
    fn unchanged_script_reschedules() {
        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(None, now, &policy);
        assert_eq!(poller.next_timeout(), Some(now + POLL_DELAY_AFTER_SUCCESS));

        let mut fetcher = fetcher_with(SCRIPT_1);
        let later = now + POLL_DELAY_AFTER_SUCCESS;
        assert!(poller.on_timeout(&mut fetcher, &policy, later).is_none());
        assert_eq!(poller.next_timeout(), Some(later + POLL_DELAY_AFTER_SUCCESS));
    }

    #[test]
    fn changed_script_is_reported() {
        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(None, now, &policy);
        let mut fetcher = fetcher_with(SCRIPT_2);
        let change = poller
            .on_timeout(&mut fetcher, &policy, now + POLL_DELAY_AFTER_SUCCESS)
            .expect("change");
        assert_eq!(change.unwrap().script_data, script(SCRIPT_2));
    }

    #[test]
    fn timer_before_deadline_does_nothing() {
        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(None, now, &policy);
        let mut fetcher = fetcher_with(SCRIPT_2);
        assert!(poller.on_timeout(&mut fetcher, &policy, now).is_none());
        assert_eq!(poller.next_timeout(), Some(now + POLL_DELAY_AFTER_SUCCESS));
    }

    #[test]
    fn same_error_backs_off() {
        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(Some(Error::NameNotResolved), now, &policy);
        assert_eq!(poller.next_timeout(), Some(now + POLL_DELAY_AFTER_ERROR_1));

        let mut fetcher: Option<Box<dyn PacFileFetcher>> = {
            let mut f = StaticPacFileFetcher::new();
            f.insert_error(PAC_URL, Error::NameNotResolved);
            Some(Box::new(f))
        };
        let t1 = now + POLL_DELAY_AFTER_ERROR_1;
        assert!(poller.on_timeout(&mut fetcher, &policy, t1).is_none());
        assert_eq!(poller.next_timeout(), Some(t1 + POLL_DELAY_AFTER_ERROR_2));
    }

    #[test]
    fn recovery_from_error_is_a_change() {
        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(Some(Error::NameNotResolved), now, &policy);
        let mut fetcher = fetcher_with(SCRIPT_1);
        let change = poller.on_timeout(&mut fetcher, &policy, now + POLL_DELAY_AFTER_ERROR_1);
        assert!(matches!(change, Some(Ok(_))));
    }

    #[test]
    fn activity_mode_polls_on_use() {
        let now = Instant::now();
        let policy = ActivityPolicy;
        let mut poller = poller(None, now, &policy);
        assert_eq!(poller.next_timeout(), None);

        let mut fetcher = fetcher_with(SCRIPT_2);
        assert!(
            poller
                .on_lazy_poll(&mut fetcher, &policy, now + Duration::from_secs(30))
                .is_none()
        );
        assert!(
            poller
                .on_lazy_poll(&mut fetcher, &policy, now + Duration::from_secs(60))
                .is_some()
        );
    }

    #[test]
    fn pending_fetch_completes_later() {
        struct PendingFetcher;
        impl PacFileFetcher for PendingFetcher {
            fn fetch(&mut self, _job: JobId, _url: &str) -> crate::proxy::Completion<String> {
                crate::proxy::Completion::Pending
            }
        }

        let now = Instant::now();
        let policy = DefaultPollPolicy;
        let mut poller = poller(None, now, &policy);
        let mut fetcher: Option<Box<dyn PacFileFetcher>> = Some(Box::new(PendingFetcher));
        let later = now + POLL_DELAY_AFTER_SUCCESS;
        assert!(poller.on_timeout(&mut fetcher, &policy, later).is_none());
        let job = poller.pending_fetch().expect("fetch in flight");

        let change =
            poller.on_fetch_complete(job, Ok(SCRIPT_2.to_string()), &mut fetcher, &policy, later);
        assert!(matches!(change, Some(Ok(_))));
    }
}
