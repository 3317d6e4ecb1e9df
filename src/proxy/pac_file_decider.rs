//! 使用する PAC スクリプトの決定
//!
//! 自動検出 (WPAD) と PAC URL の順に候補を試し、最初に使えたものを採用する。
//! リゾルバーが PAC スクリプト本文を必要とする場合は取得して検証し、
//! 失敗したら次の候補へ進む。
//!
//! 取得そのものは行わず、`DeciderStep::Fetch` で取得を依頼する。
//! 結果は `PacFileDecider::on_fetch_complete` で渡す。

use std::time::Instant;

use crate::Error;
use crate::proxy::pac_file_fetcher::PacFileFetcher;
use crate::proxy::proxy_config::ProxyConfig;
use crate::proxy::proxy_resolver::{Completion, JobId, PacFileData};

/// 自動検出で取得する PAC スクリプトの URL
pub const WPAD_URL: &str = "http://wpad/wpad.dat";

/// 取得した PAC スクリプトが含むべき関数名
const PAC_ENTRY_POINT: &str = "FindProxyForURL";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PacSource {
    Wpad,
    Custom(String),
}

impl PacSource {
    fn url(&self) -> &str {
        match self {
            PacSource::Wpad => WPAD_URL,
            PacSource::Custom(url) => url,
        }
    }
}

/// 決定した PAC と、それに対応する設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecidedPac {
    /// リゾルバーに渡す PAC の情報
    pub script_data: PacFileData,
    /// 採用した自動設定だけを残した設定
    pub effective_config: ProxyConfig,
}

/// 決定処理の次の手順
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeciderStep {
    /// 指定時刻まで待つ
    Wait(Instant),
    /// PAC スクリプトを取得して `on_fetch_complete` で結果を渡す
    Fetch { job: JobId, url: String },
    /// 取得の完了待ち
    AwaitingFetch(JobId),
    /// 決定した
    Complete(Result<DecidedPac, Error>),
}

#[derive(Debug)]
enum DeciderState {
    Wait(Instant),
    TrySource,
    Fetching(JobId),
    Done(Result<DecidedPac, Error>),
}

/// 使用する PAC スクリプトを決める
#[derive(Debug)]
pub struct PacFileDecider {
    sources: Vec<PacSource>,
    current: usize,
    expects_pac_bytes: bool,
    pac_mandatory: bool,
    last_error: Option<Error>,
    state: DeciderState,
}

impl PacFileDecider {
    /// 設定の自動設定から候補を作る
    ///
    /// `wait_until` を指定すると、その時刻まで取得を始めない。
    pub fn new(config: &ProxyConfig, expects_pac_bytes: bool, wait_until: Option<Instant>) -> Self {
        let mut sources = Vec::new();
        if config.auto_detect {
            sources.push(PacSource::Wpad);
        }
        if let Some(url) = &config.pac_url {
            sources.push(PacSource::Custom(url.clone()));
        }
        Self {
            sources,
            current: 0,
            expects_pac_bytes,
            pac_mandatory: config.pac_mandatory,
            last_error: None,
            state: match wait_until {
                Some(until) => DeciderState::Wait(until),
                None => DeciderState::TrySource,
            },
        }
    }

    /// 処理を進めて次の手順を返す
    pub fn step(&mut self, now: Instant) -> DeciderStep {
        loop {
            match &self.state {
                DeciderState::Wait(until) if now < *until => return DeciderStep::Wait(*until),
                DeciderState::Wait(_) => self.state = DeciderState::TrySource,
                DeciderState::TrySource => {
                    let Some(source) = self.sources.get(self.current).cloned() else {
                        let error = self.last_error.take().unwrap_or(Error::Failed);
                        self.state = DeciderState::Done(Err(error));
                        continue;
                    };
                    if !self.expects_pac_bytes {
                        // リゾルバーが自分で取得する
                        let script_data = match source {
                            PacSource::Wpad => PacFileData::AutoDetect,
                            PacSource::Custom(url) => PacFileData::Url(url),
                        };
                        self.complete_with(script_data);
                        continue;
                    }
                    let job = JobId::next();
                    tracing::debug!(url = source.url(), "fetching PAC file");
                    self.state = DeciderState::Fetching(job);
                    return DeciderStep::Fetch {
                        job,
                        url: source.url().to_string(),
                    };
                }
                DeciderState::Fetching(job) => return DeciderStep::AwaitingFetch(*job),
                DeciderState::Done(result) => return DeciderStep::Complete(result.clone()),
            }
        }
    }

    /// 取得結果を渡す。待っている取得でなければ false を返す
    pub fn on_fetch_complete(&mut self, job: JobId, result: Result<String, Error>) -> bool {
        if self.pending_fetch() != Some(job) {
            return false;
        }
        let Some(source) = self.sources.get(self.current).cloned() else {
            return false;
        };
        match result {
            Ok(text) if text.contains(PAC_ENTRY_POINT) => {
                self.complete_with(PacFileData::Script {
                    url: source.url().to_string(),
                    text,
                });
            }
            Ok(_) => self.try_next_source(source, Error::PacScriptFailed),
            Err(e) => self.try_next_source(source, e),
        }
        true
    }

    /// 取得の完了を待っている場合はその ID
    pub fn pending_fetch(&self) -> Option<JobId> {
        match self.state {
            DeciderState::Fetching(job) => Some(job),
            _ => None,
        }
    }

    /// 待ち時間の期限
    pub fn wait_deadline(&self) -> Option<Instant> {
        match self.state {
            DeciderState::Wait(until) => Some(until),
            _ => None,
        }
    }

    /// 取得を使って決定を進める
    ///
    /// 取得が同期的に完了する間は続けて処理し、決定したら結果を返す。
    pub fn run(
        &mut self,
        fetcher: &mut Option<Box<dyn PacFileFetcher>>,
        now: Instant,
    ) -> Option<Result<DecidedPac, Error>> {
        loop {
            match self.step(now) {
                DeciderStep::Wait(_) | DeciderStep::AwaitingFetch(_) => return None,
                DeciderStep::Complete(result) => return Some(result),
                DeciderStep::Fetch { job, url } => {
                    let completion = match fetcher {
                        Some(fetcher) => fetcher.fetch(job, &url),
                        None => Completion::Ready(Err(Error::PacFetchFailed(
                            "no PAC file fetcher is configured".to_string(),
                        ))),
                    };
                    match completion {
                        Completion::Ready(result) => {
                            self.on_fetch_complete(job, result);
                        }
                        Completion::Pending => return None,
                    }
                }
            }
        }
    }

    /// 保留中の取得を取り消す
    pub fn cancel(&mut self, fetcher: &mut Option<Box<dyn PacFileFetcher>>) {
        if let (Some(job), Some(fetcher)) = (self.pending_fetch(), fetcher.as_mut()) {
            fetcher.cancel(job);
        }
        self.state = DeciderState::Done(Err(Error::Failed));
    }

    fn try_next_source(&mut self, source: PacSource, error: Error) {
        tracing::debug!(url = source.url(), error = %error, "PAC source failed, trying next");
        self.last_error = Some(error);
        self.current += 1;
        self.state = DeciderState::TrySource;
    }

    fn complete_with(&mut self, script_data: PacFileData) {
        let mut effective_config = match self.sources.get(self.current) {
            Some(PacSource::Custom(url)) => ProxyConfig::from_pac_url(url),
            _ => ProxyConfig::auto_detect(),
        };
        effective_config.pac_mandatory = self.pac_mandatory;
        self.state = DeciderState::Done(Ok(DecidedPac {
            script_data,
            effective_config,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SCRIPT: &str = "function FindProxyForURL(url, host) { return 'DIRECT'; }";

    fn auto_and_custom() -> ProxyConfig {
        let mut config = ProxyConfig::auto_detect();
        config.pac_url = Some("http://custom/proxy.pac".to_string());
        config
    }

    fn expect_fetch(decider: &mut PacFileDecider, now: Instant) -> (JobId, String) {
        match decider.step(now) {
            DeciderStep::Fetch { job, url } => (job, url),
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn wpad_first() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&auto_and_custom(), true, None);
        let (job, url) = expect_fetch(&mut decider, now);
        assert_eq!(url, WPAD_URL);
        assert_eq!(decider.step(now), DeciderStep::AwaitingFetch(job));

        assert!(decider.on_fetch_complete(job, Ok(SCRIPT.to_string())));
        let DeciderStep::Complete(Ok(decided)) = decider.step(now) else {
            panic!("expected completion");
        };
        assert_eq!(
            decided.script_data,
            PacFileData::Script {
                url: WPAD_URL.to_string(),
                text: SCRIPT.to_string()
            }
        );
        assert!(decided.effective_config.auto_detect);
        assert_eq!(decided.effective_config.pac_url, None);
    }

    #[test]
    fn falls_back_to_custom_url() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&auto_and_custom(), true, None);
        let (job, _) = expect_fetch(&mut decider, now);
        decider.on_fetch_complete(job, Err(Error::NameNotResolved));

        let (job, url) = expect_fetch(&mut decider, now);
        assert_eq!(url, "http://custom/proxy.pac");
        decider.on_fetch_complete(job, Ok(SCRIPT.to_string()));

        let DeciderStep::Complete(Ok(decided)) = decider.step(now) else {
            panic!("expected completion");
        };
        assert!(!decided.effective_config.auto_detect);
        assert_eq!(
            decided.effective_config.pac_url.as_deref(),
            Some("http://custom/proxy.pac")
        );
    }

    #[test]
    fn invalid_script_is_rejected() {
        let now = Instant::now();
        let config = ProxyConfig::from_pac_url("http://custom/proxy.pac").with_pac_mandatory(true);
        let mut decider = PacFileDecider::new(&config, true, None);
        let (job, _) = expect_fetch(&mut decider, now);
        decider.on_fetch_complete(job, Ok("<html>not a pac file</html>".to_string()));
        assert_eq!(
            decider.step(now),
            DeciderStep::Complete(Err(Error::PacScriptFailed))
        );
    }

    #[test]
    fn last_error_is_reported() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&auto_and_custom(), true, None);
        let (job, _) = expect_fetch(&mut decider, now);
        decider.on_fetch_complete(job, Ok(String::new()));
        let (job, _) = expect_fetch(&mut decider, now);
        decider.on_fetch_complete(job, Err(Error::NameNotResolved));
        assert_eq!(
            decider.step(now),
            DeciderStep::Complete(Err(Error::NameNotResolved))
        );
    }

    #[test]
    fn stale_fetch_result_is_ignored() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&auto_and_custom(), true, None);
        let (job, _) = expect_fetch(&mut decider, now);
        assert!(!decider.on_fetch_complete(JobId::next(), Ok(SCRIPT.to_string())));
        assert_eq!(decider.pending_fetch(), Some(job));
    }

    #[test]
    fn resolver_without_pac_bytes_skips_fetch() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&auto_and_custom(), false, None);
        let DeciderStep::Complete(Ok(decided)) = decider.step(now) else {
            panic!("expected completion");
        };
        assert_eq!(decided.script_data, PacFileData::AutoDetect);

        let config = ProxyConfig::from_pac_url("http://custom/proxy.pac");
        let mut decider = PacFileDecider::new(&config, false, None);
        let DeciderStep::Complete(Ok(decided)) = decider.step(now) else {
            panic!("expected completion");
        };
        assert_eq!(
            decided.script_data,
            PacFileData::Url("http://custom/proxy.pac".to_string())
        );
    }

    #[test]
    fn waits_before_fetching() {
        let now = Instant::now();
        let until = now + Duration::from_secs(2);
        let mut decider = PacFileDecider::new(&ProxyConfig::auto_detect(), true, Some(until));
        assert_eq!(decider.step(now), DeciderStep::Wait(until));
        assert_eq!(decider.wait_deadline(), Some(until));
        assert!(matches!(decider.step(until), DeciderStep::Fetch { .. }));
    }

    #[test]
    fn run_without_fetcher_fails() {
        let now = Instant::now();
        let mut decider = PacFileDecider::new(&ProxyConfig::auto_detect(), true, None);
        let mut fetcher = None;
        assert!(matches!(
            decider.run(&mut fetcher, now),
            Some(Err(Error::PacFetchFailed(_)))
        ));
    }
}
