//! PAC スクリプトの取得

use std::collections::HashMap;

use crate::Error;
use crate::proxy::proxy_resolver::{Completion, JobId};

/// PAC スクリプトを URL から取得する
///
/// 保留にした場合は `ProxyService::on_pac_fetch_complete` で結果を渡す。
pub trait PacFileFetcher {
    fn fetch(&mut self, job: JobId, url: &str) -> Completion<String>;

    fn cancel(&mut self, _job: JobId) {}
}

/// あらかじめ登録した内容を返す
///
/// 登録のない URL は `PacFetchFailed` になる。
#[derive(Debug, Clone, Default)]
pub struct StaticPacFileFetcher {
    scripts: HashMap<String, Result<String, Error>>,
}

impl StaticPacFileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL に対するスクリプトを登録する
    pub fn insert(&mut self, url: &str, script: &str) {
        self.scripts.insert(url.to_string(), Ok(script.to_string()));
    }

    /// URL に対するエラーを登録する
    pub fn insert_error(&mut self, url: &str, error: Error) {
        self.scripts.insert(url.to_string(), Err(error));
    }
}

impl PacFileFetcher for StaticPacFileFetcher {
    fn fetch(&mut self, _job: JobId, url: &str) -> Completion<String> {
        let result = self
            .scripts
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(Error::PacFetchFailed(format!("no PAC file at {}", url))));
        Completion::Ready(result)
    }
}
