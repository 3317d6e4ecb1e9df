//! PAC スクリプトを評価するリゾルバーとその生成
//!
//! リゾルバーは外部の協力者で、非同期に動作してよい。呼び出しは `JobId` で
//! 識別し、保留 (`Completion::Pending`) にした場合は完了時に所有者が
//! `ProxyService::on_resolve_job_complete` / `ProxyService::on_resolver_created` で結果を渡す。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::Error;
use crate::proxy::proxy_list::ProxyList;
use crate::uri::Uri;

/// 非同期呼び出しの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    /// プロセス内で一意な ID を払い出す
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// 外部の協力者の呼び出し結果
#[derive(Debug, PartialEq, Eq)]
pub enum Completion<T> {
    /// 同期的に完了した
    Ready(Result<T, Error>),
    /// 保留中。結果は後で通知される
    Pending,
}

impl<T> Completion<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending)
    }
}

/// リゾルバーに渡す PAC の情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacFileData {
    /// 自動検出 (リゾルバー自身が WPAD を行う)
    AutoDetect,
    /// PAC スクリプトの URL (リゾルバー自身が取得する)
    Url(String),
    /// 取得済みの PAC スクリプト
    Script { url: String, text: String },
}

impl PacFileData {
    pub fn url(&self) -> Option<&str> {
        match self {
            PacFileData::AutoDetect => None,
            PacFileData::Url(url) | PacFileData::Script { url, .. } => Some(url),
        }
    }
}

/// PAC スクリプトを評価して URL ごとの候補を返す
pub trait ProxyResolver {
    /// `url` に使うプロキシ候補を求める
    fn get_proxy_for_url(&mut self, job: JobId, url: &Uri, method: &str) -> Completion<ProxyList>;

    /// 保留中の呼び出しを取り消す。以降その `job` の結果は通知しない
    fn cancel(&mut self, _job: JobId) {}
}

/// PAC の情報からリゾルバーを作る
pub trait ProxyResolverFactory {
    /// 取得済みの PAC スクリプト本文を必要とするか
    ///
    /// false の場合、PAC の取得はリゾルバー側で行い、サービスは URL だけを渡す。
    fn expects_pac_bytes(&self) -> bool;

    fn create_proxy_resolver(
        &mut self,
        job: JobId,
        pac: &PacFileData,
    ) -> Completion<Box<dyn ProxyResolver>>;

    fn cancel(&mut self, _job: JobId) {}
}

/// 常に `NotImplemented` を返すリゾルバー
#[derive(Debug, Default)]
pub struct NullProxyResolver;

impl ProxyResolver for NullProxyResolver {
    fn get_proxy_for_url(&mut self, _job: JobId, _url: &Uri, _method: &str) -> Completion<ProxyList> {
        Completion::Ready(Err(Error::NotImplemented))
    }
}

/// `NullProxyResolver` を作るファクトリー
///
/// PAC を評価できない環境で使う。自動設定は解決時に失敗し、
/// 必須でなければ直接接続になる。
#[derive(Debug, Default)]
pub struct NullProxyResolverFactory;

impl ProxyResolverFactory for NullProxyResolverFactory {
    fn expects_pac_bytes(&self) -> bool {
        false
    }

    fn create_proxy_resolver(
        &mut self,
        _job: JobId,
        _pac: &PacFileData,
    ) -> Completion<Box<dyn ProxyResolver>> {
        Completion::Ready(Ok(Box::new(NullProxyResolver)))
    }
}

/// すべての URL に同じ PAC の戻り値を返すリゾルバー
#[derive(Debug, Clone)]
pub struct PacResultProxyResolver {
    pac_string: String,
}

impl PacResultProxyResolver {
    pub fn new(pac_string: &str) -> Self {
        Self {
            pac_string: pac_string.to_string(),
        }
    }
}

impl ProxyResolver for PacResultProxyResolver {
    fn get_proxy_for_url(&mut self, _job: JobId, _url: &Uri, _method: &str) -> Completion<ProxyList> {
        let mut list = ProxyList::new();
        list.set_from_pac_string(&self.pac_string);
        Completion::Ready(Ok(list))
    }
}

/// `PacResultProxyResolver` を作るファクトリー
#[derive(Debug, Clone)]
pub struct PacResultProxyResolverFactory {
    pac_string: String,
}

impl PacResultProxyResolverFactory {
    pub fn new(pac_string: &str) -> Self {
        Self {
            pac_string: pac_string.to_string(),
        }
    }
}

impl ProxyResolverFactory for PacResultProxyResolverFactory {
    fn expects_pac_bytes(&self) -> bool {
        false
    }

    fn create_proxy_resolver(
        &mut self,
        _job: JobId,
        _pac: &PacFileData,
    ) -> Completion<Box<dyn ProxyResolver>> {
        Completion::Ready(Ok(Box::new(PacResultProxyResolver::new(&self.pac_string))))
    }
}
