//! 失敗したプロキシの再試行情報

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::Error;

/// 失敗したプロキシの再試行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRetryInfo {
    /// この時刻まではプロキシを使わない
    pub bad_until: Instant,
    /// 再試行までの間隔
    pub current_delay: Duration,
    /// 他に候補がなければ期限前でも使ってよいか
    pub try_while_bad: bool,
    /// 失敗の原因。明示的に除外した場合は `None`
    pub net_error: Option<Error>,
}

impl ProxyRetryInfo {
    /// `now` の時点でまだ使うべきでないか
    pub fn is_bad_at(&self, now: Instant) -> bool {
        self.bad_until > now
    }
}

/// `ProxyServer::to_uri()` をキーとする再試行情報
pub type ProxyRetryInfoMap = HashMap<String, ProxyRetryInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_independently() {
        let now = Instant::now();
        let info = ProxyRetryInfo {
            bad_until: now + Duration::from_secs(10),
            current_delay: Duration::from_secs(10),
            try_while_bad: true,
            net_error: None,
        };
        assert!(info.is_bad_at(now));
        assert!(info.is_bad_at(now + Duration::from_secs(9)));
        assert!(!info.is_bad_at(now + Duration::from_secs(10)));
    }
}
