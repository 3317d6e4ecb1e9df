//! 時刻の取得
//!
//! プロキシの再試行期限や PAC のポーリング間隔は `Clock` から取得した
//! 単調時刻で判定する。テストでは `ManualClock` で時刻を進める。

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// 単調時刻の取得元
pub trait Clock {
    /// 現在時刻
    fn now(&self) -> Instant;
}

/// `Instant::now()` を返す時刻
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手動で進める時刻
///
/// クローンしたハンドル同士で同じ時刻を共有する。
///
/// ```rust
/// use std::time::Duration;
/// use shiguredo_netstack::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    /// 現在の実時刻から開始する
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// 指定した時刻から開始する
    pub fn starting_at(now: Instant) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    /// 時刻を進める
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), start + Duration::from_millis(1500));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
