//! PAC スクリプトの再取得間隔
//!
//! 自動設定で決めた PAC は、裏で定期的に取り直して変化を検出する。
//! 間隔は前回の間隔と初回の結果から決める。

use std::time::Duration;

use crate::Error;

/// 次の再取得の起動方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// 間隔が経過したら (タイマーで) 起動する
    UseTimer,
    /// 間隔の経過後、次にリクエストが来たときに起動する
    StartAfterActivity,
}

/// 再取得間隔の方針
pub trait PacPollPolicy {
    /// 次の再取得までの間隔と起動方法
    ///
    /// `initial_error` は最初の PAC 決定の結果、`current_delay` は前回の間隔で、
    /// 初回は `None`。
    fn next_delay(
        &self,
        initial_error: Option<&Error>,
        current_delay: Option<Duration>,
    ) -> (PollMode, Duration);
}

/// 失敗時の 1 回目の間隔
pub const POLL_DELAY_AFTER_ERROR_1: Duration = Duration::from_secs(8);
/// 失敗時の 2 回目の間隔
pub const POLL_DELAY_AFTER_ERROR_2: Duration = Duration::from_secs(32);
/// 失敗時の 3 回目の間隔
pub const POLL_DELAY_AFTER_ERROR_3: Duration = Duration::from_secs(2 * 60);
/// 失敗時の 4 回目以降の間隔
pub const POLL_DELAY_AFTER_ERROR_4: Duration = Duration::from_secs(4 * 60 * 60);
/// 成功時の間隔
pub const POLL_DELAY_AFTER_SUCCESS: Duration = Duration::from_secs(12 * 60 * 60);

/// デフォルトの方針
///
/// 失敗していれば 8 秒後にタイマーで、以降は 32 秒、2 分、4 時間の経過後の
/// リクエストを契機に再取得する。成功していれば 12 時間経過後のリクエストを契機にする。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPollPolicy;

impl PacPollPolicy for DefaultPollPolicy {
    fn next_delay(
        &self,
        initial_error: Option<&Error>,
        current_delay: Option<Duration>,
    ) -> (PollMode, Duration) {
        if initial_error.is_none() {
            return (PollMode::StartAfterActivity, POLL_DELAY_AFTER_SUCCESS);
        }
        match current_delay {
            None => (PollMode::UseTimer, POLL_DELAY_AFTER_ERROR_1),
            Some(d) if d == POLL_DELAY_AFTER_ERROR_1 => {
                (PollMode::StartAfterActivity, POLL_DELAY_AFTER_ERROR_2)
            }
            Some(d) if d == POLL_DELAY_AFTER_ERROR_2 => {
                (PollMode::StartAfterActivity, POLL_DELAY_AFTER_ERROR_3)
            }
            Some(_) => (PollMode::StartAfterActivity, POLL_DELAY_AFTER_ERROR_4),
        }
    }
}
