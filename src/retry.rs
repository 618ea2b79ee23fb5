//! 網路請求的重試策略。
//!
//! 每次嘗試的結果分為三類：成功、暫時性失敗（可重試）與永久性失敗。
//! 暫時性失敗依 `Retry-After` 或指數退避等待，總次數有上限；
//! 次數用盡或超過呼叫端給定的截止時間時，由呼叫端轉換為更具體的錯誤。

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;

use crate::clock::{CancelToken, ClockT};

/// 單次嘗試的結果。
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// 成功，結束重試。
    Done(T),
    /// 暫時性失敗；`after` 為伺服器指定的等待時間。
    Retry { reason: String, after: Option<Duration> },
    /// 永久性失敗，立即回傳。
    Fail(E),
}

/// 重試結束但未成功時的原因。
#[derive(Debug)]
pub enum RetryError<E> {
    /// 次數用盡，附帶最後一次失敗的原因。
    Exhausted { attempts: u32, last: String },
    /// 下一次嘗試會超過截止時間，附帶最後一次失敗的原因。
    DeadlineExceeded { attempts: u32, last: String },
    /// 在嘗試之間收到取消訊號。
    Cancelled,
    /// 永久性失敗。
    Fatal(E),
}

/// 重試策略：最多嘗試次數與指數退避參數。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失敗後（從 1 起算）的退避時間，不超過 `max_delay`。
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// 反覆執行 `op` 直到成功、永久失敗、次數用盡或被取消。
    ///
    /// # 參數
    ///
    /// - `clock`: 用於等待的時鐘。
    /// - `cancel`: 每次嘗試前檢查的取消旗標。
    /// - `target`: 僅用於日誌的目標描述（通常是 URL）。
    /// - `op`: 執行單次嘗試，參數為目前的嘗試次數（從 1 起算）。
    pub fn run<T, E, F>(
        &self,
        clock: &dyn ClockT,
        cancel: &CancelToken,
        target: &str,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Attempt<T, E>,
    {
        self.run_until(clock, cancel, target, None, op)
    }

    /// 與 [`RetryPolicy::run`] 相同，但所有等待都不超過 `deadline`（以 `clock.now()` 計）。
    ///
    /// 每次等待縮短為 `min(延遲, 剩餘時間)`；到達截止時間後不再發出新的嘗試，
    /// 回傳 `RetryError::DeadlineExceeded`。
    pub fn run_until<T, E, F>(
        &self,
        clock: &dyn ClockT,
        cancel: &CancelToken,
        target: &str,
        deadline: Option<Duration>,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Attempt<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let (reason, after) = match op(attempt) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(e) => return Err(RetryError::Fatal(e)),
                Attempt::Retry { reason, after } => (reason, after),
            };

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: reason,
                });
            }

            let mut delay = after
                .unwrap_or_else(|| self.backoff(attempt))
                .min(self.max_delay);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_sub(clock.now());
                if remaining.is_zero() {
                    return Err(RetryError::DeadlineExceeded {
                        attempts: attempt,
                        last: reason,
                    });
                }
                delay = delay.min(remaining);
            }
            warn!(
                "Transient failure on {} (attempt {}/{}): {}; retrying in {:?}",
                target, attempt, max_attempts, reason, delay
            );
            clock.sleep(delay);

            if deadline.is_some_and(|deadline| clock.now() >= deadline) {
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt,
                    last: reason,
                });
            }
        }
    }
}

/// 判斷 HTTP 狀態碼是否屬於暫時性失敗（限流或伺服器錯誤）。
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// 解析 `Retry-After` 標頭，支援秒數與 HTTP 日期兩種格式。
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
