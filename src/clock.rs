//! 時間來源與取消訊號。
//!
//! 輪詢與重試迴圈都透過 [`ClockT`] 取得經過時間並休眠，
//! 測試時以 `MockClock` 取代，使 60 秒的輪詢預算可以瞬間跑完。

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// 定義單調時鐘的行為。
pub trait ClockT: Send + Sync + fmt::Debug {
    /// 自時鐘建立以來經過的時間。
    fn now(&self) -> Duration;

    /// 阻塞目前執行緒指定的時間。
    fn sleep(&self, duration: Duration);
}

/// 以 [`Instant`] 與 [`thread::sleep`] 實作的系統時鐘。
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockT for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 模擬時鐘，`sleep` 只推進虛擬時間並記錄每次休眠長度。
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockClock {
    elapsed: std::sync::Mutex<Duration>,
    sleeps: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 手動推進虛擬時間。
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// 回傳至今所有休眠的長度。
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl ClockT for MockClock {
    fn now(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}

/// 可跨執行緒共享的取消旗標。
///
/// 只在網路呼叫與輪詢邊界檢查，不提供更細粒度的中斷。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
