use std::sync::{Arc, Mutex};

use log::debug;
use thiserror::Error;

use crate::transport::{HttpRequest, TransportError, TransportT};

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] TransportError),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response (status {0})")]
    NoNonceHeader(u16),
}

type Result<T> = std::result::Result<T, NonceError>;

/// 定義取得 Nonce 的行為。
pub trait NonceT: Send + Sync {
    /// 取得一個尚未使用過的 Nonce。
    fn get(&self) -> Result<String>;

    /// 保存伺服器在回應中附帶的新 Nonce，供下一次請求使用。
    fn store(&self, nonce: String);
}

/// 快取 `Replay-Nonce` 的 Nonce 池。
///
/// 每個 Nonce 只會被取出一次；快取為空時才以 `HEAD newNonce` 向 CA 索取。
pub struct NoncePool {
    transport: Arc<dyn TransportT>,
    url: String,
    cached: Mutex<Option<String>>,
}

impl NoncePool {
    /// 建立新的 Nonce 池。
    ///
    /// # 參數
    ///
    /// * `transport` - 用來發送 `HEAD` 請求的傳輸層。
    /// * `url` - 目錄中的 `newNonce` URL。
    pub fn new(transport: Arc<dyn TransportT>, url: impl Into<String>) -> Self {
        NoncePool {
            transport,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    fn take_cached(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|mut cached| cached.take())
    }
}

impl NonceT for NoncePool {
    fn get(&self) -> Result<String> {
        if let Some(nonce) = self.take_cached() {
            return Ok(nonce);
        }

        debug!("Fetching fresh nonce from {}", self.url);
        let response = self.transport.execute(HttpRequest::head(&self.url))?;
        response
            .header("replay-nonce")
            .map(ToString::to_string)
            .ok_or(NonceError::NoNonceHeader(response.status))
    }

    fn store(&self, nonce: String) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(nonce);
        }
    }
}

/// 模擬 Nonce 實作，固定回傳同一個值。
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

#[cfg(test)]
impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[cfg(test)]
impl NonceT for MockNonce {
    fn get(&self) -> Result<String> {
        Ok(self.value.clone())
    }

    fn store(&self, _nonce: String) {}
}
