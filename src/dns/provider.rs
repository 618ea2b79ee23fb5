//! DNS 供應商介面：建立與刪除 DNS-01 驗證用的 TXT 記錄。

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// DNS 記錄操作可能發生的錯誤。
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("Zone not found for '{domain}'")]
    ZoneNotFound { domain: String },
    #[error("Failed to create TXT record '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },
    #[error("Failed to delete TXT record '{record_name}': {message}")]
    RecordDeletion { record_name: String, message: String },
    #[error("DNS API request failed: {0}")]
    ApiRequest(String),
    #[error("TXT record '{record_name}' not visible after {elapsed:?}")]
    PropagationTimeout {
        record_name: String,
        elapsed: Duration,
    },
    #[error("Invalid DNS provider configuration: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DnsError>;

/// 供應商建立記錄後回傳的控制代碼，刪除時原樣交回。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    /// 完整記錄名稱，例如 `_acme-challenge.example.com`
    pub name: String,
    /// TXT 內容（不含引號）
    pub value: String,
    /// 供應商自行解讀的參照，例如 zone 與記錄 ID
    pub provider_ref: String,
}

/// 供應商對記錄傳播狀態的回報。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// 供應商已確認記錄生效。
    Confirmed,
    /// 供應商無法確認，由呼叫端另行檢查。
    Unsupported,
}

/// DNS 供應商必須提供的能力。
///
/// `create_record` 必須是冪等的：同名的舊記錄會被覆寫而不是重複建立。
pub trait DnsProviderT: Send + Sync {
    /// 供應商名稱，用於日誌。
    fn name(&self) -> &'static str;

    /// 建立（或覆寫）TXT 記錄。
    ///
    /// # 參數
    ///
    /// - `name`: 完整記錄名稱
    /// - `value`: TXT 內容
    ///
    /// # 回傳
    ///
    /// 之後刪除記錄所需的控制代碼。
    fn create_record(&self, name: &str, value: &str) -> Result<RecordHandle>;

    /// 刪除先前建立的記錄。
    fn delete_record(&self, handle: &RecordHandle) -> Result<()>;

    /// 等待記錄在供應商端生效，最多等待 `timeout`。
    fn wait_for_propagation(&self, _handle: &RecordHandle, _timeout: Duration) -> Result<Propagation> {
        Ok(Propagation::Unsupported)
    }
}

/// 將 TXT 內容包上引號，已有引號時保持原樣。
pub fn quote_txt(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed.to_string()
    } else {
        format!("\"{}\"", trimmed.trim_matches('"'))
    }
}

/// 判斷 `zone` 是否為 `domain` 本身或其上層網域（不分大小寫，忽略結尾的點）。
pub fn matches_zone(domain: &str, zone: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let zone = zone.trim_end_matches('.').to_ascii_lowercase();
    !zone.is_empty() && (domain == zone || domain.ends_with(&format!(".{}", zone)))
}
