use std::fmt;

use serde::{Deserialize, Serialize};

/// ACME 錯誤類型的共同前綴。
pub const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// CA 回傳的問題文件（RFC 7807，RFC 8555 §6.7）。
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Problem {
    /// 機器可讀的錯誤類型，例如 `urn:ietf:params:acme:error:badNonce`。
    #[serde(rename = "type", default)]
    pub kind: String,
    /// 人類可讀的說明。
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Problem {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
            status: None,
        }
    }

    /// 嘗試將回應內容解析為問題文件，內容不符時回傳 `None`。
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Problem>(body)
            .ok()
            .filter(|p| !p.kind.is_empty() || !p.detail.is_empty())
    }

    /// 去掉 ACME 前綴後的錯誤名稱。
    pub fn short_kind(&self) -> &str {
        self.kind
            .strip_prefix(ACME_ERROR_PREFIX)
            .unwrap_or(&self.kind)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.short_kind() == "badNonce"
    }

    pub fn is_rate_limited(&self) -> bool {
        self.short_kind() == "rateLimited"
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind.is_empty(), self.detail.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.kind, self.detail),
            (false, true) => write!(f, "{}", self.kind),
            _ => write!(f, "{}", self.detail),
        }
    }
}
