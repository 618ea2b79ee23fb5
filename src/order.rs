use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{payload::Identifier, problem::Problem};

/// 訂單狀態轉換錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Illegal order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

type Result<T> = std::result::Result<T, OrderError>;

/// 訂單狀態（RFC 8555 §7.1.6）。
///
/// 狀態依 pending、ready、processing、valid 單向前進；`invalid` 可由任何狀態進入，
/// 進入後不再離開。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Processing => 2,
            Self::Valid => 3,
            Self::Invalid => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    /// 檢查由 `self` 轉換到 `next` 是否合法，合法時回傳 `next`。
    ///
    /// 停留在同一狀態永遠合法；`invalid` 之後只能停留在 `invalid`。
    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus> {
        let legal = match (self, next) {
            (a, b) if a == b => true,
            (Self::Invalid, _) => false,
            (_, Self::Invalid) => true,
            (a, b) => b.rank() > a.rank(),
        };

        if legal {
            Ok(next)
        } else {
            Err(OrderError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CA 端的訂單物件。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// 訂單當前狀態
    pub status: OrderStatus,
    /// 過期時間（RFC 3339 字串）
    #[serde(default)]
    pub expires: Option<String>,
    /// 證書涵蓋的域名，順序與建立訂單時相同
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表，與 `identifiers` 對應
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default)]
    pub certificate: Option<String>,
    /// 訂單失敗時 CA 附帶的問題文件
    #[serde(default)]
    pub error: Option<Problem>,
    /// 訂單 URL，取自建立訂單回應的 `Location` 標頭
    #[serde(skip)]
    pub url: String,
}

impl Order {
    /// 訂單涵蓋的域名。
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers.iter().map(|i| i.value.as_str()).collect()
    }

    /// 以新取得的訂單內容更新自身，並驗證狀態轉換。
    ///
    /// 重新取得的內容不含 URL，因此沿用原本的 `url`。
    pub fn refresh(&mut self, latest: Order) -> Result<()> {
        let status = self.status.transition(latest.status)?;
        let url = std::mem::take(&mut self.url);
        *self = Order { url, status, ..latest };
        Ok(())
    }
}
