//! DNS 傳播確認。
//!
//! CA 會從任意解析器查詢驗證記錄，因此在通知 CA 之前，先確認公開解析器
//! 都已看到新的 TXT 值。無法主動確認時退回固定等待。

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::Deserialize;

use super::provider::{DnsError, Result};
use crate::{
    clock::{CancelToken, ClockT},
    transport::{HttpRequest, TransportT},
};

/// Google 的 DNS-over-HTTPS JSON 端點。
pub const GOOGLE_DOH: &str = "https://dns.google/resolve";
/// Cloudflare 的 DNS-over-HTTPS JSON 端點。
pub const CLOUDFLARE_DOH: &str = "https://cloudflare-dns.com/dns-query";

const DNS_JSON_CONTENT_TYPE: &str = "application/dns-json";

/// 等待記錄傳播的策略。
pub trait PropagationCheckT: Send + Sync {
    /// 阻塞直到 `name` 的 TXT 記錄包含 `value`，或超過 `timeout`。
    fn wait(&self, name: &str, value: &str, timeout: Duration) -> Result<()>;
}

/// 固定等待整個時間窗，不做任何查詢。
///
/// 以 `interval` 為單位分段休眠，每段之間檢查取消旗標。
#[derive(Debug)]
pub struct FixedDelay {
    clock: Arc<dyn ClockT>,
    cancel: CancelToken,
    interval: Duration,
}

impl FixedDelay {
    pub fn new(clock: Arc<dyn ClockT>, cancel: CancelToken) -> Self {
        Self {
            clock,
            cancel,
            interval: ResolverCheck::DEFAULT_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl PropagationCheckT for FixedDelay {
    fn wait(&self, name: &str, _value: &str, timeout: Duration) -> Result<()> {
        info!("Waiting {:?} for {} to propagate", timeout, name);
        let start = self.clock.now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(DnsError::Cancelled);
            }
            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= timeout {
                return Ok(());
            }
            let remaining = timeout - elapsed;
            if self.interval.is_zero() {
                self.clock.sleep(remaining);
            } else {
                self.clock.sleep(self.interval.min(remaining));
            }
        }
    }
}

/// DoH JSON 回應中與 TXT 查詢相關的欄位。
#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status", default)]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(default)]
    data: String,
}

/// 透過多個 DNS-over-HTTPS 解析器輪詢，直到全部都回傳預期值。
pub struct ResolverCheck {
    transport: Arc<dyn TransportT>,
    clock: Arc<dyn ClockT>,
    cancel: CancelToken,
    resolvers: Vec<String>,
    interval: Duration,
}

impl ResolverCheck {
    /// 預設的查詢間隔。
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    /// 以 Google 與 Cloudflare 解析器建立檢查器。
    pub fn new(transport: Arc<dyn TransportT>, clock: Arc<dyn ClockT>, cancel: CancelToken) -> Self {
        Self {
            transport,
            clock,
            cancel,
            resolvers: vec![GOOGLE_DOH.to_string(), CLOUDFLARE_DOH.to_string()],
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    pub fn resolvers(mut self, resolvers: Vec<String>) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 向單一解析器查詢，回傳目前看得到的所有 TXT 值。查詢失敗視為尚未傳播。
    fn lookup(&self, resolver: &str, name: &str) -> Vec<String> {
        let url = format!("{}?name={}&type=TXT", resolver, name);
        let request = HttpRequest::get(&url).header("Accept", DNS_JSON_CONTENT_TYPE);

        let response = match self.transport.execute(request) {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!("Resolver {} answered HTTP {}", resolver, response.status);
                return Vec::new();
            }
            Err(e) => {
                warn!("Resolver {} unreachable: {}", resolver, e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<DohResponse>(&response.body) {
            Ok(parsed) if parsed.status == 0 => parsed
                .answer
                .into_iter()
                .map(|a| a.data.trim_matches('"').to_string())
                .collect(),
            Ok(parsed) => {
                debug!("Resolver {} returned DNS status {}", resolver, parsed.status);
                Vec::new()
            }
            Err(e) => {
                warn!("Resolver {} returned invalid JSON: {}", resolver, e);
                Vec::new()
            }
        }
    }
}

impl PropagationCheckT for ResolverCheck {
    fn wait(&self, name: &str, value: &str, timeout: Duration) -> Result<()> {
        let start = self.clock.now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(DnsError::Cancelled);
            }

            let pending: Vec<&str> = self
                .resolvers
                .iter()
                .filter(|resolver| !self.lookup(resolver, name).iter().any(|v| v == value))
                .map(String::as_str)
                .collect();
            if pending.is_empty() {
                info!("{} is visible on all resolvers", name);
                return Ok(());
            }
            debug!("{} not yet visible on {}", name, pending.join(", "));

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed < timeout {
                self.clock.sleep(self.interval.min(timeout - elapsed));
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= timeout {
                return Err(DnsError::PropagationTimeout {
                    record_name: name.to_string(),
                    elapsed,
                });
            }
        }
    }
}
