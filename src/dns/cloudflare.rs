use std::sync::Arc;

use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::provider::{quote_txt, DnsError, DnsProviderT, RecordHandle, Result};
use crate::transport::{HttpRequest, TransportT};

/// Cloudflare API v4 的根路徑。
pub const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

const RECORD_TTL: u32 = 60;

/// 用於在 Cloudflare 上建立 DNS TXT 記錄的資料結構。
#[derive(Debug, Serialize)]
struct CloudflareDnsRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
}

/// Cloudflare API 的通用回應外殼。
#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result: Option<T>,
}

/// 只需要 `id` 欄位的 Cloudflare 物件（zone 或記錄）。
#[derive(Debug, Deserialize)]
struct CloudflareObject {
    id: String,
}

/// Cloudflare API 錯誤訊息結構。
#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}

/// 將 Cloudflare 回傳的錯誤訊息組合成單一字串。
fn format_cloudflare_errors(errors: &[CloudflareError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cloudflare DNS 供應商，透過 API token 管理 TXT 記錄。
///
/// Cloudflare 不提供傳播完成的訊號，傳播確認交由呼叫端處理。
pub struct CloudflareProvider {
    transport: Arc<dyn TransportT>,
    token: String,
    api_base: String,
}

impl CloudflareProvider {
    pub fn new(transport: Arc<dyn TransportT>, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: token.into(),
            api_base: CLOUDFLARE_API.to_string(),
        }
    }

    /// 送出請求並解開 Cloudflare 的回應外殼。
    fn call<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<Option<T>> {
        let url = request.url.clone();
        let request = request.header("Authorization", format!("Bearer {}", self.token));
        let response = self.transport.execute(request)?;

        let parsed: CloudflareResponse<T> = serde_json::from_slice(&response.body).map_err(|e| {
            DnsError::ApiRequest(format!("{} (HTTP {}): {}", url, response.status, e))
        })?;
        if !parsed.success {
            return Err(DnsError::ApiRequest(format!(
                "{}: {}",
                url,
                format_cloudflare_errors(&parsed.errors)
            )));
        }
        Ok(parsed.result)
    }

    /// 由記錄名稱的上層網域逐層往上尋找所屬 zone。
    ///
    /// # 參數
    ///
    /// - `name`: 完整記錄名稱，例如 `_acme-challenge.www.example.com`
    ///
    /// # 回傳
    ///
    /// 第一個存在的 zone ID；找不到時回傳 `DnsError::ZoneNotFound`
    fn zone_id(&self, name: &str) -> Result<String> {
        let labels: Vec<&str> = name.trim_end_matches('.').split('.').collect();
        for start in 1..labels.len().saturating_sub(1) {
            let candidate = labels[start..].join(".");
            let url = format!("{}/zones?name={}", self.api_base, candidate);
            let zones: Vec<CloudflareObject> = self.call(HttpRequest::get(url))?.unwrap_or_default();
            if let Some(zone) = zones.into_iter().next() {
                debug!("Found Cloudflare zone {} for {}", candidate, name);
                return Ok(zone.id);
            }
        }
        Err(DnsError::ZoneNotFound {
            domain: name.to_string(),
        })
    }

    /// 刪除 zone 中所有同名的 TXT 記錄。
    fn delete_existing(&self, zone_id: &str, name: &str) -> Result<()> {
        let url = format!(
            "{}/zones/{}/dns_records?type=TXT&name={}",
            self.api_base, zone_id, name
        );
        let records: Vec<CloudflareObject> = self.call(HttpRequest::get(url))?.unwrap_or_default();
        for record in records {
            debug!("Removing stale TXT record {} for {}", record.id, name);
            self.delete_by_id(zone_id, &record.id)?;
        }
        Ok(())
    }

    fn delete_by_id(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record_id);
        self.call::<CloudflareObject>(HttpRequest::delete(url))?;
        Ok(())
    }
}

impl DnsProviderT for CloudflareProvider {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn create_record(&self, name: &str, value: &str) -> Result<RecordHandle> {
        let zone_id = self.zone_id(name)?;
        self.delete_existing(&zone_id, name)?;

        let record = CloudflareDnsRecord {
            record_type: "TXT",
            name,
            content: quote_txt(value),
            ttl: RECORD_TTL,
        };
        let body = serde_json::to_string(&record).map_err(|e| DnsError::RecordCreation {
            record_name: name.to_string(),
            message: e.to_string(),
        })?;
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let created: CloudflareObject = self
            .call(HttpRequest::post_json(url, body))?
            .ok_or_else(|| DnsError::RecordCreation {
                record_name: name.to_string(),
                message: "response carried no record".into(),
            })?;
        info!("Created Cloudflare TXT record {} ({})", name, created.id);

        Ok(RecordHandle {
            name: name.to_string(),
            value: value.to_string(),
            provider_ref: format!("{}/{}", zone_id, created.id),
        })
    }

    fn delete_record(&self, handle: &RecordHandle) -> Result<()> {
        let (zone_id, record_id) =
            handle
                .provider_ref
                .split_once('/')
                .ok_or_else(|| DnsError::RecordDeletion {
                    record_name: handle.name.clone(),
                    message: format!("malformed handle '{}'", handle.provider_ref),
                })?;
        self.delete_by_id(zone_id, record_id)
            .map_err(|e| DnsError::RecordDeletion {
                record_name: handle.name.clone(),
                message: e.to_string(),
            })?;
        info!("Deleted Cloudflare TXT record {}", handle.name);
        Ok(())
    }
}
