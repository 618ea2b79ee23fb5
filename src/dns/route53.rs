//! Amazon Route 53 供應商。
//!
//! 以 `UPSERT` 建立記錄，重複執行只會覆寫同名記錄；刪除時送出內容完全相同的
//! `DELETE`。傳播狀態以 `GetChange` 輪詢到 `INSYNC` 為準。

use std::{sync::Arc, time::Duration};

use aws_sdk_route53::{
    error::DisplayErrorContext,
    types::{Change, ChangeAction, ChangeBatch, ChangeStatus, ResourceRecord, ResourceRecordSet, RrType},
    Client,
};
use log::{debug, info};

use super::provider::{matches_zone, quote_txt, DnsError, DnsProviderT, Propagation, RecordHandle, Result};
use crate::{aws::AwsContext, clock::ClockT};

/// 驗證記錄的 TTL（秒）。
const RECORD_TTL: i64 = 60;
/// `GetChange` 的輪詢間隔。
const CHANGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct Route53Provider {
    aws: Arc<AwsContext>,
    client: Client,
    clock: Arc<dyn ClockT>,
    hosted_zone_id: Option<String>,
}

impl Route53Provider {
    /// # 參數
    ///
    /// - `hosted_zone_id`: 指定的 hosted zone；`None` 時依記錄名稱自動尋找。
    pub fn new(aws: Arc<AwsContext>, clock: Arc<dyn ClockT>, hosted_zone_id: Option<String>) -> Self {
        let client = Client::new(aws.config());
        Self {
            aws,
            client,
            clock,
            hosted_zone_id,
        }
    }

    /// 找出包含 `name` 的最長公開 hosted zone。
    fn discover_zone(&self, name: &str) -> Result<String> {
        if let Some(zone) = &self.hosted_zone_id {
            return Ok(zone.clone());
        }

        let best = self.aws.block_on(async {
            let mut pages = self.client.list_hosted_zones().into_paginator().page_size(100).send();
            let mut best: Option<(usize, String)> = None;

            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| DnsError::ApiRequest(DisplayErrorContext(&e).to_string()))?;
                for zone in page.hosted_zones() {
                    let private = zone.config().map(|c| c.private_zone()).unwrap_or(false);
                    let zone_name = zone.name().trim_end_matches('.');
                    if private || !matches_zone(name, zone_name) {
                        continue;
                    }
                    if best.as_ref().map_or(true, |(len, _)| zone_name.len() > *len) {
                        best = Some((zone_name.len(), zone.id().to_string()));
                    }
                }
            }
            Ok::<_, DnsError>(best)
        })?;

        best.map(|(_, id)| id).ok_or_else(|| DnsError::ZoneNotFound {
            domain: name.to_string(),
        })
    }

    fn record_set(name: &str, value: &str) -> std::result::Result<ResourceRecordSet, String> {
        let record = ResourceRecord::builder()
            .value(quote_txt(value))
            .build()
            .map_err(|e| e.to_string())?;
        ResourceRecordSet::builder()
            .name(name)
            .set_type(Some(RrType::Txt))
            .ttl(RECORD_TTL)
            .set_resource_records(Some(vec![record]))
            .build()
            .map_err(|e| e.to_string())
    }

    /// 送出單一變更，回傳變更 ID。
    fn change(&self, zone_id: &str, action: ChangeAction, name: &str, value: &str) -> std::result::Result<String, String> {
        let record_set = Self::record_set(name, value)?;
        let change = Change::builder()
            .action(action)
            .resource_record_set(record_set)
            .build()
            .map_err(|e| e.to_string())?;
        let batch = ChangeBatch::builder()
            .changes(change)
            .comment("ACME DNS-01 challenge")
            .build()
            .map_err(|e| e.to_string())?;

        let output = self
            .aws
            .block_on(
                self.client
                    .change_resource_record_sets()
                    .hosted_zone_id(zone_id)
                    .change_batch(batch)
                    .send(),
            )
            .map_err(|e| DisplayErrorContext(&e).to_string())?;

        Ok(output
            .change_info()
            .map(|info| info.id().trim_start_matches("/change/").to_string())
            .unwrap_or_default())
    }
}

impl DnsProviderT for Route53Provider {
    fn name(&self) -> &'static str {
        "route53"
    }

    fn create_record(&self, name: &str, value: &str) -> Result<RecordHandle> {
        let zone_id = self.discover_zone(name)?;
        let change_id = self
            .change(&zone_id, ChangeAction::Upsert, name, value)
            .map_err(|message| DnsError::RecordCreation {
                record_name: name.to_string(),
                message,
            })?;
        info!("Upserted TXT {} in hosted zone {} (change {})", name, zone_id, change_id);

        Ok(RecordHandle {
            name: name.to_string(),
            value: value.to_string(),
            provider_ref: format!("{}|{}", zone_id, change_id),
        })
    }

    fn delete_record(&self, handle: &RecordHandle) -> Result<()> {
        let (zone_id, _) = split_ref(&handle.provider_ref);
        self.change(zone_id, ChangeAction::Delete, &handle.name, &handle.value)
            .map_err(|message| DnsError::RecordDeletion {
                record_name: handle.name.clone(),
                message,
            })?;
        info!("Deleted TXT {} from hosted zone {}", handle.name, zone_id);
        Ok(())
    }

    fn wait_for_propagation(&self, handle: &RecordHandle, timeout: Duration) -> Result<Propagation> {
        let (_, change_id) = split_ref(&handle.provider_ref);
        if change_id.is_empty() {
            return Ok(Propagation::Unsupported);
        }

        let start = self.clock.now();
        loop {
            let output = self
                .aws
                .block_on(self.client.get_change().id(change_id).send())
                .map_err(|e| DnsError::ApiRequest(DisplayErrorContext(&e).to_string()))?;
            let in_sync = output
                .change_info()
                .is_some_and(|info| info.status() == &ChangeStatus::Insync);
            if in_sync {
                debug!("Change {} is INSYNC", change_id);
                return Ok(Propagation::Confirmed);
            }

            let elapsed = self.clock.now().saturating_sub(start);
            if elapsed >= timeout {
                return Err(DnsError::PropagationTimeout {
                    record_name: handle.name.clone(),
                    elapsed,
                });
            }
            self.clock.sleep(CHANGE_POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

/// `provider_ref` 格式為 `<zone id>|<change id>`。
fn split_ref(provider_ref: &str) -> (&str, &str) {
    provider_ref.split_once('|').unwrap_or((provider_ref, ""))
}
