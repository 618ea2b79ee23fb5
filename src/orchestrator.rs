//! 挑戰協調：將訂單中的每個授權與 DNS 記錄的建立、傳播、刪除及 CA 輪詢綁在一起。
//!
//! 每個授權依序處理，任何一個失敗就中止整張訂單，不再處理其餘授權。

use std::time::Duration;

use log::{info, warn};

use crate::{
    account::Account,
    challenge::{dns01_txt_value, validation_record_name, Authorization, AuthorizationStatus, Challenge},
    client::{AcmeClient, AcmeError, PollSettings},
    clock::CancelToken,
    dns::{propagation::PropagationCheckT, DnsProviderT, Propagation, RecordHandle},
    error::{IssueError, Stage},
    order::Order,
    problem::Problem,
};

type Result<T> = std::result::Result<T, IssueError>;

/// 協調器的時間設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// 等待 DNS 傳播的上限
    pub propagation_timeout: Duration,
    /// 挑戰輪詢的總時間與間隔
    pub challenge_poll: PollSettings,
}

/// 挑戰協調器。
pub struct Orchestrator<'a> {
    client: &'a AcmeClient,
    dns: &'a dyn DnsProviderT,
    propagation: &'a dyn PropagationCheckT,
    settings: OrchestratorSettings,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a AcmeClient,
        dns: &'a dyn DnsProviderT,
        propagation: &'a dyn PropagationCheckT,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            dns,
            propagation,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 依序完成訂單中的所有授權。
    ///
    /// # 回傳
    ///
    /// 全部授權為 `valid` 時回傳 `Ok(())`；否則回傳第一個失敗授權的錯誤。
    pub fn authorize(&self, account: &Account, order: &Order) -> Result<()> {
        let primary = order.domains().first().copied().unwrap_or_default().to_string();

        for url in &order.authorizations {
            self.ensure_not_cancelled(&primary)?;
            let authorization = self
                .client
                .fetch_authorization(account, url)
                .map_err(|e| IssueError::acme(Stage::Authorization, &primary, e))?;
            self.authorize_one(account, &authorization)?;
        }
        Ok(())
    }

    fn authorize_one(&self, account: &Account, authorization: &Authorization) -> Result<()> {
        let domain = authorization.domain();
        match authorization.status {
            AuthorizationStatus::Valid => {
                info!("Authorization for {} is already valid, skipping", domain);
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => {
                let problem = authorization
                    .failure_reason()
                    .cloned()
                    .unwrap_or_else(|| Problem::new("", format!("authorization is {}", status)));
                return Err(IssueError::ValidationRejected {
                    domain: domain.to_string(),
                    problem,
                });
            }
        }

        let challenge = authorization.dns01_challenge().ok_or_else(|| {
            IssueError::acme(
                Stage::Authorization,
                domain,
                AcmeError::NoDns01Challenge(domain.to_string()),
            )
        })?;
        let thumbprint = account.thumbprint().map_err(|source| IssueError::Key {
            domain: domain.to_string(),
            stage: Stage::Authorization,
            source,
        })?;

        let name = validation_record_name(domain);
        let value = dns01_txt_value(&challenge.token, &thumbprint);
        let handle = self
            .dns
            .create_record(&name, &value)
            .map_err(|e| IssueError::dns(domain, e))?;
        info!("Created TXT record {} via {}", handle.name, self.dns.name());

        let outcome = self.validate(account, domain, challenge, &handle);

        match self.dns.delete_record(&handle) {
            Ok(()) => info!("Deleted TXT record {}", handle.name),
            Err(e) => warn!("Failed to delete TXT record {}: {}", handle.name, e),
        }
        outcome
    }

    fn validate(
        &self,
        account: &Account,
        domain: &str,
        challenge: &Challenge,
        handle: &RecordHandle,
    ) -> Result<()> {
        self.wait_for_propagation(domain, handle)?;
        self.ensure_not_cancelled(domain)?;

        let responded = self
            .client
            .respond_to_challenge(account, challenge)
            .map_err(|e| IssueError::acme(Stage::Authorization, domain, e))?;
        self.client
            .poll_challenge(account, &responded, self.settings.challenge_poll)
            .map_err(|e| IssueError::acme(Stage::Authorization, domain, e))?;

        info!("Challenge for {} is valid", domain);
        Ok(())
    }

    /// 先詢問供應商；供應商無法確認時交給傳播檢查策略。
    fn wait_for_propagation(&self, domain: &str, handle: &RecordHandle) -> Result<()> {
        let timeout = self.settings.propagation_timeout;
        let propagation = self
            .dns
            .wait_for_propagation(handle, timeout)
            .map_err(|e| IssueError::dns(domain, e))?;

        match propagation {
            Propagation::Confirmed => info!("{} confirmed {} is in sync", self.dns.name(), handle.name),
            Propagation::Unsupported => self
                .propagation
                .wait(&handle.name, &handle.value, timeout)
                .map_err(|e| IssueError::dns(domain, e))?,
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self, domain: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(IssueError::Cancelled {
                domain: domain.to_string(),
                stage: Stage::Authorization,
            });
        }
        Ok(())
    }
}
