//! 一次完整的簽發：註冊、建立訂單、完成授權、提交 CSR、下載、組裝並發佈。
//!
//! 任一階段失敗即中止後續步驟，回傳帶有網域與階段的 [`IssueError`]。
//! 沒有部分成功的狀態：憑證要嘛完整簽發並發佈，要嘛整次執行失敗。

use std::sync::Arc;

use log::{info, warn};

use crate::{
    account::Account,
    certificate::CertificateBundle,
    client::{AcmeClient, AcmeError},
    clock::{CancelToken, ClockT, SystemClock},
    config::{IssueSettings, PropagationMode},
    csr::CSR,
    dns::{
        propagation::{FixedDelay, PropagationCheckT, ResolverCheck},
        DnsProviderT,
    },
    error::{IssueError, Stage},
    key_pair::KeyPair,
    orchestrator::Orchestrator,
    publish::{PublishReport, Publisher},
    transport::{ReqwestTransport, TransportT},
};

type Result<T> = std::result::Result<T, IssueError>;

/// 成功簽發的結果。
#[derive(Debug)]
pub struct IssueOutcome {
    pub bundle: CertificateBundle,
    pub report: PublishReport,
    /// 訂單 URL
    pub order_url: String,
}

/// 簽發流程。
pub struct Pipeline {
    settings: IssueSettings,
    dns: Arc<dyn DnsProviderT>,
    publisher: Publisher,
    transport: Option<Arc<dyn TransportT>>,
    clock: Arc<dyn ClockT>,
    propagation: Option<Arc<dyn PropagationCheckT>>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(settings: IssueSettings, dns: Arc<dyn DnsProviderT>, publisher: Publisher) -> Self {
        Self {
            settings,
            dns,
            publisher,
            transport: None,
            clock: Arc::new(SystemClock::new()),
            propagation: None,
            cancel: CancelToken::new(),
        }
    }

    /// 指定 HTTP 傳輸層；未指定時以設定的逾時建立 reqwest 實作。
    pub fn transport(mut self, transport: Arc<dyn TransportT>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn ClockT>) -> Self {
        self.clock = clock;
        self
    }

    /// 指定傳播檢查策略；未指定時依 [`PropagationMode`] 決定。
    pub fn propagation(mut self, propagation: Arc<dyn PropagationCheckT>) -> Self {
        self.propagation = Some(propagation);
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 執行一次簽發。
    ///
    /// # 回傳
    ///
    /// 成功時回傳憑證組合與發佈結果；失敗時回傳第一個致命錯誤。
    pub fn run(&self) -> Result<IssueOutcome> {
        let settings = &self.settings;
        let domain = settings.primary_domain();
        let acme = |stage: Stage| move |e: AcmeError| IssueError::acme(stage, domain, e);

        let transport: Arc<dyn TransportT> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(
                ReqwestTransport::new(settings.request_timeout)
                    .map_err(|e| IssueError::acme(Stage::Registration, domain, e.into()))?,
            ),
        };

        info!("Issuing certificate for {} via {}", settings.domains.join(", "), settings.directory_url);
        let client = AcmeClient::builder(&settings.directory_url)
            .transport(transport.clone())
            .clock(self.clock.clone())
            .cancel(self.cancel.clone())
            .retry(settings.retry.clone())
            .connect()
            .map_err(acme(Stage::Registration))?;

        let account = Account::generate(&settings.email, settings.account_key).map_err(|source| IssueError::Key {
            domain: domain.to_string(),
            stage: Stage::Registration,
            source,
        })?;
        let account = client.register(account).map_err(acme(Stage::Registration))?;

        let order = client
            .create_order(&account, &settings.domains)
            .map_err(acme(Stage::Order))?;

        let propagation = self.propagation_check(transport);
        Orchestrator::new(&client, &*self.dns, &*propagation, settings.orchestrator())
            .cancel(self.cancel.clone())
            .authorize(&account, &order)?;
        let ready = client
            .wait_order_ready(&account, &order, settings.order_poll)
            .map_err(acme(Stage::Authorization))?;
        info!("All authorizations for {} are valid", domain);

        let certificate_key = KeyPair::generate(settings.certificate_key).map_err(|source| IssueError::Key {
            domain: domain.to_string(),
            stage: Stage::Finalize,
            source,
        })?;
        let csr = settings
            .domains
            .iter()
            .fold(CSR::new(), |csr, name| csr.set_san(name))
            .build_der(&certificate_key)
            .map_err(|source| IssueError::Csr {
                domain: domain.to_string(),
                source,
            })?;
        let finalized = client
            .finalize_order(&account, &ready, &csr)
            .map_err(acme(Stage::Finalize))?;
        let valid = client
            .poll_order(&account, &finalized, settings.order_poll)
            .map_err(acme(Stage::Finalize))?;

        let downloaded = client
            .download_certificate(&account, &valid)
            .map_err(acme(Stage::Download))?;
        let private_key_pem = certificate_key.private_key_pem().map_err(|source| IssueError::Key {
            domain: domain.to_string(),
            stage: Stage::Download,
            source,
        })?;
        let malformed = |source| IssueError::MalformedBundle {
            domain: domain.to_string(),
            source,
        };
        let bundle = CertificateBundle::assemble(&downloaded.pem, downloaded.issuer.as_deref(), private_key_pem)
            .map_err(malformed)?;
        bundle.ensure_names(&settings.domains).map_err(malformed)?;
        log_certificate(domain, &bundle);

        if self.cancel.is_cancelled() {
            return Err(IssueError::Cancelled {
                domain: domain.to_string(),
                stage: Stage::Publish,
            });
        }
        let report = self
            .publisher
            .publish(domain, &bundle)
            .map_err(|source| IssueError::Publish {
                domain: domain.to_string(),
                source,
            })?;

        Ok(IssueOutcome {
            bundle,
            report,
            order_url: valid.url,
        })
    }

    fn propagation_check(&self, transport: Arc<dyn TransportT>) -> Arc<dyn PropagationCheckT> {
        if let Some(propagation) = &self.propagation {
            return propagation.clone();
        }
        match self.settings.propagation_mode {
            PropagationMode::Fixed => Arc::new(
                FixedDelay::new(self.clock.clone(), self.cancel.clone())
                    .interval(self.settings.propagation_interval),
            ),
            PropagationMode::Resolvers => Arc::new(
                ResolverCheck::new(transport, self.clock.clone(), self.cancel.clone())
                    .interval(self.settings.propagation_interval),
            ),
        }
    }
}

fn log_certificate(domain: &str, bundle: &CertificateBundle) {
    match (bundle.fingerprint(), bundle.serial(), bundle.not_after()) {
        (Ok(fingerprint), Ok(serial), Ok(not_after)) => info!(
            "Issued certificate for {}: sha256 {} serial {} expires {} ({} chain certificates)",
            domain,
            fingerprint,
            serial,
            not_after.to_rfc3339(),
            bundle.chain().len()
        ),
        _ => warn!("Issued certificate for {} but could not read its details", domain),
    }
}
