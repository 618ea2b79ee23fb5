//! 執行設定：程式庫使用的 [`IssueSettings`]，以及命令列與環境變數的解析。

use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, ValueEnum};
use thiserror::Error;

use crate::{
    account::Account, client::PollSettings, key_pair::KeyAlgorithm,
    orchestrator::OrchestratorSettings, retry::RetryPolicy, transport::ReqwestTransport,
};

/// Let's Encrypt 測試環境。
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 正式環境。
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No domain configured")]
    NoDomain,
    #[error("Invalid domain: '{0}'")]
    InvalidDomain(String),
    #[error("{0} interval must be greater than zero")]
    ZeroInterval(&'static str),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// CA 通知前確認 DNS 傳播的方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PropagationMode {
    /// 查詢公開 DoH 解析器直到看見記錄
    Resolvers,
    /// 固定等待整個傳播時間窗
    Fixed,
}

/// DNS 供應商。
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DnsProviderKind {
    Route53,
    Cloudflare,
}

/// 一次簽發所需的全部設定。
#[derive(Debug, Clone)]
pub struct IssueSettings {
    pub email: String,
    /// 第一個網域為主要網域，用於發佈檔名與錯誤訊息
    pub domains: Vec<String>,
    pub directory_url: String,
    pub account_key: KeyAlgorithm,
    pub certificate_key: KeyAlgorithm,
    pub propagation_timeout: Duration,
    pub propagation_mode: PropagationMode,
    pub propagation_interval: Duration,
    pub challenge_poll: PollSettings,
    pub order_poll: PollSettings,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl IssueSettings {
    pub const DEFAULT_CERTIFICATE_KEY: KeyAlgorithm = KeyAlgorithm::Rsa2048;
    pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_PROPAGATION_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_CHALLENGE_POLL: PollSettings =
        PollSettings::new(Duration::from_secs(180), Duration::from_secs(5));
    pub const DEFAULT_ORDER_POLL: PollSettings =
        PollSettings::new(Duration::from_secs(180), Duration::from_secs(3));

    pub fn builder(email: &str, domain: &str) -> IssueSettingsBuilder {
        IssueSettingsBuilder::new(email, domain)
    }

    pub fn primary_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or_default()
    }

    pub fn orchestrator(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            propagation_timeout: self.propagation_timeout,
            challenge_poll: self.challenge_poll,
        }
    }
}

/// 建立 [`IssueSettings`] 的構造器。
#[derive(Debug, Clone)]
pub struct IssueSettingsBuilder {
    settings: IssueSettings,
}

impl IssueSettingsBuilder {
    /// 以預設值建立構造器。
    ///
    /// 預設值包括：
    /// - ACME 目錄：Let's Encrypt 測試環境
    /// - 帳戶金鑰：EC P-256；憑證金鑰：RSA 2048
    /// - DNS 傳播：最多 300 秒，查詢公開解析器確認
    /// - 挑戰輪詢 180 秒 / 每 5 秒；訂單輪詢 180 秒 / 每 3 秒
    /// - 單次 HTTP 請求逾時 30 秒，重試 5 次
    pub fn new(email: &str, domain: &str) -> Self {
        Self {
            settings: IssueSettings {
                email: email.to_string(),
                domains: vec![domain.trim().to_string()],
                directory_url: LETSENCRYPT_STAGING.to_string(),
                account_key: Account::DEFAULT_KEY_ALG,
                certificate_key: IssueSettings::DEFAULT_CERTIFICATE_KEY,
                propagation_timeout: IssueSettings::DEFAULT_PROPAGATION_TIMEOUT,
                propagation_mode: PropagationMode::Resolvers,
                propagation_interval: IssueSettings::DEFAULT_PROPAGATION_INTERVAL,
                challenge_poll: IssueSettings::DEFAULT_CHALLENGE_POLL,
                order_poll: IssueSettings::DEFAULT_ORDER_POLL,
                request_timeout: ReqwestTransport::DEFAULT_TIMEOUT,
                retry: RetryPolicy::default(),
            },
        }
    }

    /// 額外加入一個網域，重複的網域會被忽略。
    pub fn domain(mut self, domain: &str) -> Self {
        let domain = domain.trim().to_string();
        if !self.settings.domains.contains(&domain) {
            self.settings.domains.push(domain);
        }
        self
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.settings.directory_url = url.to_string();
        self
    }

    pub fn account_key(mut self, algorithm: KeyAlgorithm) -> Self {
        self.settings.account_key = algorithm;
        self
    }

    pub fn certificate_key(mut self, algorithm: KeyAlgorithm) -> Self {
        self.settings.certificate_key = algorithm;
        self
    }

    pub fn propagation_timeout(mut self, timeout: Duration) -> Self {
        self.settings.propagation_timeout = timeout;
        self
    }

    pub fn propagation_mode(mut self, mode: PropagationMode) -> Self {
        self.settings.propagation_mode = mode;
        self
    }

    pub fn propagation_interval(mut self, interval: Duration) -> Self {
        self.settings.propagation_interval = interval;
        self
    }

    pub fn challenge_poll(mut self, poll: PollSettings) -> Self {
        self.settings.challenge_poll = poll;
        self
    }

    pub fn order_poll(mut self, poll: PollSettings) -> Self {
        self.settings.order_poll = poll;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    /// 驗證並產生設定。
    ///
    /// # Errors
    ///
    /// 沒有網域、網域含空白或不合法字元、或任一輪詢間隔為零時回傳 [`ConfigError`]。
    pub fn build(self) -> Result<IssueSettings> {
        let settings = self.settings;

        if settings.domains.iter().all(|d| d.is_empty()) {
            return Err(ConfigError::NoDomain);
        }
        for domain in &settings.domains {
            if !is_valid_domain(domain) {
                return Err(ConfigError::InvalidDomain(domain.clone()));
            }
        }
        if settings.challenge_poll.interval.is_zero() {
            return Err(ConfigError::ZeroInterval("Challenge poll"));
        }
        if settings.order_poll.interval.is_zero() {
            return Err(ConfigError::ZeroInterval("Order poll"));
        }
        if settings.propagation_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("Propagation"));
        }
        Ok(settings)
    }
}

/// 網域只允許字母、數字、`-` 與 `.`，可帶一個 `*.` 前綴。
fn is_valid_domain(domain: &str) -> bool {
    let bare = domain.strip_prefix("*.").unwrap_or(domain);
    !bare.is_empty()
        && !bare.starts_with('.')
        && !bare.contains("..")
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// 命令列參數；每個參數也可由同名環境變數提供。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 帳戶聯絡信箱
    #[arg(long, env = "EMAIL", default_value = "")]
    pub email: String,

    /// 要簽發憑證的網域
    #[arg(long, env = "DOMAIN")]
    pub domain: String,

    /// ACME 目錄 URL（預設為 Let's Encrypt 測試環境）
    #[arg(long = "directory-url", env = "CA_DIR_URL")]
    pub directory_url: Option<String>,

    /// 使用 Let's Encrypt 正式環境
    #[arg(long)]
    pub production: bool,

    /// 發佈憑證的 S3 bucket
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: Option<String>,

    /// 要原地更新的 ACM 憑證 ARN
    #[arg(long = "acm-cert-arn", env = "ACM_CERT_ARN")]
    pub acm_cert_arn: Option<String>,

    /// 是否匯入 ACM
    #[arg(long = "acm-import", env = "ACM_IMPORT", default_value_t = true, action = ArgAction::Set)]
    pub acm_import: bool,

    /// 改為寫入本機目錄
    #[arg(long = "output-dir", env = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// DNS 供應商
    #[arg(long = "dns-provider", env = "DNS_PROVIDER", value_enum, default_value_t = DnsProviderKind::Route53)]
    pub dns_provider: DnsProviderKind,

    /// Cloudflare API token
    #[arg(long = "cloudflare-api-token", env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    pub cloudflare_api_token: Option<String>,

    /// Route 53 hosted zone ID（未指定時自動尋找）
    #[arg(long = "route53-hosted-zone-id", env = "ROUTE53_HOSTED_ZONE_ID")]
    pub route53_hosted_zone_id: Option<String>,

    /// DNS 傳播等待上限（秒）
    #[arg(long = "propagation-timeout", env = "PROPAGATION_TIMEOUT", default_value_t = 300)]
    pub propagation_timeout: u64,

    /// DNS 傳播確認方式
    #[arg(long = "propagation-check", env = "PROPAGATION_CHECK", value_enum, default_value_t = PropagationMode::Resolvers)]
    pub propagation_check: PropagationMode,

    /// 憑證金鑰類型：rsa2048、rsa4096、ec256、ec384
    #[arg(long = "cert-key-type", env = "CERT_KEY_TYPE", default_value = "rsa2048")]
    pub cert_key_type: KeyAlgorithm,
}

impl Cli {
    /// `--production` 優先於 `CA_DIR_URL`。
    pub fn directory_url(&self) -> &str {
        if self.production {
            return LETSENCRYPT_PRODUCTION;
        }
        self.directory_url.as_deref().unwrap_or(LETSENCRYPT_STAGING)
    }

    pub fn settings(&self) -> Result<IssueSettings> {
        IssueSettings::builder(&self.email, &self.domain)
            .directory_url(self.directory_url())
            .certificate_key(self.cert_key_type)
            .propagation_timeout(Duration::from_secs(self.propagation_timeout))
            .propagation_mode(self.propagation_check)
            .build()
    }
}
