//! 簽發流程的錯誤分類。
//!
//! 每個錯誤都帶有網域與發生階段，CA 提供問題文件時一併保留，
//! 讓頂層只憑一行訊息就能判斷失敗原因。

use std::fmt;

use thiserror::Error;

use crate::{
    certificate::CertificateError, client::AcmeError, csr::CsrError, dns::DnsError,
    key_pair::KeyError, problem::Problem, publish::PublishError,
};

/// 簽發流程的階段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registration,
    Order,
    Authorization,
    Finalize,
    Download,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Order => "order",
            Self::Authorization => "authorization",
            Self::Finalize => "finalize",
            Self::Download => "download",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次簽發執行的致命錯誤。
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("[{domain}] registration failed: {source}")]
    Registration {
        domain: String,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] order failed: {source}")]
    Order {
        domain: String,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] DNS provisioning failed: {source}")]
    DnsProvision {
        domain: String,
        #[source]
        source: DnsError,
    },
    #[error("[{domain}] {stage} timed out: {source}")]
    ValidationTimeout {
        domain: String,
        stage: Stage,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] validation rejected by CA: {problem}")]
    ValidationRejected { domain: String, problem: Problem },
    #[error("[{domain}] authorization failed: {source}")]
    Authorization {
        domain: String,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] finalize failed: {source}")]
    Finalize {
        domain: String,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] {stage} key error: {source}")]
    Key {
        domain: String,
        stage: Stage,
        #[source]
        source: KeyError,
    },
    #[error("[{domain}] CSR error: {source}")]
    Csr {
        domain: String,
        #[source]
        source: CsrError,
    },
    #[error("[{domain}] download failed: {source}")]
    Download {
        domain: String,
        #[source]
        source: AcmeError,
    },
    #[error("[{domain}] malformed certificate bundle: {source}")]
    MalformedBundle {
        domain: String,
        #[source]
        source: CertificateError,
    },
    #[error("[{domain}] publish failed: {source}")]
    Publish {
        domain: String,
        #[source]
        source: PublishError,
    },
    #[error("[{domain}] cancelled during {stage}")]
    Cancelled { domain: String, stage: Stage },
}

impl IssueError {
    /// 依發生階段歸類 ACME 用戶端錯誤。
    ///
    /// 取消與驗證逾時不論階段都歸為專屬類別；授權階段中 CA 判定挑戰或訂單
    /// `invalid` 時歸為 `ValidationRejected`。
    pub fn acme(stage: Stage, domain: &str, err: AcmeError) -> Self {
        let domain = domain.to_string();
        match err {
            AcmeError::Cancelled => Self::Cancelled { domain, stage },
            AcmeError::ValidationTimeout { .. } => Self::ValidationTimeout {
                domain,
                stage,
                source: err,
            },
            AcmeError::ValidationRejected { problem, .. } => {
                Self::ValidationRejected { domain, problem }
            }
            AcmeError::OrderInvalid { problem, .. } if stage == Stage::Authorization => {
                Self::ValidationRejected { domain, problem }
            }
            source => match stage {
                Stage::Registration => Self::Registration { domain, source },
                Stage::Order => Self::Order { domain, source },
                Stage::Authorization => Self::Authorization { domain, source },
                Stage::Finalize => Self::Finalize { domain, source },
                Stage::Download | Stage::Publish => Self::Download { domain, source },
            },
        }
    }

    /// DNS 錯誤一律發生在授權階段；取消訊號轉為 `Cancelled`。
    pub fn dns(domain: &str, err: DnsError) -> Self {
        let domain = domain.to_string();
        match err {
            DnsError::Cancelled => Self::Cancelled {
                domain,
                stage: Stage::Authorization,
            },
            source => Self::DnsProvision { domain, source },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Registration { .. } => Stage::Registration,
            Self::Order { .. } => Stage::Order,
            Self::DnsProvision { .. }
            | Self::ValidationRejected { .. }
            | Self::Authorization { .. } => Stage::Authorization,
            Self::Finalize { .. } | Self::Csr { .. } => Stage::Finalize,
            Self::Download { .. } | Self::MalformedBundle { .. } => Stage::Download,
            Self::Publish { .. } => Stage::Publish,
            Self::ValidationTimeout { stage, .. }
            | Self::Key { stage, .. }
            | Self::Cancelled { stage, .. } => *stage,
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            Self::Registration { domain, .. }
            | Self::Order { domain, .. }
            | Self::DnsProvision { domain, .. }
            | Self::ValidationTimeout { domain, .. }
            | Self::ValidationRejected { domain, .. }
            | Self::Authorization { domain, .. }
            | Self::Finalize { domain, .. }
            | Self::Key { domain, .. }
            | Self::Csr { domain, .. }
            | Self::Download { domain, .. }
            | Self::MalformedBundle { domain, .. }
            | Self::Publish { domain, .. }
            | Self::Cancelled { domain, .. } => domain,
        }
    }

    /// CA 提供的問題文件（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::ValidationRejected { problem, .. } => Some(problem),
            Self::Registration { source, .. }
            | Self::Order { source, .. }
            | Self::ValidationTimeout { source, .. }
            | Self::Authorization { source, .. }
            | Self::Finalize { source, .. }
            | Self::Download { source, .. } => source.problem(),
            _ => None,
        }
    }
}
