use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::b64url;

/// 載荷驗證失敗的原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("At least one identifier is required")]
    NoIdentifiers,
    #[error("Identifier type must be 'dns', got '{0}'")]
    IdentifierType(String),
    #[error("Identifier value cannot be empty")]
    EmptyIdentifier,
    #[error("Terms of service must be agreed")]
    TermsNotAgreed,
    #[error("CSR cannot be empty")]
    EmptyCsr,
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 驗證載荷資料是否符合預期的規範，送出前呼叫。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例。
    ///
    /// `email` 會自動補上 `mailto:` 前綴；空字串則不附帶聯絡資訊。
    pub fn new(email: &str) -> Self {
        let contact = match email {
            "" => Vec::new(),
            e if e.starts_with("mailto:") => vec![e.to_string()],
            e => vec![format!("mailto:{}", e)],
        };

        NewAccountPayload {
            contact,
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.terms_of_service_agreed {
            return Err(PayloadError::TermsNotAgreed);
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// 建立新訂單時所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 為每個域名建立一個 `dns` 類型的識別項，順序與輸入相同。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::dns(domain.as_ref()))
            .collect();

        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::NoIdentifiers);
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(PayloadError::IdentifierType(identifier.type_.clone()));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError::EmptyIdentifier);
            }
        }
        Ok(())
    }
}

/// 回應挑戰的載荷，內容固定為 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 最終化訂單時所需的載荷資料，內含 DER 編碼 CSR 的 base64url 字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: b64url(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::EmptyCsr);
        }
        Ok(())
    }
}
