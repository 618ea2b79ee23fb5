use std::fmt;

use openssl::sha::sha256;
use serde::Deserialize;
use thiserror::Error;

use crate::{encoding::b64url, payload::Identifier, problem::Problem};

/// DNS-01 驗證記錄名稱的前綴。
pub const DNS01_RECORD_PREFIX: &str = "_acme-challenge";

/// 定義與挑戰狀態轉換相關的錯誤類型。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Illegal challenge transition: {from} -> {to}")]
    InvalidTransition {
        from: ChallengeStatus,
        to: ChallengeStatus,
    },
    #[error("Challenge in terminal state: {0}")]
    InvalidState(ChallengeStatus),
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 表示 ACME 挑戰的類型。本系統只處理 DNS-01，其餘類型僅用於辨識後略過。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(other)]
    Unknown,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Unknown => "unknown",
        }
    }
}

/// 挑戰狀態：pending → processing → valid | invalid，終結狀態不可離開。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    /// 判斷該狀態是否為終結狀態。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    /// 檢查由 `self` 轉換到 `next` 是否合法，合法時回傳 `next`。
    ///
    /// CA 可能直接由 pending 跳到終結狀態（輪詢間隔內完成驗證）。
    pub fn transition(self, next: ChallengeStatus) -> Result<ChallengeStatus> {
        use ChallengeStatus::*;
        let legal = match (self, next) {
            (a, b) if a == b => true,
            (Pending, _) => true,
            (Processing, Valid | Invalid) => true,
            _ => false,
        };

        if legal {
            Ok(next)
        } else {
            Err(ChallengeError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 授權狀態（RFC 8555 §7.1.6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URL
    pub url: String,
    /// 當前挑戰狀態
    pub status: ChallengeStatus,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    /// 驗證成功的時間
    #[serde(default)]
    pub validated: Option<String>,
    /// 驗證失敗時 CA 提供的原因
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Challenge {
    /// 以新取得的內容更新自身，並驗證狀態轉換。
    pub fn refresh(&mut self, latest: Challenge) -> Result<()> {
        self.status = self.status.transition(latest.status)?;
        self.validated = latest.validated;
        self.error = latest.error;
        Ok(())
    }

    /// 確認挑戰仍可回應；終結狀態的挑戰不可再次觸發驗證。
    pub fn ensure_respondable(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ChallengeError::InvalidState(self.status));
        }
        Ok(())
    }
}

/// 表示 CA 端的授權物件，對應訂單中的一個域名。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// 授權是否針對萬用字元域名，此時 `identifier` 不含 `*.` 前綴
    #[serde(default)]
    pub wildcard: bool,
    /// 授權 URL
    #[serde(skip)]
    pub url: String,
}

impl Authorization {
    /// 授權對應的域名（不含萬用字元前綴）。
    pub fn domain(&self) -> &str {
        &self.identifier.value
    }

    /// 取得 DNS-01 挑戰；其他類型的挑戰一律略過。
    pub fn dns01_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == ChallengeType::Dns01)
    }

    /// 取得第一個附帶問題文件的挑戰錯誤，用於回報授權失敗的原因。
    pub fn failure_reason(&self) -> Option<&Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

/// 組合 key authorization：`token.thumbprint`。
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// DNS-01 TXT 記錄的值：key authorization 的 SHA-256 摘要，以 base64url 編碼。
///
/// 相同的 token 與縮影必定得到相同的結果。
pub fn dns01_txt_value(token: &str, thumbprint: &str) -> String {
    b64url(sha256(key_authorization(token, thumbprint).as_bytes()))
}

/// DNS-01 驗證記錄名稱 `_acme-challenge.<domain>`，會去除 `*.` 前綴。
pub fn validation_record_name(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", DNS01_RECORD_PREFIX, domain.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHZ: &str = r#"{
        "status": "pending",
        "expires": "2016-01-02T14:09:30Z",
        "identifier": {"type": "dns", "value": "www.example.org"},
        "challenges": [
            {"type": "http-01", "url": "https://ca.test/chall/prV_B7yEyA4", "status": "pending", "token": "DGyRejmCefe7v4NfDGDKfA"},
            {"type": "dns-01", "url": "https://ca.test/chall/Rg5dV14Gh1Q", "status": "pending", "token": "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA"},
            {"type": "tls-alpn-02", "url": "https://ca.test/chall/x", "status": "pending", "token": "abc"}
        ]
    }"#;

    #[test]
    fn test_parse_authorization_picks_dns01() {
        let authz: Authorization = serde_json::from_str(AUTHZ).unwrap();
        assert_eq!(authz.domain(), "www.example.org");
        assert_eq!(authz.status, AuthorizationStatus::Pending);
        assert_eq!(authz.challenges[2].challenge_type, ChallengeType::Unknown);

        let dns = authz.dns01_challenge().unwrap();
        assert_eq!(dns.url, "https://ca.test/chall/Rg5dV14Gh1Q");
        assert_eq!(dns.status, ChallengeStatus::Pending);
    }

    #[test]
    fn test_txt_value_is_deterministic() {
        let a = dns01_txt_value("token-1", "thumb");
        let b = dns01_txt_value("token-1", "thumb");
        assert_eq!(a, b);
        assert_eq!(a.len(), 43);
        assert_ne!(a, dns01_txt_value("token-2", "thumb"));
        assert_ne!(a, dns01_txt_value("token-1", "other"));
    }

    #[test]
    fn test_txt_value_known_vector() {
        assert_eq!(key_authorization("tok", "thumb"), "tok.thumb");
        assert_eq!(
            dns01_txt_value("tok", "thumb"),
            "sYAwVrqDtVOuJZvAHurSAYPoEt5fFV_C4bdSOOW-o5Y"
        );
    }

    #[test]
    fn test_record_name() {
        assert_eq!(validation_record_name("example.test"), "_acme-challenge.example.test");
        assert_eq!(validation_record_name("*.example.test"), "_acme-challenge.example.test");
        assert_eq!(validation_record_name("example.test."), "_acme-challenge.example.test");
    }

    #[test]
    fn test_challenge_transitions() {
        use ChallengeStatus::*;
        assert_eq!(Pending.transition(Processing), Ok(Processing));
        assert_eq!(Processing.transition(Valid), Ok(Valid));
        assert_eq!(Pending.transition(Invalid), Ok(Invalid));
        assert!(Processing.transition(Pending).is_err());
        assert!(Valid.transition(Invalid).is_err());
        assert!(Invalid.transition(Processing).is_err());
    }

    #[test]
    fn test_terminal_challenge_cannot_be_answered() {
        let authz: Authorization = serde_json::from_str(AUTHZ).unwrap();
        let mut challenge = authz.dns01_challenge().unwrap().clone();
        assert!(challenge.ensure_respondable().is_ok());

        let mut rejected = challenge.clone();
        rejected.status = ChallengeStatus::Invalid;
        rejected.error = Some(Problem::new(
            "urn:ietf:params:acme:error:dns",
            "dns record not found",
        ));
        challenge.refresh(rejected).unwrap();
        assert_eq!(
            challenge.ensure_respondable(),
            Err(ChallengeError::InvalidState(ChallengeStatus::Invalid))
        );
        assert_eq!(
            challenge.error.unwrap().detail,
            "dns record not found"
        );
    }
}
