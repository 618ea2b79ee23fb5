//! ACME 帳戶。
//!
//! 帳戶在每次執行開始時建立，之後以不可變值的形式明確傳給每個需要它的操作；
//! 註冊成功只會產生一個帶有註冊 URL 的新值，不會原地修改。

use crate::key_pair::{KeyAlgorithm, KeyError, KeyPair};

type Result<T> = std::result::Result<T, KeyError>;

/// 表示 ACME 帳戶。
#[derive(Debug, Clone)]
pub struct Account {
    /// 帳戶所屬電子郵件地址，可為空。
    pub email: String,
    /// 帳戶使用的密鑰對，只存在於本次執行的記憶體中。
    pub key_pair: KeyPair,
    /// CA 指派的帳戶 URL，註冊前為 `None`。
    pub registration_uri: Option<String>,
}

impl Account {
    /// 帳戶金鑰預設演算法。
    pub const DEFAULT_KEY_ALG: KeyAlgorithm = KeyAlgorithm::EcP256;

    /// 以新產生的金鑰建立尚未註冊的帳戶。
    ///
    /// # Errors
    ///
    /// 金鑰產生失敗時回傳 [`KeyError`]。
    pub fn generate(email: &str, algorithm: KeyAlgorithm) -> Result<Self> {
        Ok(Self::from_key_pair(email, KeyPair::generate(algorithm)?))
    }

    /// 以既有金鑰建立尚未註冊的帳戶。
    pub fn from_key_pair(email: &str, key_pair: KeyPair) -> Self {
        Account {
            email: email.to_string(),
            key_pair,
            registration_uri: None,
        }
    }

    /// 回傳帶有註冊 URL 的新帳戶值。
    pub fn with_registration(self, uri: impl Into<String>) -> Self {
        Account {
            registration_uri: Some(uri.into()),
            ..self
        }
    }

    /// JWS `kid`，即註冊 URL。
    pub fn kid(&self) -> Option<&str> {
        self.registration_uri.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registration_uri.is_some()
    }

    /// 帳戶金鑰的 JWK 縮影。
    pub fn thumbprint(&self) -> Result<String> {
        self.key_pair.thumbprint()
    }
}
