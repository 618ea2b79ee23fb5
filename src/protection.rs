use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    encoding::b64url,
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
    nonce::{NonceError, NonceT},
};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 識別簽章者的方式：註冊前使用完整公鑰，註冊後使用帳戶 URL。
#[derive(Debug, Clone, PartialEq)]
pub enum Signer {
    Jwk(JsonValue),
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的結構體。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: &'static str,
    signer: Signer,
}

/// 表示數字簽章保護頭部的資料結構。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數
    pub nonce: String,
    /// 請求目標 URL
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// 將保護頭序列化為 JSON 後以 base64url 編碼。
    pub fn to_b64(&self) -> Result<String> {
        Ok(b64url(serde_json::to_string(self)?))
    }
}

impl<'a> Protection<'a> {
    /// 以 `jwk` 形式建立保護頭產生器，僅用於 `newAccount`。
    ///
    /// # 參數
    ///
    /// - `nonce`: 實現了 [`NonceT`] trait 的 nonce 取得器。
    /// - `key_pair`: 帳戶金鑰，其演算法決定 `alg`，公鑰填入 `jwk`。
    pub fn with_jwk(nonce: &'a dyn NonceT, key_pair: &KeyPair) -> Result<Self> {
        let jwk = Jwk::new(key_pair)?.to_value()?;
        Ok(Self {
            nonce,
            alg: key_pair.algorithm.jws_alg(),
            signer: Signer::Jwk(jwk),
        })
    }

    /// 以 `kid`（帳戶 URL）形式建立保護頭產生器。
    pub fn with_kid(nonce: &'a dyn NonceT, key_pair: &KeyPair, kid: impl Into<String>) -> Self {
        Self {
            nonce,
            alg: key_pair.algorithm.jws_alg(),
            signer: Signer::Kid(kid.into()),
        }
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    ///
    /// 每次呼叫都會從 `nonce` 取得一個新的 nonce。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.get()?;
        let (jwk, kid) = match &self.signer {
            Signer::Jwk(value) => (Some(value.clone()), None),
            Signer::Kid(kid) => (None, Some(kid.clone())),
        };

        Ok(ProtectedHeader {
            alg: self.alg.to_string(),
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}
