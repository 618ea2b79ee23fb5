//! 此模組提供 JSON Web Signature (JWS) 的扁平 JSON 序列化格式（RFC 7515 §7.2.2），
//! 也就是 ACME 請求本體的格式。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    encoding::b64url,
    key_pair::KeyPair,
    protection::{ProtectedHeader, ProtectionError},
    signature::{create_signature, SignatureError},
};

/// 表示一個 JSON Web Signature (JWS) 物件，三個欄位皆為 base64url 字串。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位。
    #[serde(rename = "protected")]
    pub header: String,
    /// 空字串代表 POST-as-GET。
    pub payload: String,
    pub signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, JwsError>;

impl Jws {
    /// 以保護頭與負載建立並簽署 JWS。
    ///
    /// # 參數
    ///
    /// - `header`: 已填好 nonce 與 url 的保護頭。
    /// - `payload`: 負載的 JSON 字串；`None` 表示 POST-as-GET，負載為空字串。
    /// - `key_pair`: 帳戶金鑰。
    ///
    /// # 回傳
    ///
    /// 成功時回傳已簽署的 `Jws`。
    pub fn sign(header: &ProtectedHeader, payload: Option<&str>, key_pair: &KeyPair) -> Result<Self> {
        let header_b64 = header.to_b64()?;
        let payload_b64 = payload.map(b64url).unwrap_or_default();
        let signature = create_signature(&header_b64, &payload_b64, key_pair)?;

        Ok(Jws {
            header: header_b64,
            payload: payload_b64,
            signature: b64url(signature),
        })
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
