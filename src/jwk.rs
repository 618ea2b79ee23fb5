use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{encoding::b64url, key_pair::KeyPair};

/// JWK相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(#[from] ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwkError>;

/// JSON Web Key (JWK) 的封裝，支援 RSA 與橢圓曲線公鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// 橢圓曲線格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK，只含公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RsaJwk {
    pub n: String,
    pub e: String,
}

/// 橢圓曲線格式的 JWK。座標依曲線長度左補零。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl RsaJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self> {
        let rsa = key_pair.pri_key.rsa()?;
        Ok(RsaJwk {
            n: b64url(rsa.n().to_vec()),
            e: b64url(rsa.e().to_vec()),
        })
    }
}

impl EcJwk {
    fn from_key_pair(key_pair: &KeyPair, coordinate_len: usize) -> Result<Self> {
        let ec_key = key_pair.pri_key.ec_key()?;
        let group = ec_key.group();
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec_key
            .public_key()
            .affine_coordinates(group, &mut x, &mut y, &mut ctx)?;

        let crv = match coordinate_len {
            48 => "P-384",
            _ => "P-256",
        };

        Ok(EcJwk {
            crv: crv.to_string(),
            x: b64url(x.to_vec_padded(coordinate_len as i32)?),
            y: b64url(y.to_vec_padded(coordinate_len as i32)?),
        })
    }
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    ///
    /// # 參數
    ///
    /// * `key_pair` - 包含演算法資訊與私鑰的金鑰對，公鑰由私鑰導出。
    ///
    /// # 返回
    ///
    /// 成功時返回對應類型的 `Jwk`，否則返回 `JwkError`。
    pub fn new(key_pair: &KeyPair) -> Result<Self> {
        match key_pair.algorithm.coordinate_len() {
            Some(len) => Ok(Jwk::Ec(EcJwk::from_key_pair(key_pair, len)?)),
            None => Ok(Jwk::Rsa(RsaJwk::from_key_pair(key_pair)?)),
        }
    }

    /// 轉為 JSON 值，放入 JWS 保護標頭的 `jwk` 欄位。
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// 產生 RFC 7638 縮影所需的 JSON。
    ///
    /// 只包含必要欄位，鍵依字典序排列且不含空白。
    pub fn to_thumbprint_json(&self) -> Result<String> {
        let mut map = Map::new();
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.clone()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
        }
        Ok(serde_json::to_string(&Value::Object(map))?)
    }
}
