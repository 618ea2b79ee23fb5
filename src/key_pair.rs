use std::{fmt, str::FromStr};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    encoding::b64url,
    jwk::{Jwk, JwkError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、JWK 與演算法解析錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 支援的金鑰演算法。
///
/// 帳戶金鑰預設使用 [`KeyAlgorithm::EcP256`]，憑證金鑰預設使用
/// [`KeyAlgorithm::Rsa2048`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa2048,
    Rsa4096,
    EcP256,
    EcP384,
}

impl KeyAlgorithm {
    /// 組態與命令列使用的名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2048 => "rsa2048",
            Self::Rsa4096 => "rsa4096",
            Self::EcP256 => "ec256",
            Self::EcP384 => "ec384",
        }
    }

    /// 對應的 JWS 簽章演算法名稱。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Rsa2048 | Self::Rsa4096 => "RS256",
            Self::EcP256 => "ES256",
            Self::EcP384 => "ES384",
        }
    }

    pub fn is_ec(&self) -> bool {
        matches!(self, Self::EcP256 | Self::EcP384)
    }

    /// 橢圓曲線座標與簽章分量的位元組長度；RSA 回傳 `None`。
    pub fn coordinate_len(&self) -> Option<usize> {
        match self {
            Self::EcP256 => Some(32),
            Self::EcP384 => Some(48),
            _ => None,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyError;

    /// 解析演算法名稱，不分大小寫，並接受幾個常見別名。
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rsa2048" | "rsa" | "rsa-2048" => Ok(Self::Rsa2048),
            "rsa4096" | "rsa-4096" => Ok(Self::Rsa4096),
            "ec256" | "p256" | "p-256" | "ecdsa" => Ok(Self::EcP256),
            "ec384" | "p384" | "p-384" => Ok(Self::EcP384),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一組非對稱金鑰對。
///
/// 每次執行都會產生新的金鑰，不會寫入任何持久化儲存。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 產生此金鑰所用的演算法。
    pub algorithm: KeyAlgorithm,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝；公鑰可由其導出。
    pub pri_key: PKey<Private>,
}

impl KeyPair {
    /// 根據指定演算法產生新的金鑰對。
    ///
    /// # 參數
    ///
    /// - `algorithm`: 要使用的演算法。
    ///
    /// # 回傳
    ///
    /// 成功回傳新產生的 `KeyPair`，否則回傳 `KeyError::OpenSSL`。
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let pri_key = match algorithm {
            KeyAlgorithm::Rsa2048 => PKey::from_rsa(Rsa::generate(2048)?)?,
            KeyAlgorithm::Rsa4096 => PKey::from_rsa(Rsa::generate(4096)?)?,
            KeyAlgorithm::EcP256 => Self::generate_ec(Nid::X9_62_PRIME256V1)?,
            KeyAlgorithm::EcP384 => Self::generate_ec(Nid::SECP384R1)?,
        };

        Ok(Self {
            algorithm,
            pri_key,
        })
    }

    fn generate_ec(curve: Nid) -> Result<PKey<Private>> {
        let group = EcGroup::from_curve_name(curve)?;
        let ec_key = EcKey::generate(&group)?;
        Ok(PKey::from_ec_key(ec_key)?)
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對，演算法由金鑰內容推斷。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let algorithm = Self::detect_algorithm(&pri_key)?;
        Ok(Self {
            algorithm,
            pri_key,
        })
    }

    fn detect_algorithm(pri_key: &PKey<Private>) -> Result<KeyAlgorithm> {
        match pri_key.id() {
            Id::RSA => match pri_key.bits() {
                2048 => Ok(KeyAlgorithm::Rsa2048),
                4096 => Ok(KeyAlgorithm::Rsa4096),
                bits => Err(KeyError::UnsupportedAlgorithm(format!("RSA-{}", bits))),
            },
            Id::EC => {
                let curve = pri_key.ec_key()?.group().curve_name();
                match curve {
                    Some(Nid::X9_62_PRIME256V1) => Ok(KeyAlgorithm::EcP256),
                    Some(Nid::SECP384R1) => Ok(KeyAlgorithm::EcP384),
                    other => Err(KeyError::UnsupportedAlgorithm(format!(
                        "EC curve {:?}",
                        other.map(|nid| nid.as_raw())
                    ))),
                }
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!(
                "key type {}",
                other.as_raw()
            ))),
        }
    }

    /// 以 PKCS#8 PEM 格式匯出私鑰，供發佈至物件儲存與憑證庫。
    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 計算金鑰的 JWK 縮影（RFC 7638），以 URL-safe Base64 字串回傳。
    ///
    /// 縮影只取決於公鑰內容，同一把金鑰重複計算必定得到相同結果。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::new(self)?;
        let hash = sha256(jwk.to_thumbprint_json()?.as_bytes());
        Ok(b64url(hash))
    }
}
