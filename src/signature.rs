use openssl::{ecdsa::EcdsaSig, error::ErrorStack, hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::key_pair::{KeyAlgorithm, KeyPair};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤。
    #[error("Signing error: {0}")]
    SigningError(#[from] ErrorStack),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 所需的原始簽章位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>>;
}

/// RSASSA-PKCS1-v1_5 搭配 SHA-256（RS256）。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ECDSA 簽名（ES256 / ES384）。
///
/// OpenSSL 產生 DER 編碼的簽章，JWS 則要求 `r || s` 各自左補零至座標長度。
struct EcdsaSignature {
    digest: MessageDigest,
    component_len: i32,
}

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(self.digest, &key_pair.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = sig.r().to_vec_padded(self.component_len)?;
        raw.extend(sig.s().to_vec_padded(self.component_len)?);
        Ok(raw)
    }
}

fn algorithm_for(algorithm: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
    match algorithm {
        KeyAlgorithm::Rsa2048 | KeyAlgorithm::Rsa4096 => Box::new(RsaSignature),
        KeyAlgorithm::EcP256 => Box::new(EcdsaSignature {
            digest: MessageDigest::sha256(),
            component_len: 32,
        }),
        KeyAlgorithm::EcP384 => Box::new(EcdsaSignature {
            digest: MessageDigest::sha384(),
            component_len: 48,
        }),
    }
}

/// 對 JWS 的簽名輸入（`header.payload`）產生簽章。
///
/// # 參數
///
/// - `header_b64`: 已進行 Base64 URL 編碼的標頭。
/// - `payload_b64`: 已進行 Base64 URL 編碼的有效負載，可為空字串。
/// - `key_pair`: 用於簽名的金鑰對，其演算法決定簽章格式。
///
/// # 回傳
///
/// 成功時回傳原始簽章位元組；失敗時回傳 `SignatureError`。
pub fn create_signature(header_b64: &str, payload_b64: &str, key_pair: &KeyPair) -> Result<Vec<u8>> {
    let signing_input = format!("{}.{}", header_b64, payload_b64);
    algorithm_for(key_pair.algorithm).sign(signing_input.as_bytes(), key_pair)
}
