//! 憑證發佈：將簽發結果寫入物件儲存，並匯入受管憑證庫。
//!
//! 發佈依序進行，任何一步失敗即停止並回報錯誤；已寫入的部分不會回復，
//! 但整次執行會被視為失敗。

pub mod acm;
pub mod local;
pub mod s3;

use std::{io, sync::Arc};

use log::info;
use thiserror::Error;

use crate::certificate::CertificateBundle;

/// 發佈過程可能發生的錯誤。
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Failed to store '{key}' in object store: {message}")]
    ObjectStore { key: String, message: String },
    #[error("Certificate import failed: {0}")]
    CertificateStore(String),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// 物件儲存：以 key 寫入一段位元組。
pub trait ObjectStoreT: Send + Sync {
    fn name(&self) -> &'static str;

    fn store(&self, key: &str, payload: &[u8]) -> Result<()>;
}

/// 受管憑證庫。
pub trait CertificateStoreT: Send + Sync {
    /// 匯入憑證；`existing_arn` 存在時原地更新。
    ///
    /// # 參數
    ///
    /// - `certificate`: 葉憑證 PEM
    /// - `chain`: 所有中繼憑證串接成的 PEM，可為空
    /// - `private_key`: 私鑰 PEM
    /// - `existing_arn`: 要更新的既有憑證
    ///
    /// # 回傳
    ///
    /// 匯入後的憑證 ARN
    fn import_certificate(
        &self,
        certificate: &[u8],
        chain: &[u8],
        private_key: &[u8],
        existing_arn: Option<&str>,
    ) -> Result<String>;
}

/// 憑證鏈檔案的 key：`<domain>.crt`。
pub fn certificate_key(domain: &str) -> String {
    format!("{}.crt", domain)
}

/// 私鑰檔案的 key：`<domain>.key`。
pub fn private_key_key(domain: &str) -> String {
    format!("{}.key", domain)
}

/// 一次發佈的結果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// 已寫入物件儲存的 key，依寫入順序
    pub stored_keys: Vec<String>,
    /// 受管憑證庫中的 ARN（未啟用時為 `None`）
    pub certificate_arn: Option<String>,
}

/// 依序發佈到物件儲存與受管憑證庫。
pub struct Publisher {
    objects: Arc<dyn ObjectStoreT>,
    certificates: Option<Arc<dyn CertificateStoreT>>,
    existing_arn: Option<String>,
}

impl Publisher {
    pub fn new(objects: Arc<dyn ObjectStoreT>) -> Self {
        Self {
            objects,
            certificates: None,
            existing_arn: None,
        }
    }

    /// 同時匯入受管憑證庫；`existing_arn` 存在時更新該憑證。
    pub fn with_certificate_store(
        mut self,
        certificates: Arc<dyn CertificateStoreT>,
        existing_arn: Option<String>,
    ) -> Self {
        self.certificates = Some(certificates);
        self.existing_arn = existing_arn;
        self
    }

    /// 發佈 `<domain>.crt`（CA 回傳的完整憑證鏈）、`<domain>.key`，再匯入憑證庫。
    pub fn publish(&self, domain: &str, bundle: &CertificateBundle) -> Result<PublishReport> {
        let mut report = PublishReport::default();

        let entries = [
            (certificate_key(domain), bundle.bundle_pem().to_vec()),
            (private_key_key(domain), bundle.private_key_pem().to_vec()),
        ];
        for (key, payload) in entries {
            self.objects.store(&key, &payload)?;
            info!("Stored {} in {}", key, self.objects.name());
            report.stored_keys.push(key);
        }

        if let Some(store) = &self.certificates {
            let arn = store.import_certificate(
                bundle.leaf_pem().as_bytes(),
                bundle.chain_pem().as_bytes(),
                bundle.private_key_pem(),
                self.existing_arn.as_deref(),
            )?;
            info!("Imported certificate as {}", arn);
            report.certificate_arn = Some(arn);
        }

        Ok(report)
    }
}
