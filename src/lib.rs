//! # ACME DNS-01 Certificate Issuer
//!
//! 本庫以 ACME DNS-01 挑戰向 CA（例如 Let's Encrypt）簽發憑證，並將結果發佈到物件儲存與受管憑證庫。
//!
//! - **client**: ACME 目錄用戶端，負責 JWS 簽署、nonce 管理、重試與輪詢。
//! - **orchestrator**: 將每個授權的 DNS 記錄建立、傳播確認、驗證與清除串在一起。
//! - **certificate**: 將 CA 回傳的 PEM 串接內容組裝成葉憑證與中繼憑證鏈。
//! - **dns**: DNS 供應商介面與 Route 53、Cloudflare 實作，以及 DoH 傳播確認。
//! - **publish**: 發佈到 S3、本機目錄與 ACM。
//! - **pipeline**: 串起以上模組的一次性簽發流程。
//!
//! ## 使用方式
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dns01_issuer::{
//!     config::IssueSettings,
//!     dns::cloudflare::CloudflareProvider,
//!     pipeline::Pipeline,
//!     publish::{local::LocalDirectory, Publisher},
//!     transport::ReqwestTransport,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = IssueSettings::builder("admin@example.com", "example.com").build()?;
//!     let transport = Arc::new(ReqwestTransport::new(settings.request_timeout)?);
//!
//!     let dns = Arc::new(CloudflareProvider::new(transport.clone(), "your-cloudflare-api-token"));
//!     let publisher = Publisher::new(Arc::new(LocalDirectory::new("/etc/ssl/acme")));
//!
//!     let outcome = Pipeline::new(settings, dns, publisher).transport(transport).run()?;
//!     println!("{}", outcome.bundle.full_chain_pem());
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod aws;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod clock;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns;
pub mod encoding;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;
pub mod problem;
pub mod protection;
pub mod publish;
pub mod retry;
pub mod signature;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
