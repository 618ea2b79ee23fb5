//! DNS-01 驗證記錄的供應商實作與傳播確認。

pub mod cloudflare;
pub mod propagation;
pub mod provider;
pub mod route53;

pub use provider::{DnsError, DnsProviderT, Propagation, RecordHandle};
