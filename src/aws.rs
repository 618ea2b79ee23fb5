//! AWS SDK 的共用設定。
//!
//! SDK 只提供非同步 API，而簽發流程是同步執行的，因此所有 AWS 呼叫都透過
//! 同一個單執行緒 tokio runtime 以 `block_on` 完成。

use std::future::Future;

use aws_config::{BehaviorVersion, SdkConfig};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

#[derive(Debug, Error)]
pub enum AwsError {
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// 已載入的 AWS 設定與執行 SDK 呼叫的 runtime。
pub struct AwsContext {
    runtime: Runtime,
    config: SdkConfig,
}

impl AwsContext {
    /// 依標準來源（環境變數、設定檔、執行角色）載入 AWS 設定。
    pub fn load() -> Result<Self, AwsError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let config = runtime.block_on(aws_config::defaults(BehaviorVersion::latest()).load());
        Ok(Self { runtime, config })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// 在共用 runtime 上執行非同步呼叫並等待結果。
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
