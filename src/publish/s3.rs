use std::sync::Arc;

use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream, Client};

use super::{ObjectStoreT, PublishError, Result};
use crate::aws::AwsContext;

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

/// 以 S3 bucket 作為物件儲存。
pub struct S3ObjectStore {
    aws: Arc<AwsContext>,
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(aws: Arc<AwsContext>, bucket: impl Into<String>) -> Self {
        let client = Client::new(aws.config());
        Self {
            aws,
            client,
            bucket: bucket.into(),
        }
    }
}

impl ObjectStoreT for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn store(&self, key: &str, payload: &[u8]) -> Result<()> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(payload.to_vec()))
            .content_type(PEM_CONTENT_TYPE)
            .send();

        self.aws
            .block_on(request)
            .map_err(|e| PublishError::ObjectStore {
                key: format!("s3://{}/{}", self.bucket, key),
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}
