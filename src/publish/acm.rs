use std::sync::Arc;

use aws_sdk_acm::{error::DisplayErrorContext, primitives::Blob, Client};

use super::{CertificateStoreT, PublishError, Result};
use crate::aws::AwsContext;

/// AWS Certificate Manager。
pub struct AcmCertificateStore {
    aws: Arc<AwsContext>,
    client: Client,
}

impl AcmCertificateStore {
    pub fn new(aws: Arc<AwsContext>) -> Self {
        let client = Client::new(aws.config());
        Self { aws, client }
    }
}

impl CertificateStoreT for AcmCertificateStore {
    fn import_certificate(
        &self,
        certificate: &[u8],
        chain: &[u8],
        private_key: &[u8],
        existing_arn: Option<&str>,
    ) -> Result<String> {
        let mut request = self
            .client
            .import_certificate()
            .certificate(Blob::new(certificate))
            .private_key(Blob::new(private_key))
            .set_certificate_arn(existing_arn.map(str::to_string));
        if !chain.is_empty() {
            request = request.certificate_chain(Blob::new(chain));
        }

        let output = self
            .aws
            .block_on(request.send())
            .map_err(|e| PublishError::CertificateStore(DisplayErrorContext(&e).to_string()))?;

        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| PublishError::CertificateStore("response carried no certificate ARN".into()))
    }
}
