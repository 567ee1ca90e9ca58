use async_trait::async_trait;
use aws_sdk_ssm::Client;
use drainer_core::{ApiError, ApiResult, SecretStore};

use super::sdk_error;

/// Reads SecureString parameters from SSM Parameter Store
#[derive(Clone)]
pub struct SsmSecretStore {
    client: Client,
}

impl SsmSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn fetch_secret(&self, name: &str) -> ApiResult<String> {
        let output = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(sdk_error)?;

        output
            .parameter
            .and_then(|p| p.value)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::malformed(format!("parameter {} has no value", name)))
    }
}
