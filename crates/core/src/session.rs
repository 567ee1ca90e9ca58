// Session tokens
//
// One token per batch. A failed exchange is fatal for the batch: nothing can be
// resolved or drained without it.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::BatchError;
use crate::traits::{ApiCredentials, ControlPlane, SessionToken};

/// Exchanges the long-lived API key for a short-lived session token
#[derive(Clone)]
pub struct SessionProvider {
    control_plane: Arc<dyn ControlPlane>,
    credentials: ApiCredentials,
}

impl SessionProvider {
    pub fn new(control_plane: Arc<dyn ControlPlane>, credentials: ApiCredentials) -> Self {
        Self {
            control_plane,
            credentials,
        }
    }

    /// Obtain a fresh token
    pub async fn acquire(&self) -> Result<SessionToken, BatchError> {
        match self.control_plane.exchange_token(&self.credentials).await {
            Ok(token) => {
                debug!(key_id = %self.credentials.key_id, "Obtained session token");
                Ok(token)
            }
            Err(e) => {
                error!(
                    key_id = %self.credentials.key_id,
                    error = %e,
                    "Failed to exchange API key for session token"
                );
                Err(BatchError::Authentication(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::memory::InMemoryControlPlane;

    #[tokio::test]
    async fn test_acquire_token() {
        let control_plane = InMemoryControlPlane::new();
        control_plane.set_token("jwt-1").await;
        let provider = SessionProvider::new(
            Arc::new(control_plane.clone()),
            ApiCredentials::new("key-id", "secret"),
        );

        let token = provider.acquire().await.unwrap();
        assert_eq!(token.as_str(), "jwt-1");
        assert_eq!(control_plane.token_exchanges().await, vec!["key-id".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_exchange_is_authentication_error() {
        let control_plane = InMemoryControlPlane::new();
        control_plane
            .fail_token_exchange(ApiError::rejected("invalid API key"))
            .await;
        let provider = SessionProvider::new(
            Arc::new(control_plane),
            ApiCredentials::new("key-id", "wrong"),
        );

        let err = provider.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            BatchError::Authentication(ApiError::Rejected(ref msg)) if msg == "invalid API key"
        ));
    }
}
