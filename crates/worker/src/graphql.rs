// GraphQL control plane client
//
// Every operation is a POST to `{endpoint}/graphql` with `{query, variables}`.
// The session token, when held, goes in `Authorization: Bearer`.

use std::time::Duration;

use async_trait::async_trait;
use drainer_core::{
    ApiCredentials, ApiError, ApiResult, ControlPlane, DrainAck, PoolWorker, SessionToken,
};
use reqwest::header::AUTHORIZATION;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const TOKEN_MUTATION: &str = r#"
mutation ExchangeApiKey($id: ID!, $secret: String!) {
  apiKeyUser(id: $id, secret: $secret) {
    jwt
  }
}"#;

const WORKER_POOL_QUERY: &str = r#"
query WorkerPoolWorkers($id: ID!) {
  workerPool(id: $id) {
    workers {
      id
      metadata
    }
  }
}"#;

const DRAIN_MUTATION: &str = r#"
mutation DrainWorker($workerPool: ID!, $id: ID!, $drain: Boolean!) {
  workerDrainSet(workerPool: $workerPool, id: $id, drain: $drain) {
    busy
  }
}"#;

#[derive(Error, Debug)]
pub enum GraphQlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("GraphQL errors: {0}")]
    Errors(String),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response is missing {0}")]
    MissingData(&'static str),
}

impl From<GraphQlError> for ApiError {
    fn from(error: GraphQlError) -> Self {
        match error {
            GraphQlError::Http(_) => ApiError::transport(error.to_string()),
            GraphQlError::Status { .. } | GraphQlError::Errors(_) => {
                ApiError::rejected(error.to_string())
            }
            GraphQlError::Decode(_) | GraphQlError::MissingData(_) => {
                ApiError::malformed(error.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyUserData {
    api_key_user: Option<ApiKeyUser>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyUser {
    jwt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerPoolData {
    worker_pool: Option<WorkerPool>,
}

#[derive(Debug, Deserialize)]
struct WorkerPool {
    workers: Vec<WorkerEntry>,
}

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    id: String,
    #[serde(default)]
    metadata: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerDrainSetData {
    worker_drain_set: Option<DrainState>,
}

#[derive(Debug, Deserialize)]
struct DrainState {
    busy: bool,
}

/// [`ControlPlane`] backed by the worker pool GraphQL API
pub struct GraphQlControlPlane {
    url: String,
    http: reqwest::Client,
}

impl GraphQlControlPlane {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GraphQlError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/graphql", endpoint.trim_end_matches('/')),
            http,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        token: Option<&SessionToken>,
    ) -> Result<T, GraphQlError> {
        let mut request = self.http.post(&self.url).json(&json!({
            "query": query,
            "variables": variables,
        }));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.as_str()));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(GraphQlError::Status {
                status: status.as_u16(),
                message: text,
            });
        }

        let body: GraphQlResponse<T> = serde_json::from_str(&text)?;
        if !body.errors.is_empty() {
            let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(GraphQlError::Errors(messages.join("; ")));
        }

        body.data.ok_or(GraphQlError::MissingData("data"))
    }
}

#[async_trait]
impl ControlPlane for GraphQlControlPlane {
    async fn exchange_token(&self, credentials: &ApiCredentials) -> ApiResult<SessionToken> {
        let data: ApiKeyUserData = self
            .execute(
                TOKEN_MUTATION,
                json!({ "id": credentials.key_id, "secret": credentials.secret }),
                None,
            )
            .await?;
        let user = data
            .api_key_user
            .ok_or(GraphQlError::MissingData("apiKeyUser"))?;
        Ok(SessionToken::new(user.jwt))
    }

    async fn list_pool_workers(
        &self,
        pool_id: &str,
        token: &SessionToken,
    ) -> ApiResult<Vec<PoolWorker>> {
        let data: WorkerPoolData = self
            .execute(WORKER_POOL_QUERY, json!({ "id": pool_id }), Some(token))
            .await?;
        let pool = data
            .worker_pool
            .ok_or(GraphQlError::MissingData("workerPool"))?;

        debug!(pool_id = %pool_id, count = pool.workers.len(), "Listed pool workers");
        Ok(pool
            .workers
            .into_iter()
            .map(|w| PoolWorker {
                id: w.id,
                metadata: w.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn request_drain(
        &self,
        pool_id: &str,
        worker_id: &str,
        token: &SessionToken,
    ) -> ApiResult<DrainAck> {
        let data: WorkerDrainSetData = self
            .execute(
                DRAIN_MUTATION,
                json!({ "workerPool": pool_id, "id": worker_id, "drain": true }),
                Some(token),
            )
            .await?;
        let state = data
            .worker_drain_set
            .ok_or(GraphQlError::MissingData("workerDrainSet"))?;
        Ok(DrainAck { busy: state.busy })
    }
}
