pub mod aws;
pub mod config;
pub mod graphql;

// Re-export main types
pub use aws::{AutoScalingLifecycle, SqsQueue, SsmSecretStore};
pub use config::WorkerConfig;
pub use graphql::{GraphQlControlPlane, GraphQlError};
