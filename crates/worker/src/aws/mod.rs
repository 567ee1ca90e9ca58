// AWS adapters
//
// SDK clients wrapped behind the drainer-core collaborator traits. Service errors
// (the service answered and refused) map to `ApiError::Rejected`; everything else
// the SDK reports (dispatch, timeout, response parsing) maps to `ApiError::Transport`.

mod autoscaling;
mod sqs;
mod ssm;

pub use autoscaling::{AutoScalingLifecycle, LIFECYCLE_ACTION_CONTINUE};
pub use sqs::SqsQueue;
pub use ssm::SsmSecretStore;

use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use drainer_core::ApiError;

pub(crate) fn sdk_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if err.as_service_error().is_some() {
        ApiError::rejected(message)
    } else {
        ApiError::transport(message)
    }
}
