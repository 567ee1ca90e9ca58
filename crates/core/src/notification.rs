// Termination notifications
//
// Queue bodies are parsed and validated in one step. The original JSON object is
// kept so a retry re-emits everything the producer sent, plus the updated retry state.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::retry::RetryState;

/// `Event` value Auto Scaling sends when a hook is first attached
pub const TEST_NOTIFICATION_EVENT: &str = "autoscaling:TEST_NOTIFICATION";

pub const FIELD_INSTANCE_ID: &str = "EC2InstanceId";
pub const FIELD_LIFECYCLE_HOOK_NAME: &str = "LifecycleHookName";
pub const FIELD_AUTO_SCALING_GROUP_NAME: &str = "AutoScalingGroupName";
pub const FIELD_LIFECYCLE_ACTION_TOKEN: &str = "LifecycleActionToken";
pub const FIELD_EVENT: &str = "Event";
pub const FIELD_RETRY: &str = "retry";

/// Why a queue body could not become a [`TerminationNotification`]
///
/// Retrying cannot repair any of these, so the notification is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedNotification {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("body is not a JSON object")]
    NotAnObject,

    #[error("missing required field {0}")]
    MissingField(&'static str),
}

/// The four identifiers needed to act on one paused termination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleAction {
    pub instance_id: String,
    pub lifecycle_hook_name: String,
    pub auto_scaling_group_name: String,
    /// Single-use token proving we may complete this specific lifecycle event
    pub lifecycle_action_token: String,
}

/// Result of parsing a queue body
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNotification {
    /// Heartbeat sent by Auto Scaling; nothing to do
    Test,
    Termination(TerminationNotification),
}

/// A validated pending instance termination
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationNotification {
    action: LifecycleAction,
    retry: Option<RetryState>,
    body: Map<String, Value>,
}

impl TerminationNotification {
    /// Parse and validate a raw queue body
    pub fn parse(raw: &str) -> Result<ParsedNotification, MalformedNotification> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| MalformedNotification::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON body
    pub fn from_value(value: Value) -> Result<ParsedNotification, MalformedNotification> {
        let Value::Object(body) = value else {
            return Err(MalformedNotification::NotAnObject);
        };

        if body.get(FIELD_EVENT).and_then(Value::as_str) == Some(TEST_NOTIFICATION_EVENT) {
            return Ok(ParsedNotification::Test);
        }

        let action = LifecycleAction {
            instance_id: required(&body, FIELD_INSTANCE_ID)?,
            lifecycle_hook_name: required(&body, FIELD_LIFECYCLE_HOOK_NAME)?,
            auto_scaling_group_name: required(&body, FIELD_AUTO_SCALING_GROUP_NAME)?,
            lifecycle_action_token: required(&body, FIELD_LIFECYCLE_ACTION_TOKEN)?,
        };

        let retry = body.get(FIELD_RETRY).and_then(|raw| {
            match serde_json::from_value::<RetryState>(raw.clone()) {
                Ok(state) => Some(state),
                Err(e) => {
                    // Next retry overwrites it with a valid state, so the ceiling still applies
                    warn!(
                        instance_id = %action.instance_id,
                        error = %e,
                        "Ignoring unreadable retry state"
                    );
                    None
                }
            }
        });

        Ok(ParsedNotification::Termination(Self {
            action,
            retry,
            body,
        }))
    }

    pub fn action(&self) -> &LifecycleAction {
        &self.action
    }

    pub fn instance_id(&self) -> &str {
        &self.action.instance_id
    }

    /// Retry state carried by this delivery, if it has failed before
    pub fn retry(&self) -> Option<&RetryState> {
        self.retry.as_ref()
    }

    /// Serialize the original body with `retry` replaced by the given state
    pub fn to_retry_body(&self, retry: &RetryState) -> String {
        let mut body = self.body.clone();
        body.insert(FIELD_RETRY.to_string(), retry.to_json());
        Value::Object(body).to_string()
    }
}

fn required(body: &Map<String, Value>, field: &'static str) -> Result<String, MalformedNotification> {
    match body.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(MalformedNotification::MissingField(field)),
    }
}
