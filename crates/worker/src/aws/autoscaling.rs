use async_trait::async_trait;
use aws_sdk_autoscaling::Client;
use drainer_core::{ApiResult, LifecycleAction, LifecycleApi};
use tracing::debug;

use super::sdk_error;

/// Result sent with every completed lifecycle action
pub const LIFECYCLE_ACTION_CONTINUE: &str = "CONTINUE";

/// Completes Auto Scaling lifecycle actions so paused terminations proceed
#[derive(Clone)]
pub struct AutoScalingLifecycle {
    client: Client,
}

impl AutoScalingLifecycle {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LifecycleApi for AutoScalingLifecycle {
    async fn complete_lifecycle_action(&self, action: &LifecycleAction) -> ApiResult<()> {
        self.client
            .complete_lifecycle_action()
            .auto_scaling_group_name(&action.auto_scaling_group_name)
            .lifecycle_hook_name(&action.lifecycle_hook_name)
            .lifecycle_action_token(&action.lifecycle_action_token)
            .instance_id(&action.instance_id)
            .lifecycle_action_result(LIFECYCLE_ACTION_CONTINUE)
            .send()
            .await
            .map_err(sdk_error)?;

        debug!(
            instance_id = %action.instance_id,
            hook = %action.lifecycle_hook_name,
            group = %action.auto_scaling_group_name,
            "Completed lifecycle action"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::testing::autoscaling_client;
    use drainer_core::ApiError;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn action() -> LifecycleAction {
        LifecycleAction {
            instance_id: "i-0abc".to_string(),
            lifecycle_hook_name: "drain-hook".to_string(),
            auto_scaling_group_name: "workers-asg".to_string(),
            lifecycle_action_token: "71514b9d-6a40-4b26-8523-05e7ee".to_string(),
        }
    }

    fn xml(status: u16, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(body.to_string(), "text/xml")
    }

    #[tokio::test]
    async fn test_complete_sends_continue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=CompleteLifecycleAction"))
            .and(body_string_contains("LifecycleActionResult=CONTINUE"))
            .and(body_string_contains("AutoScalingGroupName=workers-asg"))
            .and(body_string_contains("LifecycleHookName=drain-hook"))
            .and(body_string_contains("InstanceId=i-0abc"))
            .and(body_string_contains(
                "LifecycleActionToken=71514b9d-6a40-4b26-8523-05e7ee",
            ))
            .respond_with(xml(
                200,
                r#"<CompleteLifecycleActionResponse xmlns="http://autoscaling.amazonaws.com/doc/2011-01-01/">
  <CompleteLifecycleActionResult/>
  <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>
</CompleteLifecycleActionResponse>"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        AutoScalingLifecycle::new(autoscaling_client(&server.uri()))
            .complete_lifecycle_action(&action())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_action_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(xml(
                400,
                r#"<ErrorResponse xmlns="http://autoscaling.amazonaws.com/doc/2011-01-01/">
  <Error>
    <Type>Sender</Type>
    <Code>ValidationError</Code>
    <Message>No active Lifecycle Action found with instance ID i-0abc</Message>
  </Error>
  <RequestId>req-2</RequestId>
</ErrorResponse>"#,
            ))
            .mount(&server)
            .await;

        let err = AutoScalingLifecycle::new(autoscaling_client(&server.uri()))
            .complete_lifecycle_action(&action())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected(_)), "got {:?}", err);
    }
}
