use async_trait::async_trait;
use rusoto_ec2::{
    DescribeInstancesRequest, Ec2, Ec2Client, Filter, Instance, StopInstancesRequest,
    TerminateInstancesRequest,
};
use tracing::debug;

use crate::controller::{ResourceController, ResourceKind, RuntimeState};
use crate::error::{classify_rusoto_error, ResourceError};

const PAGE_SIZE: i64 = 100;

pub struct Ec2InstanceClient {
    client: Ec2Client,
}

impl Ec2InstanceClient {
    pub fn new_with_client(client: Ec2Client) -> Self {
        Ec2InstanceClient { client }
    }

    async fn describe(
        &self,
        request: DescribeInstancesRequest,
    ) -> Result<(Vec<Instance>, Option<String>), ResourceError> {
        let result = self
            .client
            .describe_instances(request)
            .await
            .map_err(|error| classify_rusoto_error(error, |e| ResourceError::Other(e.to_string())))?;

        let instances = result
            .reservations
            .unwrap_or_default()
            .into_iter()
            .flat_map(|reservation| reservation.instances.unwrap_or_default())
            .collect();
        Ok((instances, result.next_token))
    }
}

fn runtime_state(state_name: Option<&str>) -> RuntimeState {
    match state_name {
        Some("pending") | Some("running") => RuntimeState::Running,
        Some("stopping") | Some("stopped") => RuntimeState::Stopped,
        Some("shutting-down") | Some("terminated") => RuntimeState::Terminated,
        _ => RuntimeState::Unknown,
    }
}

#[async_trait]
impl ResourceController for Ec2InstanceClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ComputeInstance
    }

    async fn list_candidates(&self) -> Result<Vec<String>, ResourceError> {
        let mut instance_ids = Vec::new();
        let mut next_token = None;
        loop {
            let request = DescribeInstancesRequest {
                filters: Some(vec![Filter {
                    name: Some("instance-state-name".to_string()),
                    values: Some(vec!["running".to_string()]),
                }]),
                max_results: Some(PAGE_SIZE),
                next_token: next_token.take(),
                ..DescribeInstancesRequest::default()
            };
            let (instances, token) = self.describe(request).await?;
            instance_ids.extend(instances.into_iter().filter_map(|instance| instance.instance_id));

            match token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        Ok(instance_ids)
    }

    async fn current_state(&self, resource_id: &str) -> Result<RuntimeState, ResourceError> {
        let request = DescribeInstancesRequest {
            instance_ids: Some(vec![resource_id.to_string()]),
            ..DescribeInstancesRequest::default()
        };
        let instances = match self.describe(request).await {
            Ok((instances, _)) => instances,
            Err(error) if error.is_not_found() => return Ok(RuntimeState::Terminated),
            Err(error) => return Err(error),
        };

        let state = instances
            .into_iter()
            .find(|instance| instance.instance_id.as_deref() == Some(resource_id))
            .map(|instance| {
                runtime_state(
                    instance
                        .state
                        .as_ref()
                        .and_then(|state| state.name.as_deref()),
                )
            })
            .unwrap_or(RuntimeState::Terminated);
        debug!(resource_id, ?state, "described instance");
        Ok(state)
    }

    async fn apply_protective_action(
        &self,
        resource_id: &str,
    ) -> Result<Option<String>, ResourceError> {
        self.client
            .stop_instances(StopInstancesRequest {
                instance_ids: vec![resource_id.to_string()],
                ..StopInstancesRequest::default()
            })
            .await
            .map_err(|error| classify_rusoto_error(error, |e| ResourceError::Other(e.to_string())))?;
        Ok(None)
    }

    async fn finalize_destructive(&self, resource_id: &str) -> Result<(), ResourceError> {
        self.client
            .terminate_instances(TerminateInstancesRequest {
                instance_ids: vec![resource_id.to_string()],
                ..TerminateInstancesRequest::default()
            })
            .await
            .map_err(|error| classify_rusoto_error(error, |e| ResourceError::Other(e.to_string())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::controller::{ResourceController, RuntimeState};
    use crate::ec2_instance_client::{runtime_state, Ec2InstanceClient};
    use rusoto_ec2::Ec2Client;
    use rusoto_mock::{
        MockCredentialsProvider, MockRequestDispatcher, MockResponseReader, ReadMockResponse,
    };

    fn mock_client(status: u16, directory: &str, file: &str) -> Ec2InstanceClient {
        let mock = Ec2Client::new_with(
            MockRequestDispatcher::with_status(status)
                .with_body(&*MockResponseReader::read_response(directory, file)),
            MockCredentialsProvider,
            Default::default(),
        );
        Ec2InstanceClient::new_with_client(mock)
    }

    #[tokio::test]
    async fn test_list_candidates() {
        let client = mock_client(200, "test_resources/valid", "describe_running_instances.xml");
        let result = client.list_candidates().await;

        assert_eq!(
            result.unwrap(),
            vec![
                "i-1234567890abcdef0".to_string(),
                "i-0598c7d356eba48d7".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_current_state() {
        let client = mock_client(200, "test_resources/valid", "describe_instances.xml");
        let result = client.current_state("i-1234567890abcdef0").await;

        assert_eq!(result.unwrap(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_current_state_of_missing_instance_is_terminated() {
        let client = mock_client(400, "test_resources/error", "describe_instances.xml");
        let result = client.current_state("i-1234567890abcdef0").await;

        assert_eq!(result.unwrap(), RuntimeState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_failure_is_classified() {
        let client = mock_client(400, "test_resources/error", "describe_instances.xml");
        let result = client.apply_protective_action("i-1234567890abcdef0").await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_terminate() {
        let client = mock_client(200, "test_resources/valid", "terminate_instances.xml");
        let result = client.finalize_destructive("i-1234567890abcdef0").await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_terminate_missing_instance_is_not_found() {
        let client = mock_client(400, "test_resources/error", "describe_instances.xml");
        let result = client.finalize_destructive("i-1234567890abcdef0").await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_runtime_state_mapping() {
        assert_eq!(runtime_state(Some("pending")), RuntimeState::Running);
        assert_eq!(runtime_state(Some("stopping")), RuntimeState::Stopped);
        assert_eq!(runtime_state(Some("shutting-down")), RuntimeState::Terminated);
        assert_eq!(runtime_state(None), RuntimeState::Unknown);
    }
}
