use async_trait::async_trait;
use chrono::Utc;
use rusoto_rds::{
    DBInstance, DeleteDBInstanceError, DeleteDBInstanceMessage, DescribeDBInstancesError,
    DescribeDBInstancesMessage, Rds, RdsClient, StopDBInstanceError, StopDBInstanceMessage,
};
use tracing::debug;

use crate::controller::{ResourceController, ResourceKind, RuntimeState};
use crate::error::{classify_rusoto_error, ResourceError};

const PAGE_SIZE: i64 = 100;

pub struct RdsInstanceClient {
    client: RdsClient,
}

impl RdsInstanceClient {
    pub fn new_with_client(client: RdsClient) -> Self {
        RdsInstanceClient { client }
    }

    async fn describe(
        &self,
        request: DescribeDBInstancesMessage,
    ) -> Result<(Vec<DBInstance>, Option<String>), ResourceError> {
        let result = self
            .client
            .describe_db_instances(request)
            .await
            .map_err(|error| {
                classify_rusoto_error(error, |e| match e {
                    DescribeDBInstancesError::DBInstanceNotFoundFault(message) => {
                        ResourceError::NotFound(message)
                    }
                })
            })?;
        Ok((result.db_instances.unwrap_or_default(), result.marker))
    }
}

fn runtime_state(status: Option<&str>) -> RuntimeState {
    match status {
        Some("available") | Some("starting") | Some("rebooting") => RuntimeState::Running,
        Some("stopping") | Some("stopped") => RuntimeState::Stopped,
        Some("deleting") => RuntimeState::Terminated,
        _ => RuntimeState::Unknown,
    }
}

fn snapshot_identifier(db_instance_id: &str) -> String {
    format!(
        "{}-reaper-{}",
        db_instance_id,
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

#[async_trait]
impl ResourceController for RdsInstanceClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DatabaseInstance
    }

    async fn list_candidates(&self) -> Result<Vec<String>, ResourceError> {
        let mut identifiers = Vec::new();
        let mut marker = None;
        loop {
            let request = DescribeDBInstancesMessage {
                max_records: Some(PAGE_SIZE),
                marker: marker.take(),
                ..DescribeDBInstancesMessage::default()
            };
            let (instances, next_marker) = self.describe(request).await?;
            identifiers.extend(
                instances
                    .into_iter()
                    .filter(|instance| instance.db_instance_status.as_deref() == Some("available"))
                    .filter_map(|instance| instance.db_instance_identifier),
            );

            match next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }
        Ok(identifiers)
    }

    async fn current_state(&self, resource_id: &str) -> Result<RuntimeState, ResourceError> {
        let request = DescribeDBInstancesMessage {
            db_instance_identifier: Some(resource_id.to_string()),
            ..DescribeDBInstancesMessage::default()
        };
        let instances = match self.describe(request).await {
            Ok((instances, _)) => instances,
            Err(error) if error.is_not_found() => return Ok(RuntimeState::Terminated),
            Err(error) => return Err(error),
        };

        let state = instances
            .into_iter()
            .find(|instance| instance.db_instance_identifier.as_deref() == Some(resource_id))
            .map(|instance| runtime_state(instance.db_instance_status.as_deref()))
            .unwrap_or(RuntimeState::Terminated);
        debug!(resource_id, ?state, "described db instance");
        Ok(state)
    }

    /// Stops the instance, letting RDS take the snapshot before it shuts down.
    async fn apply_protective_action(
        &self,
        resource_id: &str,
    ) -> Result<Option<String>, ResourceError> {
        let snapshot_id = snapshot_identifier(resource_id);
        self.client
            .stop_db_instance(StopDBInstanceMessage {
                db_instance_identifier: resource_id.to_string(),
                db_snapshot_identifier: Some(snapshot_id.clone()),
            })
            .await
            .map_err(|error| {
                classify_rusoto_error(error, |e| match e {
                    StopDBInstanceError::DBInstanceNotFoundFault(message) => {
                        ResourceError::NotFound(message)
                    }
                    StopDBInstanceError::InvalidDBInstanceStateFault(message) => {
                        ResourceError::Transient(message)
                    }
                    other => ResourceError::Other(other.to_string()),
                })
            })?;
        Ok(Some(snapshot_id))
    }

    async fn finalize_destructive(&self, resource_id: &str) -> Result<(), ResourceError> {
        self.client
            .delete_db_instance(DeleteDBInstanceMessage {
                db_instance_identifier: resource_id.to_string(),
                skip_final_snapshot: Some(true),
                ..DeleteDBInstanceMessage::default()
            })
            .await
            .map_err(|error| {
                classify_rusoto_error(error, |e| match e {
                    DeleteDBInstanceError::DBInstanceNotFoundFault(message) => {
                        ResourceError::NotFound(message)
                    }
                    DeleteDBInstanceError::InvalidDBInstanceStateFault(message) => {
                        ResourceError::Transient(message)
                    }
                    other => ResourceError::Other(other.to_string()),
                })
            })?;
        Ok(())
    }
}
