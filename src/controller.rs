use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::ResourceError;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ResourceKind {
    ComputeInstance,
    DatabaseInstance,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeInstance => "compute",
            ResourceKind::DatabaseInstance => "database",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "compute" => Ok(ResourceKind::ComputeInstance),
            "database" => Ok(ResourceKind::DatabaseInstance),
            other => Err(other.to_string()),
        }
    }
}

/// Live lifecycle state as reported by the provider. Never persisted.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum RuntimeState {
    Running,
    Stopped,
    Terminated,
    Unknown,
}

#[async_trait]
pub trait ResourceController: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Identifiers of resources currently eligible for the flag pass.
    async fn list_candidates(&self) -> Result<Vec<String>, ResourceError>;

    /// A resource the provider no longer knows about is `Terminated`.
    async fn current_state(&self, resource_id: &str) -> Result<RuntimeState, ResourceError>;

    /// Stop the resource. Returns the snapshot taken on the way, if any.
    async fn apply_protective_action(
        &self,
        resource_id: &str,
    ) -> Result<Option<String>, ResourceError>;

    async fn finalize_destructive(&self, resource_id: &str) -> Result<(), ResourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_round_trips_through_str() {
        assert_eq!(
            "compute".parse::<ResourceKind>(),
            Ok(ResourceKind::ComputeInstance)
        );
        assert_eq!(
            " database ".parse::<ResourceKind>(),
            Ok(ResourceKind::DatabaseInstance)
        );
        assert_eq!(
            "lambda".parse::<ResourceKind>(),
            Err("lambda".to_string())
        );
        assert_eq!(ResourceKind::DatabaseInstance.to_string(), "database");
    }
}
