use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    AttributeValue, DeleteItemInput, DynamoDb, DynamoDbClient, GetItemInput, PutItemInput,
    ScanError, ScanInput,
};
use tracing::warn;

use crate::controller::ResourceKind;
use crate::error::ReaperError;

const RESOURCE_ID: &str = "resource_id";
const RESOURCE_KIND: &str = "resource_kind";
const SNAPSHOT_ID: &str = "snapshot_id";
const FLAGGED_AT: &str = "flagged_at";
const NOTE: &str = "note";

#[derive(Debug, PartialEq, Clone)]
pub enum TrackedKind {
    Compute,
    Database { snapshot_id: String },
}

/// Bookmark for a resource that has been stopped and awaits finalization.
#[derive(Debug, PartialEq, Clone)]
pub struct TrackedResource {
    pub resource_id: String,
    pub flagged_at: DateTime<Utc>,
    pub note: String,
    pub kind: TrackedKind,
}

impl TrackedResource {
    pub fn resource_kind(&self) -> ResourceKind {
        match self.kind {
            TrackedKind::Compute => ResourceKind::ComputeInstance,
            TrackedKind::Database { .. } => ResourceKind::DatabaseInstance,
        }
    }

    pub fn snapshot_id(&self) -> Option<&str> {
        match &self.kind {
            TrackedKind::Compute => None,
            TrackedKind::Database { snapshot_id } => Some(snapshot_id),
        }
    }

    fn to_item(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert(RESOURCE_ID.to_string(), string_value(&self.resource_id));
        item.insert(
            RESOURCE_KIND.to_string(),
            string_value(self.resource_kind().as_str()),
        );
        item.insert(
            FLAGGED_AT.to_string(),
            string_value(&self.flagged_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        item.insert(NOTE.to_string(), string_value(&self.note));
        if let Some(snapshot_id) = self.snapshot_id() {
            item.insert(SNAPSHOT_ID.to_string(), string_value(snapshot_id));
        }
        item
    }

    fn from_item(item: &HashMap<String, AttributeValue>) -> Result<Self, ReaperError> {
        let resource_id = string_attribute(item, RESOURCE_ID)
            .ok_or_else(|| ReaperError::Store(format!("record without {}", RESOURCE_ID)))?;
        let flagged_at = string_attribute(item, FLAGGED_AT)
            .ok_or_else(|| ReaperError::Store(format!("{} has no {}", resource_id, FLAGGED_AT)))
            .and_then(|value| parse_timestamp(&value))?;
        let note = string_attribute(item, NOTE).unwrap_or_default();
        let snapshot_id = string_attribute(item, SNAPSHOT_ID);

        let kind = string_attribute(item, RESOURCE_KIND)
            .ok_or_else(|| ReaperError::Store(format!("{} has no {}", resource_id, RESOURCE_KIND)))?
            .parse::<ResourceKind>()
            .map_err(|kind| ReaperError::Store(format!("{} has unknown kind {}", resource_id, kind)))?;
        let kind = match kind {
            ResourceKind::ComputeInstance => TrackedKind::Compute,
            ResourceKind::DatabaseInstance => TrackedKind::Database {
                snapshot_id: snapshot_id.ok_or_else(|| {
                    ReaperError::Store(format!("{} has no {}", resource_id, SNAPSHOT_ID))
                })?,
            },
        };

        Ok(TrackedResource {
            resource_id,
            flagged_at,
            note,
            kind,
        })
    }
}

/// Timestamps are RFC 3339; naive ISO-8601 values are read as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ReaperError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|error| ReaperError::Store(format!("invalid timestamp {}: {}", value, error)))
}

fn string_value(value: &str) -> AttributeValue {
    AttributeValue {
        s: Some(value.to_string()),
        ..AttributeValue::default()
    }
}

fn string_attribute(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|value| value.s.clone())
}

fn key_of(resource_id: &str) -> HashMap<String, AttributeValue> {
    let mut key = HashMap::new();
    key.insert(RESOURCE_ID.to_string(), string_value(resource_id));
    key
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get(&self, resource_id: &str) -> Result<Option<TrackedResource>, ReaperError>;

    /// Unconditional overwrite.
    async fn put(&self, resource: &TrackedResource) -> Result<(), ReaperError>;

    async fn delete(&self, resource_id: &str) -> Result<(), ReaperError>;

    async fn scan(&self) -> Result<Vec<TrackedResource>, ReaperError>;
}

pub struct DynamoDbTrackingStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbTrackingStore {
    pub fn new_with_client(client: DynamoDbClient, table_name: &str) -> Self {
        DynamoDbTrackingStore {
            client,
            table_name: table_name.to_string(),
        }
    }
}

#[async_trait]
impl TrackingStore for DynamoDbTrackingStore {
    async fn get(&self, resource_id: &str) -> Result<Option<TrackedResource>, ReaperError> {
        let output = self
            .client
            .get_item(GetItemInput {
                table_name: self.table_name.clone(),
                key: key_of(resource_id),
                consistent_read: Some(true),
                ..GetItemInput::default()
            })
            .await
            .map_err(|error| ReaperError::Store(error.to_string()))?;
        output
            .item
            .map(|item| TrackedResource::from_item(&item))
            .transpose()
    }

    async fn put(&self, resource: &TrackedResource) -> Result<(), ReaperError> {
        self.client
            .put_item(PutItemInput {
                table_name: self.table_name.clone(),
                item: resource.to_item(),
                ..PutItemInput::default()
            })
            .await
            .map_err(|error| ReaperError::Store(error.to_string()))?;
        Ok(())
    }

    async fn delete(&self, resource_id: &str) -> Result<(), ReaperError> {
        self.client
            .delete_item(DeleteItemInput {
                table_name: self.table_name.clone(),
                key: key_of(resource_id),
                ..DeleteItemInput::default()
            })
            .await
            .map_err(|error| ReaperError::Store(error.to_string()))?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<TrackedResource>, ReaperError> {
        let mut resources = Vec::new();
        let mut exclusive_start_key = None;
        loop {
            let output = self
                .client
                .scan(ScanInput {
                    table_name: self.table_name.clone(),
                    exclusive_start_key: exclusive_start_key.take(),
                    ..ScanInput::default()
                })
                .await
                .map_err(|error| match error {
                    RusotoError::Service(ScanError::ResourceNotFound(_)) => {
                        ReaperError::TrackingTableNotFound(self.table_name.clone())
                    }
                    other => ReaperError::Store(other.to_string()),
                })?;

            for item in output.items.unwrap_or_default() {
                match TrackedResource::from_item(&item) {
                    Ok(resource) => resources.push(resource),
                    Err(error) => warn!(table = %self.table_name, %error, "skipping malformed tracking record"),
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => exclusive_start_key = Some(key),
                _ => break,
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{TrackedResource, TrackingStore};
    use crate::error::ReaperError;

    #[derive(Default)]
    pub struct InMemoryTrackingStore {
        records: Mutex<BTreeMap<String, TrackedResource>>,
        fail_puts: bool,
    }

    impl InMemoryTrackingStore {
        pub fn with_records(records: Vec<TrackedResource>) -> Self {
            InMemoryTrackingStore {
                records: Mutex::new(
                    records
                        .into_iter()
                        .map(|record| (record.resource_id.clone(), record))
                        .collect(),
                ),
                fail_puts: false,
            }
        }

        pub fn rejecting_puts() -> Self {
            InMemoryTrackingStore {
                fail_puts: true,
                ..InMemoryTrackingStore::default()
            }
        }

        pub fn snapshot(&self) -> Vec<TrackedResource> {
            self.records.lock().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl TrackingStore for InMemoryTrackingStore {
        async fn get(&self, resource_id: &str) -> Result<Option<TrackedResource>, ReaperError> {
            Ok(self.records.lock().unwrap().get(resource_id).cloned())
        }

        async fn put(&self, resource: &TrackedResource) -> Result<(), ReaperError> {
            if self.fail_puts {
                return Err(ReaperError::Store("put rejected".to_string()));
            }
            self.records
                .lock()
                .unwrap()
                .insert(resource.resource_id.clone(), resource.clone());
            Ok(())
        }

        async fn delete(&self, resource_id: &str) -> Result<(), ReaperError> {
            self.records.lock().unwrap().remove(resource_id);
            Ok(())
        }

        async fn scan(&self) -> Result<Vec<TrackedResource>, ReaperError> {
            Ok(self.snapshot())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusoto_mock::{MockCredentialsProvider, MockRequestDispatcher};

    fn store_with_body(status: u16, body: &str) -> DynamoDbTrackingStore {
        let client = DynamoDbClient::new_with(
            MockRequestDispatcher::with_status(status).with_body(body),
            MockCredentialsProvider,
            Default::default(),
        );
        DynamoDbTrackingStore::new_with_client(client, "idle-reaper-tracking")
    }

    #[tokio::test]
    async fn test_scan_reads_both_kinds_and_skips_malformed_records() {
        let store = store_with_body(
            200,
            r#"{
                "Count": 4,
                "Items": [
                    {
                        "resource_id": {"S": "i-1234567890abcdef0"},
                        "resource_kind": {"S": "compute"},
                        "flagged_at": {"S": "2021-03-01T09:00:00Z"},
                        "note": {"S": "Instance stopped due to low utilization."}
                    },
                    {
                        "resource_id": {"S": "orders-db"},
                        "resource_kind": {"S": "database"},
                        "snapshot_id": {"S": "orders-db-reaper-20210301090000"},
                        "flagged_at": {"S": "2021-03-01T09:00:00.123456"},
                        "note": {"S": "Instance stopped due to inactivity"}
                    },
                    {
                        "resource_id": {"S": "i-0598c7d356eba48d7"},
                        "resource_kind": {"S": "compute"},
                        "flagged_at": {"S": "yesterday"}
                    },
                    {
                        "resource_id": {"S": "i-0f1e2d3c4b5a69788"},
                        "flagged_at": {"S": "2021-03-01T09:00:00Z"}
                    }
                ],
                "ScannedCount": 4
            }"#,
        );

        let records = store.scan().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, TrackedKind::Compute);
        assert_eq!(
            records[0].flagged_at,
            Utc.ymd(2021, 3, 1).and_hms(9, 0, 0)
        );
        assert_eq!(
            records[1].kind,
            TrackedKind::Database {
                snapshot_id: "orders-db-reaper-20210301090000".to_string()
            }
        );
        assert_eq!(
            records[1].flagged_at,
            Utc.ymd(2021, 3, 1).and_hms_micro(9, 0, 0, 123456)
        );
    }

    #[tokio::test]
    async fn test_scan_missing_table() {
        let store = store_with_body(
            400,
            r#"{"__type": "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException",
                "message": "Requested resource not found"}"#,
        );

        let result = store.scan().await;

        assert_eq!(
            result.unwrap_err(),
            ReaperError::TrackingTableNotFound("idle-reaper-tracking".to_string())
        );
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let store = store_with_body(200, "{}");

        assert_eq!(store.get("i-1234567890abcdef0").await.unwrap(), None);
    }

    #[test]
    fn test_item_layout() {
        let record = TrackedResource {
            resource_id: "orders-db".to_string(),
            flagged_at: Utc.ymd(2021, 3, 1).and_hms(9, 0, 0),
            note: "Instance stopped due to inactivity".to_string(),
            kind: TrackedKind::Database {
                snapshot_id: "orders-db-reaper-20210301090000".to_string(),
            },
        };

        let item = record.to_item();

        assert_eq!(
            string_attribute(&item, FLAGGED_AT).as_deref(),
            Some("2021-03-01T09:00:00Z")
        );
        assert_eq!(
            string_attribute(&item, RESOURCE_KIND).as_deref(),
            Some("database")
        );
        assert_eq!(TrackedResource::from_item(&item).unwrap(), record);
    }

    #[test]
    fn test_database_record_without_snapshot_is_rejected() {
        let mut item = key_of("orders-db");
        item.insert(RESOURCE_KIND.to_string(), string_value("database"));
        item.insert(FLAGGED_AT.to_string(), string_value("2021-03-01T09:00:00Z"));

        assert!(TrackedResource::from_item(&item).is_err());
    }

    #[test]
    fn test_record_without_kind_is_rejected() {
        let mut item = key_of("i-1234567890abcdef0");
        item.insert(FLAGGED_AT.to_string(), string_value("2021-03-01T09:00:00Z"));
        item.insert(SNAPSHOT_ID.to_string(), string_value("orders-db-reaper-20210301090000"));

        let result = TrackedResource::from_item(&item);

        assert_eq!(
            result.unwrap_err(),
            ReaperError::Store("i-1234567890abcdef0 has no resource_kind".to_string())
        );
    }
}
