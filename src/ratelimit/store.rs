//! Tenant override persistence.
//!
//! The registry only ever reads overrides. Writes belong to whatever admin
//! surface owns the store, and every write path here validates records
//! before they become visible.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::policy::OverrideLimits;
use crate::error::{Result, TollgateError};

/// Permitted range for `requests_per_minute`.
pub const PER_MINUTE_RANGE: (u64, u64) = (1, 10_000);
/// Permitted range for `requests_per_hour`.
pub const PER_HOUR_RANGE: (u64, u64) = (1, 100_000);

/// One tenant's override row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub tenant_id: String,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl OverrideRecord {
    pub fn new(tenant_id: impl Into<String>, requests_per_minute: u32, requests_per_hour: u32) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            requests_per_minute,
            requests_per_hour,
            updated_at: Utc::now(),
            updated_by: None,
        }
    }

    /// Check both capacities against their permitted ranges.
    pub fn validate(&self) -> Result<()> {
        check_range("requests_per_minute", self.requests_per_minute, PER_MINUTE_RANGE)?;
        check_range("requests_per_hour", self.requests_per_hour, PER_HOUR_RANGE)?;
        Ok(())
    }

    pub fn limits(&self) -> OverrideLimits {
        OverrideLimits {
            per_minute: self.requests_per_minute,
            per_hour: self.requests_per_hour,
        }
    }
}

fn check_range(field: &'static str, value: u32, (min, max): (u64, u64)) -> Result<()> {
    let value = value as u64;
    if value < min || value > max {
        return Err(TollgateError::InvalidOverride {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Read-only lookup of tenant overrides.
///
/// `Ok(None)` means the tenant has no override and defaults apply.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn load_override(&self, tenant_id: &str) -> Result<Option<OverrideRecord>>;
}

/// A store with no overrides at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

#[async_trait]
impl OverrideStore for NoOverrides {
    async fn load_override(&self, _tenant_id: &str) -> Result<Option<OverrideRecord>> {
        Ok(None)
    }
}

/// Overrides held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryOverrideStore {
    records: DashMap<String, OverrideRecord>,
}

impl InMemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant's override after validating it.
    pub fn upsert(&self, record: OverrideRecord) -> Result<()> {
        record.validate()?;
        debug!(
            tenant = %record.tenant_id,
            per_minute = record.requests_per_minute,
            per_hour = record.requests_per_hour,
            "Storing tenant override"
        );
        self.records.insert(record.tenant_id.clone(), record);
        Ok(())
    }

    /// Delete a tenant's override, returning it if present.
    pub fn remove(&self, tenant_id: &str) -> Option<OverrideRecord> {
        self.records.remove(tenant_id).map(|(_, record)| record)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn load_override(&self, tenant_id: &str) -> Result<Option<OverrideRecord>> {
        Ok(self.records.get(tenant_id).map(|r| r.value().clone()))
    }
}

/// On-disk layout of a file-backed override store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideFile {
    #[serde(default)]
    pub overrides: Vec<OverrideRecord>,
}

impl OverrideFile {
    /// Parse a YAML document of override records.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Store(format!("Failed to parse override file: {}", e)))
    }

    /// Find and validate the record for a tenant. The last row wins when a
    /// tenant appears twice.
    pub fn find(&self, tenant_id: &str) -> Result<Option<OverrideRecord>> {
        match self.overrides.iter().rev().find(|r| r.tenant_id == tenant_id) {
            Some(record) => {
                record.validate()?;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Overrides read from a YAML file.
///
/// The file is re-read on every lookup; the override cache's TTL bounds how
/// often that happens.
#[derive(Debug, Clone)]
pub struct FileOverrideStore {
    path: PathBuf,
}

impl FileOverrideStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl OverrideStore for FileOverrideStore {
    async fn load_override(&self, tenant_id: &str) -> Result<Option<OverrideRecord>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TollgateError::Store(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        OverrideFile::from_yaml(&contents)?.find(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_accepts_range_bounds() {
        assert!(OverrideRecord::new("t", 1, 1).validate().is_ok());
        assert!(OverrideRecord::new("t", 10_000, 100_000).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let err = OverrideRecord::new("t", 0, 100).validate().unwrap_err();
        assert!(matches!(
            err,
            TollgateError::InvalidOverride {
                field: "requests_per_minute",
                ..
            }
        ));

        let err = OverrideRecord::new("t", 100, 100_001).validate().unwrap_err();
        assert!(matches!(
            err,
            TollgateError::InvalidOverride {
                field: "requests_per_hour",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_in_memory_upsert_and_load() {
        let store = InMemoryOverrideStore::new();
        store.upsert(OverrideRecord::new("acme", 200, 2000)).unwrap();

        let record = store.load_override("acme").await.unwrap().unwrap();
        assert_eq!(record.limits(), OverrideLimits { per_minute: 200, per_hour: 2000 });
        assert!(store.load_override("other").await.unwrap().is_none());
    }

    #[test]
    fn test_in_memory_upsert_rejects_invalid() {
        let store = InMemoryOverrideStore::new();
        assert!(store.upsert(OverrideRecord::new("acme", 20_000, 2000)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_in_memory_remove() {
        let store = InMemoryOverrideStore::new();
        store.upsert(OverrideRecord::new("acme", 200, 2000)).unwrap();

        assert!(store.remove("acme").is_some());
        assert!(tokio_test::block_on(store.load_override("acme")).unwrap().is_none());
    }

    #[test]
    fn test_parse_override_file() {
        let yaml = r#"
overrides:
  - tenant_id: acme
    requests_per_minute: 300
    requests_per_hour: 3000
    updated_by: admin@acme.test
  - tenant_id: globex
    requests_per_minute: 50
    requests_per_hour: 400
"#;
        let file = OverrideFile::from_yaml(yaml).unwrap();
        assert_eq!(file.overrides.len(), 2);

        let acme = file.find("acme").unwrap().unwrap();
        assert_eq!(acme.requests_per_minute, 300);
        assert_eq!(acme.updated_by.as_deref(), Some("admin@acme.test"));
        assert!(file.find("initech").unwrap().is_none());
    }

    #[test]
    fn test_override_file_invalid_row_is_an_error() {
        let yaml = r#"
overrides:
  - tenant_id: acme
    requests_per_minute: 0
    requests_per_hour: 3000
  - tenant_id: globex
    requests_per_minute: 50
    requests_per_hour: 400
"#;
        let file = OverrideFile::from_yaml(yaml).unwrap();
        assert!(file.find("acme").is_err());
        assert!(file.find("globex").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_rereads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "overrides:\n  - tenant_id: acme\n    requests_per_minute: 20\n    requests_per_hour: 200"
        )
        .unwrap();
        let store = FileOverrideStore::new(file.path());

        let record = store.load_override("acme").await.unwrap().unwrap();
        assert_eq!(record.requests_per_minute, 20);

        std::fs::write(
            file.path(),
            "overrides:\n  - tenant_id: acme\n    requests_per_minute: 40\n    requests_per_hour: 200\n",
        )
        .unwrap();
        let record = store.load_override("acme").await.unwrap().unwrap();
        assert_eq!(record.requests_per_minute, 40);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_store_error() {
        let store = FileOverrideStore::new("/nonexistent/tollgate/overrides.yaml");
        let err = store.load_override("acme").await.unwrap_err();
        assert!(matches!(err, TollgateError::Store(_)));
    }
}
