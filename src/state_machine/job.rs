use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;

/// One named unit of a batch carrying one or more image references.
///
/// `stored` is filled by the fetcher and `outputs` by the aggregator. Once the
/// pipeline is done with the item all three lists have the same length;
/// `None` in `outputs` marks a reference whose transform failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub stored: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<Option<String>>,
}

impl Item {
    pub fn new(name: String, sources: Vec<String>) -> Self {
        Self {
            name,
            sources,
            stored: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Output locations with failed references dropped, in source order.
    pub fn output_keys(&self) -> Vec<&str> {
        self.outputs.iter().flatten().map(String::as_str).collect()
    }

    /// True when at least one reference failed to transform.
    pub fn is_partial(&self) -> bool {
        self.outputs.iter().any(Option::is_none)
    }
}

/// A batch request. The item list is fixed at intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub items: Vec<Item>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            items,
            created_at: Utc::now(),
        }
    }

    /// Number of references across all items.
    pub fn reference_count(&self) -> usize {
        self.items.iter().map(|item| item.sources.len()).sum()
    }
}

/// The queryable status of a job. Exactly one per job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRecord {
    /// A fresh `processing` record, written at intake.
    pub fn processing(job_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            state: JobState::Processing,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }
}

/// One `(reference, stored location)` pair of a persisted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedRef {
    pub reference: String,
    pub location: String,
}

/// Durable per-item record written by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub job_id: String,
    /// Index of the item in the intake table.
    pub position: usize,
    pub name: String,
    pub inputs: Vec<LocatedRef>,
    pub outputs: Vec<LocatedRef>,
    pub written_at: DateTime<Utc>,
}
