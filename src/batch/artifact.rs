//! The output artifact: one CSV row per item with its sources and outputs.

use serde::{Deserialize, Serialize};

use super::validator::{IMAGES_COLUMN, NAME_COLUMN, split_references};
use crate::error::BatchError;
use crate::state_machine::Item;

pub const OUTPUTS_COLUMN: &str = "outputs";

/// A row of the output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub name: String,
    pub images: Vec<String>,
    pub outputs: Vec<String>,
}

impl ArtifactRow {
    /// Builds the row for `item`, resolving stored output keys to references.
    /// Failed references are already absent from the output list.
    pub fn from_item(item: &Item, resolve: impl Fn(&str) -> String) -> Self {
        Self {
            name: item.name.clone(),
            images: item.sources.clone(),
            outputs: item.output_keys().into_iter().map(resolve).collect(),
        }
    }
}

/// Serializes the artifact table, preserving item order.
pub fn build_artifact(
    items: &[Item],
    resolve: impl Fn(&str) -> String,
) -> Result<Vec<u8>, BatchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([NAME_COLUMN, IMAGES_COLUMN, OUTPUTS_COLUMN])?;
    for item in items {
        let row = ArtifactRow::from_item(item, &resolve);
        let images = row.images.join(",");
        let outputs = row.outputs.join(",");
        writer.write_record([row.name.as_str(), images.as_str(), outputs.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|e| BatchError::Io(e.into_error()))
}

/// Parses an artifact produced by [`build_artifact`].
#[cfg(test)]
pub fn parse_artifact(bytes: &[u8]) -> Result<Vec<ArtifactRow>, BatchError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default();
        rows.push(ArtifactRow {
            name: field(0).to_string(),
            images: split_references(field(1)),
            outputs: split_references(field(2)),
        });
    }
    Ok(rows)
}
