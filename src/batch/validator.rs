//! Intake table parsing and per-row validation.
//!
//! A batch table is CSV with a `name` column and an `images` column holding a
//! comma-joined list of image URLs. Any bad row rejects the whole table.

use std::collections::HashMap;

use url::Url;

use crate::error::BatchError;
use crate::state_machine::Item;

pub const NAME_COLUMN: &str = "name";
pub const IMAGES_COLUMN: &str = "images";

/// Image extensions accepted at intake, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Parses a whole intake table into validated items, in row order.
pub fn parse_table(bytes: &[u8]) -> Result<Vec<Item>, BatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| BatchError::format(format!("unreadable header: {e}")))?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    for required in [NAME_COLUMN, IMAGES_COLUMN] {
        if !headers.iter().any(|h| h == required) {
            return Err(BatchError::format(format!("missing column `{required}`")));
        }
    }

    let mut items = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| BatchError::format(format!("row {}: {e}", index + 1)))?;
        let row: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        let item = validate_row(&row)
            .map_err(|e| BatchError::format(format!("row {}: {}", index + 1, message_of(e))))?;
        items.push(item);
    }

    if items.is_empty() {
        return Err(BatchError::format("table has no rows"));
    }
    Ok(items)
}

fn message_of(err: BatchError) -> String {
    match err {
        BatchError::Format(message) => message,
        other => other.to_string(),
    }
}

/// Validates one row (column name to cell) into an item skeleton.
pub fn validate_row(row: &HashMap<String, String>) -> Result<Item, BatchError> {
    let name = row
        .get(NAME_COLUMN)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BatchError::format("empty name"))?;

    let raw = row
        .get(IMAGES_COLUMN)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BatchError::format("empty image list"))?;

    let sources: Vec<String> = split_references(raw);
    if sources.is_empty() {
        return Err(BatchError::format("empty image list"));
    }
    for reference in &sources {
        validate_reference(reference)?;
    }

    Ok(Item::new(name.to_string(), sources))
}

/// Splits a comma-joined reference list, dropping blank entries.
pub fn split_references(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks that a reference is an http(s) URL ending in an allowed extension.
pub fn validate_reference(reference: &str) -> Result<(), BatchError> {
    let url = Url::parse(reference)
        .map_err(|e| BatchError::format(format!("invalid URL `{reference}`: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BatchError::format(format!(
            "unsupported scheme `{}` in `{reference}`",
            url.scheme()
        )));
    }

    let extension = extension_of(&url)
        .ok_or_else(|| BatchError::format(format!("no file extension in `{reference}`")))?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(BatchError::format(format!(
            "extension `.{extension}` not allowed in `{reference}`"
        )));
    }
    Ok(())
}

fn extension_of(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
