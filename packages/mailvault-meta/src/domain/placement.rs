//! Derived fields: `category` and `location`
//!
//! Both are computed from the caller's placement hint plus the record's
//! `internal_date`, the same way gmvault lays out its month directories
//! (`2012-09`, `chats/2012-09`).

use super::models::{fields, Category, FieldValue, Placement, Record};
use crate::error::{Result, StorageError};

/// Derived attributes for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    pub category: Category,
    pub location: String,
}

/// Compute `category` and `location` for a record
///
/// - `category` is `chat` when the first path segment is `chat_area`
/// - `location` is the normalized path; a bare area gets the `YYYY-MM` month
///   of `internal_date` appended
pub fn derive(record: &Record, placement: &Placement, chat_area: &str) -> Result<Derived> {
    let mut segments = normalize(placement)?;

    let category = match segments.first() {
        Some(first) if first == chat_area => Category::Chat,
        _ => Category::Email,
    };

    let area_only = match category {
        Category::Chat => segments.len() == 1,
        Category::Email => segments.is_empty(),
    };

    if area_only {
        let date = record.timestamp(fields::INTERNAL_DATE).ok_or_else(|| {
            StorageError::malformed(format!(
                "Placement '{}' names only a storage area and the record has no usable internal_date",
                placement.as_str()
            ))
        })?;
        segments.push(date.format("%Y-%m").to_string());
    }

    Ok(Derived {
        category,
        location: segments.join("/"),
    })
}

/// Overwrite the derived fields on `record`
pub fn apply(record: &mut Record, derived: &Derived) {
    record.insert(fields::CATEGORY, FieldValue::text(derived.category.as_str()));
    record.insert(fields::LOCATION, FieldValue::text(derived.location.clone()));
}

fn normalize(placement: &Placement) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for segment in placement.as_str().split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::malformed(format!(
                    "Placement '{}' escapes the storage root",
                    placement.as_str()
                )))
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}
