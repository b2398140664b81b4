// Cache key derivation.
//
// Keys look like `<prefix><datasetId>:<page>:<limit>:<filterDigest>` so that a
// dataset's whole namespace shares the `<prefix><datasetId>:` prefix.

use crate::filter::normalize;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

/// Digest used for an absent or empty filter
pub const UNFILTERED: &str = "all";

/// Key for one page of one filtered read
#[must_use]
pub fn cache_key(prefix: &str, dataset_id: &str, page: u64, limit: u64, filter: &Json) -> String {
    format!(
        "{}{page}:{limit}:{}",
        namespace_prefix(prefix, dataset_id),
        filter_digest(filter)
    )
}

/// Prefix shared by every key of a dataset
#[must_use]
pub fn namespace_prefix(prefix: &str, dataset_id: &str) -> String {
    format!("{prefix}{dataset_id}:")
}

/// Hex SHA-256 of the normalized filter text
#[must_use]
pub fn filter_digest(filter: &Json) -> String {
    let empty = match filter {
        Json::Null => true,
        Json::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return UNFILTERED.to_string();
    }
    let text = normalize(filter).to_string();
    hex::encode(Sha256::digest(text.as_bytes()))
}
