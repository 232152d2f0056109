//! Exported record model and identifier parsing
//!
//! Documents carry their identity as a namespaced URI such as
//! `https://openalex.org/W2741809807`, both as the store's document id
//! (`_id`) and in the `id` field of the source. The store id is
//! authoritative; the source field is the fallback for stores that do not
//! return one. The integer after the entity's type prefix is what the dedup
//! store tracks.

use serde_json::Value;
use snapex_common::{Result, SnapexError};

use crate::store::{Cursor, Hit};

/// Source field holding the namespaced id when the hit carries no store id
pub const ID_FIELD: &str = "id";

/// One document accepted from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u64,
    pub partition_key: String,
    pub payload: Value,
    pub sort_key: Cursor,
}

impl Record {
    /// Build a record from a store hit, parsing its namespaced id.
    pub fn from_hit(hit: Hit, partition_key: &str, id_prefix: &str) -> Result<Self> {
        let raw_id = hit
            .id
            .as_deref()
            .or_else(|| hit.source.get(ID_FIELD).and_then(Value::as_str))
            .ok_or_else(|| SnapexError::Parse(format!("document has no _id and no string '{}' field", ID_FIELD)))?;
        let id = parse_record_id(raw_id, id_prefix)?;

        Ok(Self {
            id,
            partition_key: partition_key.to_string(),
            payload: hit.source,
            sort_key: Cursor::new(hit.sort),
        })
    }
}

/// Prefix preceding the integer id for an entity type:
/// namespace plus the upper-cased first letter of the entity name.
///
/// `id_prefix("https://openalex.org/", "works") == "https://openalex.org/W"`
pub fn id_prefix(namespace: &str, entity_type: &str) -> String {
    let letter: String = entity_type
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default();
    format!("{}{}", namespace, letter)
}

/// Strip `prefix` from `raw` and parse the remainder as an integer.
pub fn parse_record_id(raw: &str, prefix: &str) -> Result<u64> {
    let digits = raw
        .trim()
        .strip_prefix(prefix)
        .ok_or_else(|| SnapexError::Parse(format!("record id '{}' lacks prefix '{}'", raw, prefix)))?;

    digits
        .parse::<u64>()
        .map_err(|_| SnapexError::Parse(format!("record id '{}' is not an integer", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_record_id() {
        assert_eq!(parse_record_id("https://openalex.org/W123", "https://openalex.org/W").unwrap(), 123);
        assert!(parse_record_id("https://openalex.org/Wabc", "https://openalex.org/W").is_err());
        assert!(parse_record_id("https://openalex.org/A123", "https://openalex.org/W").is_err());
        assert!(parse_record_id("https://openalex.org/W", "https://openalex.org/W").is_err());
        assert!(parse_record_id("https://openalex.org/W-5", "https://openalex.org/W").is_err());
    }

    #[test]
    fn test_id_prefix() {
        assert_eq!(id_prefix("https://openalex.org/", "works"), "https://openalex.org/W");
        assert_eq!(id_prefix("https://openalex.org/", "institutions"), "https://openalex.org/I");
        assert_eq!(id_prefix("https://openalex.org/", ""), "https://openalex.org/");
    }

    #[test]
    fn test_from_hit() {
        let hit = Hit {
            id: None,
            source: json!({"id": "https://openalex.org/A42", "display_name": "Ada"}),
            sort: vec![json!(3), json!("https://openalex.org/A42")],
        };
        let record = Record::from_hit(hit, "2024-01-02", "https://openalex.org/A").unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.partition_key, "2024-01-02");
        assert_eq!(record.payload["display_name"], "Ada");
        assert_eq!(record.sort_key.values().len(), 2);
    }

    #[test]
    fn test_from_hit_without_id() {
        let hit = Hit {
            id: None,
            source: json!({"display_name": "no id"}),
            sort: vec![],
        };
        assert!(matches!(
            Record::from_hit(hit, "2024-01-02", "https://openalex.org/A"),
            Err(SnapexError::Parse(_))
        ));
    }

    #[test]
    fn test_from_hit_prefers_store_id() {
        let hit = Hit {
            id: Some("https://openalex.org/A7".to_string()),
            source: json!({"id": "https://openalex.org/A42"}),
            sort: vec![],
        };
        let record = Record::from_hit(hit, "2024-01-02", "https://openalex.org/A").unwrap();
        assert_eq!(record.id, 7);
    }
}
