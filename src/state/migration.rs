//! Schema migration support for board documents.
//!
//! Handles upgrading raw documents from older schema versions to the target
//! version. Migrations are applied sequentially, one version step at a time,
//! and only ever add fields with safe defaults.

use serde_json::{json, Map, Value};

use crate::error::{BoardkitError, Result};

/// Current schema version for board documents.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Version assumed for documents saved before the field existed.
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Takes a raw document at version `n` and returns it at version `n + 1`.
type MigrationFn = fn(Value) -> Result<Value>;

/// Ordered migration chain. Entry `i` upgrades version `i + 1` to `i + 2`.
const MIGRATIONS: &[MigrationFn] = &[migrate_v1_to_v2, migrate_v2_to_v3];

/// Read the schema version of a raw document.
///
/// A missing version means a legacy document. A version that is not a
/// positive integer cannot be interpreted and is rejected.
pub fn schema_version(data: &Value) -> Result<u32> {
    match data.get("version") {
        None | Some(Value::Null) => Ok(LEGACY_SCHEMA_VERSION),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= 1)
            .ok_or_else(|| BoardkitError::InvalidSchemaVersion {
                value: n.to_string(),
            }),
        Some(other) => Err(BoardkitError::InvalidSchemaVersion {
            value: other.to_string(),
        }),
    }
}

/// Migrate a raw document to the current schema version.
pub fn migrate_document(data: Value) -> Result<Value> {
    migrate_to(data, CURRENT_SCHEMA_VERSION)
}

/// Migrate a raw document from its recorded version up to `target`.
///
/// # Errors
/// Returns `BoardkitError::FatalLoad` when the document is newer than `target`;
/// there is no downgrade path.
pub fn migrate_to(mut data: Value, target: u32) -> Result<Value> {
    if !data.is_object() {
        return Err(BoardkitError::MalformedDocument {
            reason: "document root is not an object".to_string(),
        });
    }

    let current = schema_version(&data)?;

    if current > target {
        return Err(BoardkitError::FatalLoad {
            found: current,
            supported: target,
        });
    }

    for (from, to) in migration_path(current, target) {
        let step = MIGRATIONS
            .get((from - 1) as usize)
            .ok_or_else(|| BoardkitError::MigrationFailed {
                from,
                to,
                reason: "no migration registered".to_string(),
            })?;

        data = step(data).map_err(|e| BoardkitError::MigrationFailed {
            from,
            to,
            reason: e.to_string(),
        })?;

        if let Some(obj) = data.as_object_mut() {
            obj.insert("version".to_string(), json!(to));
        }
        log::debug!("migrated document from v{} to v{}", from, to);
    }

    // Legacy documents have no version field at all.
    if let Some(obj) = data.as_object_mut() {
        obj.insert("version".to_string(), json!(target));
    }

    Ok(data)
}

/// The sequence of single-step migrations from one version to another.
///
/// Empty when `from >= to`.
pub fn migration_path(from: u32, to: u32) -> Vec<(u32, u32)> {
    (from..to).map(|v| (v, v + 1)).collect()
}

fn object_mut<'a>(data: &'a mut Value, field: &str) -> Option<&'a mut Map<String, Value>> {
    data.get_mut(field).and_then(Value::as_object_mut)
}

/// v1 -> v2: canvas elements and explicit widget visibility.
fn migrate_v1_to_v2(mut data: Value) -> Result<Value> {
    if let Some(root) = data.as_object_mut() {
        root.entry("board").or_insert_with(|| json!({}));
    }

    if let Some(board) = object_mut(&mut data, "board") {
        board.entry("elements").or_insert_with(|| json!([]));

        if let Some(widgets) = board.get_mut("widgets").and_then(Value::as_array_mut) {
            for widget in widgets.iter_mut().filter_map(Value::as_object_mut) {
                widget
                    .entry("visibility")
                    .or_insert_with(|| json!("visible"));
            }
        }
    }

    Ok(data)
}

/// v2 -> v3: persisted data-sharing permissions and links.
fn migrate_v2_to_v3(mut data: Value) -> Result<Value> {
    if let Some(root) = data.as_object_mut() {
        let sharing = root
            .entry("dataSharing")
            .or_insert_with(|| json!({}));
        if let Some(sharing) = sharing.as_object_mut() {
            sharing.entry("permissions").or_insert_with(|| json!([]));
            sharing.entry("links").or_insert_with(|| json!([]));
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn v1_document() -> Value {
        json!({
            "version": 1,
            "id": "doc-1",
            "meta": {
                "title": "Legacy",
                "createdAt": "2024-01-01T00:00:00Z",
                "updatedAt": "2024-01-01T00:00:00Z"
            },
            "board": {
                "viewport": {"x": 0.0, "y": 0.0, "zoom": 1.0},
                "widgets": [
                    {"id": "w1", "moduleId": "todo", "rect": {"x": 0.0, "y": 0.0, "w": 200.0, "h": 100.0}, "zIndex": 1}
                ]
            },
            "modules": {"w1": {"items": []}}
        })
    }

    #[test]
    fn test_migrate_current_version_unchanged() {
        let mut doc = migrate_document(v1_document()).unwrap();
        doc["meta"]["title"] = json!("Current");

        let result = migrate_document(doc.clone()).unwrap();
        pretty_assertions::assert_eq!(result, doc);
    }

    #[test]
    fn test_migrate_v1_adds_fields_without_dropping_data() {
        let result = migrate_document(v1_document()).unwrap();

        pretty_assertions::assert_eq!(result["version"], json!(CURRENT_SCHEMA_VERSION));
        pretty_assertions::assert_eq!(result["board"]["elements"], json!([]));
        pretty_assertions::assert_eq!(result["board"]["widgets"][0]["visibility"], json!("visible"));
        pretty_assertions::assert_eq!(result["dataSharing"], json!({"permissions": [], "links": []}));
        pretty_assertions::assert_eq!(result["modules"], json!({"w1": {"items": []}}));
    }

    #[test]
    fn test_migrate_missing_version_is_legacy() {
        let mut doc = v1_document();
        doc.as_object_mut().unwrap().remove("version");

        let result = migrate_document(doc).unwrap();
        pretty_assertions::assert_eq!(result["version"], json!(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_migrate_newer_version_is_fatal() {
        let mut doc = v1_document();
        doc["version"] = json!(CURRENT_SCHEMA_VERSION + 1);

        match migrate_document(doc) {
            Err(BoardkitError::FatalLoad { found, supported }) => {
                pretty_assertions::assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
                pretty_assertions::assert_eq!(supported, CURRENT_SCHEMA_VERSION);
            }
            other => panic!("Expected FatalLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_migrate_to_lower_target_stops_early() {
        let result = migrate_to(v1_document(), 2).unwrap();
        pretty_assertions::assert_eq!(result["version"], json!(2));
        assert!(result.get("dataSharing").is_none());
    }

    #[test_case(json!("three") ; "string version")]
    #[test_case(json!(0) ; "zero version")]
    #[test_case(json!(-2) ; "negative version")]
    #[test_case(json!(1.5) ; "fractional version")]
    fn test_invalid_schema_version(version: Value) {
        let mut doc = v1_document();
        doc["version"] = version;
        assert!(matches!(
            migrate_document(doc),
            Err(BoardkitError::InvalidSchemaVersion { .. })
        ));
    }

    #[test]
    fn test_non_object_root_is_malformed() {
        assert!(matches!(
            migrate_document(json!([1, 2, 3])),
            Err(BoardkitError::MalformedDocument { .. })
        ));
    }

    #[test_case(1, 3 => 2 ; "full chain")]
    #[test_case(2, 3 => 1 ; "single step")]
    #[test_case(3, 3 => 0 ; "same version")]
    #[test_case(3, 1 => 0 ; "downgrade")]
    fn test_migration_path_len(from: u32, to: u32) -> usize {
        migration_path(from, to).len()
    }

    #[test_case(1 ; "from v1")]
    #[test_case(2 ; "from v2")]
    #[test_case(3 ; "from v3")]
    fn test_migration_idempotent(version: u32) {
        let mut doc = migrate_to(v1_document(), version).unwrap();
        doc["version"] = json!(version);

        let once = migrate_document(doc).unwrap();
        let twice = migrate_document(once.clone()).unwrap();
        pretty_assertions::assert_eq!(once, twice);
    }

    #[test]
    fn test_chain_covers_every_step() {
        pretty_assertions::assert_eq!(MIGRATIONS.len() as u32, CURRENT_SCHEMA_VERSION - 1);
    }
}
