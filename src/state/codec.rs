//! Document serialization and loading.
//!
//! Storage lives outside the engine. Callers hand over text or raw JSON and
//! get back a migrated, validated [`Document`]. Broken sections fall back to
//! defaults and dangling references are pruned, so a supported document
//! always loads.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::state::document::{
    new_id, Background, Board, CanvasElement, DataLink, DataSharing, Document, DocumentMeta,
    Permission, Viewport, Widget,
};
use crate::state::migration::{migrate_to, schema_version, CURRENT_SCHEMA_VERSION};

/// What a load had to repair or prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Version the raw document was saved with.
    pub migrated_from: u32,

    /// Fields that were missing or unreadable and fell back to defaults.
    pub repaired: Vec<String>,

    /// Widgets that could not be read, or repeated an earlier id.
    pub dropped_widgets: usize,

    pub dropped_elements: usize,

    /// Widget ids whose module state had no widget.
    pub pruned_module_states: Vec<String>,

    /// Permission ids referencing missing widgets.
    pub pruned_permissions: Vec<String>,

    pub pruned_links: Vec<String>,
}

impl LoadReport {
    /// True when the document loaded without any repair.
    pub fn is_clean(&self) -> bool {
        self.repaired.is_empty()
            && self.dropped_widgets == 0
            && self.dropped_elements == 0
            && self.pruned_module_states.is_empty()
            && self.pruned_permissions.is_empty()
            && self.pruned_links.is_empty()
    }
}

/// Serialize a document to pretty JSON text.
pub fn serialize(doc: &Document) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parse JSON text into a raw, unmigrated document tree.
pub fn deserialize(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text)?)
}

/// Load a raw document at the current schema version.
pub fn load(raw: Value) -> Result<Document> {
    load_with_report(raw, CURRENT_SCHEMA_VERSION, Utc::now()).map(|(doc, _)| doc)
}

/// Migrate and validate a raw document.
///
/// `now` is used for timestamps that have to be invented.
///
/// # Errors
/// Only unrecoverable problems fail: a version newer than `target`, an
/// unreadable version, or a root that is not an object.
pub fn load_with_report(
    raw: Value,
    target: u32,
    now: DateTime<Utc>,
) -> Result<(Document, LoadReport)> {
    let mut report = LoadReport {
        migrated_from: schema_version(&raw)?,
        ..LoadReport::default()
    };

    let data = migrate_to(raw, target)?;
    let mut doc = parse_sections(&data, target, now, &mut report);
    prune_dangling(&mut doc, &mut report);

    if report.is_clean() {
        log::info!(
            "loaded document '{}' (v{} -> v{})",
            doc.meta.title,
            report.migrated_from,
            doc.version
        );
    } else {
        log::warn!(
            "loaded document '{}' with repairs: {:?}",
            doc.meta.title,
            report
        );
    }

    Ok((doc, report))
}

fn field<T: DeserializeOwned>(
    data: &Value,
    path: &[&str],
    report: &mut LoadReport,
    fallback: impl FnOnce() -> T,
) -> T {
    let mut cursor = Some(data);
    for key in path {
        cursor = cursor.and_then(|v| v.get(*key));
    }

    match cursor.map(|v| serde_json::from_value::<T>(v.clone())) {
        Some(Ok(value)) => value,
        Some(Err(err)) => {
            log::warn!("unreadable field '{}': {}", path.join("."), err);
            report.repaired.push(path.join("."));
            fallback()
        }
        None => {
            report.repaired.push(path.join("."));
            fallback()
        }
    }
}

/// Parse an array item by item, skipping the entries that do not read.
fn items<T: DeserializeOwned>(data: &Value, path: &[&str], report: &mut LoadReport) -> (Vec<T>, usize) {
    let mut cursor = Some(data);
    for key in path {
        cursor = cursor.and_then(|v| v.get(*key));
    }

    let Some(array) = cursor.and_then(Value::as_array) else {
        if cursor.is_some() {
            report.repaired.push(path.join("."));
        }
        return (Vec::new(), 0);
    };

    let mut parsed = Vec::with_capacity(array.len());
    let mut dropped = 0;
    for item in array {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(value) => parsed.push(value),
            Err(err) => {
                log::warn!("dropping unreadable entry in '{}': {}", path.join("."), err);
                dropped += 1;
            }
        }
    }
    (parsed, dropped)
}

fn parse_sections(data: &Value, target: u32, now: DateTime<Utc>, report: &mut LoadReport) -> Document {
    let id = field(data, &["id"], report, new_id);

    let title = field(data, &["meta", "title"], report, || "Untitled board".to_string());
    let created_at = field(data, &["meta", "createdAt"], report, || now);
    let updated_at = field(data, &["meta", "updatedAt"], report, || created_at);

    let viewport = field(data, &["board", "viewport"], report, Viewport::default);
    let background = field(data, &["board", "background"], report, Background::default);

    let (parsed_widgets, mut dropped_widgets) = items::<Widget>(data, &["board", "widgets"], report);
    let mut seen = HashSet::new();
    let mut widgets = Vec::with_capacity(parsed_widgets.len());
    for widget in parsed_widgets {
        if seen.insert(widget.id.clone()) {
            widgets.push(widget);
        } else {
            log::warn!("dropping widget with duplicate id '{}'", widget.id);
            dropped_widgets += 1;
        }
    }
    report.dropped_widgets = dropped_widgets;

    let (elements, dropped_elements) = items::<CanvasElement>(data, &["board", "elements"], report);
    report.dropped_elements = dropped_elements;

    let modules = field::<BTreeMap<String, Value>>(data, &["modules"], report, BTreeMap::new);

    let (permissions, dropped_permissions) =
        items::<Permission>(data, &["dataSharing", "permissions"], report);
    let (links, _) = items::<DataLink>(data, &["dataSharing", "links"], report);
    if dropped_permissions > 0 {
        report.repaired.push("dataSharing.permissions".to_string());
    }

    Document {
        version: target,
        id,
        meta: DocumentMeta {
            title,
            created_at,
            updated_at,
        },
        board: Board {
            viewport,
            widgets,
            elements,
            background,
        },
        modules,
        data_sharing: DataSharing { permissions, links },
    }
}

/// Remove module state, permissions and links that point at missing widgets.
fn prune_dangling(doc: &mut Document, report: &mut LoadReport) {
    let widget_ids: HashSet<String> = doc.board.widgets.iter().map(|w| w.id.clone()).collect();

    doc.modules.retain(|widget_id, _| {
        let keep = widget_ids.contains(widget_id);
        if !keep {
            log::debug!("pruning module state of missing widget '{}'", widget_id);
            report.pruned_module_states.push(widget_id.clone());
        }
        keep
    });

    let mut seen = HashSet::new();
    doc.data_sharing.permissions.retain(|p| {
        let keep = widget_ids.contains(&p.consumer_widget_id)
            && widget_ids.contains(&p.provider_widget_id)
            && seen.insert(p.id.clone());
        if !keep {
            log::debug!("pruning dangling permission '{}'", p.id);
            report.pruned_permissions.push(p.id.clone());
        }
        keep
    });

    let permission_ids: HashSet<&str> = doc
        .data_sharing
        .permissions
        .iter()
        .map(|p| p.id.as_str())
        .collect();
    doc.data_sharing.links.retain(|link| {
        let keep = permission_ids.contains(link.permission_id.as_str());
        if !keep {
            report.pruned_links.push(link.id.clone());
        }
        keep
    });
}
