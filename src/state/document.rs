//! Board Document Schema
//!
//! The complete serializable state of one board. Module state is kept as
//! opaque JSON blobs keyed by widget id; the store never looks inside them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::migration::CURRENT_SCHEMA_VERSION;

/// Stable, document-unique widget identifier.
pub type WidgetId = String;

/// Opaque per-widget module state.
pub type ModuleBlob = serde_json::Value;

/// Generate a fresh identifier. Random, so ids created in rapid succession never collide.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Main board document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Schema version for migration support.
    pub version: u32,

    /// Document identifier, stable across saves.
    pub id: String,

    pub meta: DocumentMeta,

    pub board: Board,

    /// Module state per widget, never inspected by the store.
    #[serde(default)]
    pub modules: BTreeMap<WidgetId, ModuleBlob>,

    #[serde(default)]
    pub data_sharing: DataSharing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    #[serde(default)]
    pub viewport: Viewport,

    #[serde(default)]
    pub widgets: Vec<Widget>,

    #[serde(default)]
    pub elements: Vec<CanvasElement>,

    #[serde(default)]
    pub background: Background,
}

/// Camera position and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Background {
    Plain { color: String },
    Dots { color: String, spacing: u32 },
    Grid { color: String, spacing: u32 },
}

impl Default for Background {
    fn default() -> Self {
        Background::Dots {
            color: "#d4d4d8".to_string(),
            spacing: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// A positioned instance of a module on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: WidgetId,

    /// Immutable once the widget exists.
    pub module_id: String,

    pub rect: Rect,

    /// Draw order, shared with canvas elements.
    pub z_index: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// A drawing primitive on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasElement {
    #[serde(flatten)]
    pub base: ElementBase,

    #[serde(flatten)]
    pub kind: ElementKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBase {
    pub id: String,
    pub rect: Rect,
    pub z_index: i64,
    #[serde(default)]
    pub style: ElementStyle,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Shape {
        shape: ShapeKind,
    },
    Line {
        points: Vec<Point>,
        #[serde(default, rename = "arrowEnd")]
        arrow_end: bool,
    },
    Draw {
        points: Vec<Point>,
    },
    Text {
        content: String,
        #[serde(default = "default_font_size", rename = "fontSize")]
        font_size: f64,
    },
}

fn default_font_size() -> f64 {
    16.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyle {
    pub stroke_color: String,
    pub fill_color: Option<String>,
    pub stroke_width: f64,
    pub opacity: f64,
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            stroke_color: "#18181b".to_string(),
            fill_color: None,
            stroke_width: 2.0,
            opacity: 1.0,
        }
    }
}

/// Persisted data-sharing state: who may read from whom.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSharing {
    #[serde(default)]
    pub permissions: Vec<Permission>,

    #[serde(default)]
    pub links: Vec<DataLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    #[default]
    Read,
}

/// Authorises one consumer widget to read one contract from one provider widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    pub consumer_widget_id: WidgetId,
    pub provider_widget_id: WidgetId,
    pub contract_id: String,
    #[serde(default)]
    pub scope: PermissionScope,
    pub granted_at: DateTime<Utc>,
}

impl Permission {
    pub fn references(&self, widget_id: &str) -> bool {
        self.consumer_widget_id == widget_id || self.provider_widget_id == widget_id
    }
}

/// Connection entry drawn between the two widgets of a permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLink {
    pub id: String,
    pub permission_id: String,
    pub provider_widget_id: WidgetId,
    pub consumer_widget_id: WidgetId,
    pub contract_id: String,
}

impl Document {
    /// A new empty board at the current schema version.
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            id: new_id(),
            meta: DocumentMeta {
                title: title.into(),
                created_at: now,
                updated_at: now,
            },
            board: Board::default(),
            modules: BTreeMap::new(),
            data_sharing: DataSharing::default(),
        }
    }

    pub fn widget(&self, widget_id: &str) -> Option<&Widget> {
        self.board.widgets.iter().find(|w| w.id == widget_id)
    }

    pub fn widget_mut(&mut self, widget_id: &str) -> Option<&mut Widget> {
        self.board.widgets.iter_mut().find(|w| w.id == widget_id)
    }

    pub fn has_widget(&self, widget_id: &str) -> bool {
        self.widget(widget_id).is_some()
    }

    pub fn element(&self, element_id: &str) -> Option<&CanvasElement> {
        self.board.elements.iter().find(|e| e.base.id == element_id)
    }

    pub fn module_state(&self, widget_id: &str) -> Option<&ModuleBlob> {
        self.modules.get(widget_id)
    }

    pub fn permission(&self, permission_id: &str) -> Option<&Permission> {
        self.data_sharing
            .permissions
            .iter()
            .find(|p| p.id == permission_id)
    }

    /// Highest z-index across widgets and elements.
    pub fn max_z_index(&self) -> Option<i64> {
        self.board
            .widgets
            .iter()
            .map(|w| w.z_index)
            .chain(self.board.elements.iter().map(|e| e.base.z_index))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_document_is_current() {
        let doc = Document::new("Board", Utc::now());
        assert_eq!(doc.version, CURRENT_SCHEMA_VERSION);
        assert!(doc.board.widgets.is_empty());
        assert_eq!(doc.max_z_index(), None);
    }

    #[test]
    fn test_serialized_shape_uses_camel_case() {
        let doc = Document::new("Board", Utc::now());
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value.get("dataSharing").is_some());
        assert!(value["meta"].get("createdAt").is_some());
        assert_eq!(value["board"]["background"]["kind"], "dots");
    }

    #[test]
    fn test_element_flattens_kind_tag() {
        let element = CanvasElement {
            base: ElementBase {
                id: "e1".to_string(),
                rect: Rect::new(0.0, 0.0, 10.0, 10.0),
                z_index: 3,
                style: ElementStyle::default(),
                locked: false,
            },
            kind: ElementKind::Shape {
                shape: ShapeKind::Ellipse,
            },
        };
        let value = serde_json::to_value(&element).unwrap();
        assert_eq!(value["type"], "shape");
        assert_eq!(value["shape"], "ellipse");
        assert_eq!(value["zIndex"], 3);
        assert!(value.get("locked").is_none());

        let back: CanvasElement = serde_json::from_value(value).unwrap();
        assert_eq!(back, element);
    }

    #[test]
    fn test_text_element_defaults_font_size() {
        let element: CanvasElement = serde_json::from_value(json!({
            "id": "t1",
            "rect": {"x": 0.0, "y": 0.0, "w": 100.0, "h": 20.0},
            "zIndex": 0,
            "type": "text",
            "content": "hello"
        }))
        .unwrap();
        assert!(matches!(element.kind, ElementKind::Text { font_size, .. } if font_size == 16.0));
        assert!(!element.base.locked);
    }
}
