//! State Management Module
//!
//! Provides the board document, pure mutations, serialization and loading,
//! schema migrations, and snapshot-based undo/redo history.

pub mod codec;
pub mod document;
pub mod history;
pub mod migration;
pub mod mutations;

pub use codec::{deserialize, load, load_with_report, serialize, LoadReport};
pub use document::{
    Background, CanvasElement, DataLink, DataSharing, Document, DocumentMeta, ElementBase,
    ElementKind, ElementStyle, ModuleBlob, Permission, PermissionScope, Point, Rect, ShapeKind,
    Viewport, Visibility, Widget, WidgetId,
};
pub use history::{CaptureOptions, History, HistoryEntry, HistoryItem};
pub use migration::{migrate_document, migrate_to, CURRENT_SCHEMA_VERSION};
pub use mutations::{ElementPatch, NewElement, NewWidget, SizeConstraints, ZOrder};
