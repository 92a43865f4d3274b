//! Pure document mutations.
//!
//! Every function takes the current document and returns a new one, leaving
//! the input untouched on failure. Module state crosses this layer as an
//! opaque blob; sizing rules are passed in by the caller, which resolves them
//! from the module registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BoardkitError, Result};
use crate::state::document::{
    new_id, Background, CanvasElement, DataLink, Document, ElementBase, ElementKind, ElementStyle,
    ModuleBlob, Permission, Rect, Viewport, Visibility, Widget, WidgetId,
};

/// Zoom range accepted by [`update_viewport`].
pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 5.0;

/// Sizing rules declared by a module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeConstraints {
    pub min_width: f64,
    pub min_height: f64,
    pub default_width: f64,
    pub default_height: f64,
}

impl Default for SizeConstraints {
    fn default() -> Self {
        Self {
            min_width: 120.0,
            min_height: 80.0,
            default_width: 280.0,
            default_height: 200.0,
        }
    }
}

impl SizeConstraints {
    /// Clamp a requested size to the minimums.
    pub fn clamp(&self, width: f64, height: f64) -> (f64, f64) {
        (width.max(self.min_width), height.max(self.min_height))
    }
}

/// Arguments for [`add_widget`].
#[derive(Debug, Clone)]
pub struct NewWidget {
    pub module_id: String,
    pub x: f64,
    pub y: f64,
    pub size: SizeConstraints,
    pub initial_state: ModuleBlob,
}

/// Arguments for [`add_element`]. The id and z-index are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewElement {
    pub rect: Rect,
    pub style: ElementStyle,
    pub kind: ElementKind,
}

/// Partial update for a canvas element.
#[derive(Debug, Clone, Default)]
pub struct ElementPatch {
    pub rect: Option<Rect>,
    pub style: Option<ElementStyle>,
    pub kind: Option<ElementKind>,
    pub locked: Option<bool>,
}

/// Where to move an item in the shared draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZOrder {
    BringToFront,
    SendToBack,
    Forward,
    Backward,
}

/// A fresh empty board at `version`.
pub fn create_board(title: &str, version: u32, now: DateTime<Utc>) -> Document {
    let mut doc = Document::new(title, now);
    doc.version = version;
    doc
}

fn next_z_index(doc: &Document) -> i64 {
    doc.max_z_index().map_or(0, |z| z + 1)
}

fn touched(mut doc: Document, now: DateTime<Utc>) -> Document {
    doc.meta.updated_at = now;
    doc
}

fn widget_index(doc: &Document, widget_id: &str) -> Result<usize> {
    doc.board
        .widgets
        .iter()
        .position(|w| w.id == widget_id)
        .ok_or_else(|| BoardkitError::WidgetNotFound {
            widget_id: widget_id.to_string(),
        })
}

fn element_index(doc: &Document, element_id: &str) -> Result<usize> {
    doc.board
        .elements
        .iter()
        .position(|e| e.base.id == element_id)
        .ok_or_else(|| BoardkitError::ElementNotFound {
            element_id: element_id.to_string(),
        })
}

pub fn rename_board(doc: &Document, title: &str, now: DateTime<Utc>) -> Document {
    let mut next = doc.clone();
    next.meta.title = title.to_string();
    touched(next, now)
}

pub fn set_background(doc: &Document, background: Background, now: DateTime<Utc>) -> Document {
    let mut next = doc.clone();
    next.board.background = background;
    touched(next, now)
}

/// Add a widget on top of everything else. Returns the new document and the widget id.
pub fn add_widget(doc: &Document, args: NewWidget, now: DateTime<Utc>) -> (Document, WidgetId) {
    let mut next = doc.clone();
    let id = new_id();
    let (w, h) = args
        .size
        .clamp(args.size.default_width, args.size.default_height);

    next.board.widgets.push(Widget {
        id: id.clone(),
        module_id: args.module_id,
        rect: Rect::new(args.x, args.y, w, h),
        z_index: next_z_index(doc),
        visibility: Some(Visibility::Visible),
    });
    next.modules.insert(id.clone(), args.initial_state);

    (touched(next, now), id)
}

/// Remove a widget with its module state and every permission and link touching it.
pub fn remove_widget(doc: &Document, widget_id: &str, now: DateTime<Utc>) -> Result<Document> {
    let index = widget_index(doc, widget_id)?;
    let mut next = doc.clone();

    next.board.widgets.remove(index);
    next.modules.remove(widget_id);
    next.data_sharing
        .permissions
        .retain(|p| !p.references(widget_id));
    next.data_sharing
        .links
        .retain(|l| l.provider_widget_id != widget_id && l.consumer_widget_id != widget_id);

    Ok(touched(next, now))
}

pub fn move_widget(doc: &Document, widget_id: &str, x: f64, y: f64, now: DateTime<Utc>) -> Result<Document> {
    let index = widget_index(doc, widget_id)?;
    let mut next = doc.clone();
    let rect = &mut next.board.widgets[index].rect;
    rect.x = x;
    rect.y = y;
    Ok(touched(next, now))
}

/// Resize a widget, clamped to the module's minimum size.
pub fn resize_widget(
    doc: &Document,
    widget_id: &str,
    width: f64,
    height: f64,
    size: &SizeConstraints,
    now: DateTime<Utc>,
) -> Result<Document> {
    let index = widget_index(doc, widget_id)?;
    let mut next = doc.clone();
    let (w, h) = size.clamp(width, height);
    let rect = &mut next.board.widgets[index].rect;
    rect.w = w;
    rect.h = h;
    Ok(touched(next, now))
}

pub fn set_widget_visibility(
    doc: &Document,
    widget_id: &str,
    visibility: Visibility,
    now: DateTime<Utc>,
) -> Result<Document> {
    let index = widget_index(doc, widget_id)?;
    let mut next = doc.clone();
    next.board.widgets[index].visibility = Some(visibility);
    Ok(touched(next, now))
}

/// Replace the opaque state blob of one widget.
pub fn update_module_state(
    doc: &Document,
    widget_id: &str,
    state: ModuleBlob,
    now: DateTime<Utc>,
) -> Result<Document> {
    widget_index(doc, widget_id)?;
    let mut next = doc.clone();
    next.modules.insert(widget_id.to_string(), state);
    Ok(touched(next, now))
}

pub fn add_element(doc: &Document, args: NewElement, now: DateTime<Utc>) -> (Document, String) {
    let mut next = doc.clone();
    let id = new_id();
    next.board.elements.push(CanvasElement {
        base: ElementBase {
            id: id.clone(),
            rect: args.rect,
            z_index: next_z_index(doc),
            style: args.style,
            locked: false,
        },
        kind: args.kind,
    });
    (touched(next, now), id)
}

/// Apply a patch to an element. Locked elements only accept a patch that unlocks them.
pub fn update_element(
    doc: &Document,
    element_id: &str,
    patch: ElementPatch,
    now: DateTime<Utc>,
) -> Result<Document> {
    let index = element_index(doc, element_id)?;
    if doc.board.elements[index].base.locked && patch.locked != Some(false) {
        return Err(BoardkitError::ElementLocked {
            element_id: element_id.to_string(),
        });
    }

    let mut next = doc.clone();
    let element = &mut next.board.elements[index];
    if let Some(rect) = patch.rect {
        element.base.rect = rect;
    }
    if let Some(style) = patch.style {
        element.base.style = style;
    }
    if let Some(kind) = patch.kind {
        element.kind = kind;
    }
    if let Some(locked) = patch.locked {
        element.base.locked = locked;
    }
    Ok(touched(next, now))
}

pub fn remove_element(doc: &Document, element_id: &str, now: DateTime<Utc>) -> Result<Document> {
    let index = element_index(doc, element_id)?;
    let mut next = doc.clone();
    next.board.elements.remove(index);
    Ok(touched(next, now))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawItem {
    Widget(usize),
    Element(usize),
}

/// Widgets and elements in draw order, bottom first.
///
/// Equal z-indices keep insertion order, widgets before elements.
pub fn draw_order(doc: &Document) -> Vec<String> {
    draw_items(doc)
        .into_iter()
        .map(|item| match item {
            DrawItem::Widget(i) => doc.board.widgets[i].id.clone(),
            DrawItem::Element(i) => doc.board.elements[i].base.id.clone(),
        })
        .collect()
}

fn draw_items(doc: &Document) -> Vec<DrawItem> {
    let mut items: Vec<(i64, DrawItem)> = doc
        .board
        .widgets
        .iter()
        .enumerate()
        .map(|(i, w)| (w.z_index, DrawItem::Widget(i)))
        .chain(
            doc.board
                .elements
                .iter()
                .enumerate()
                .map(|(i, e)| (e.base.z_index, DrawItem::Element(i))),
        )
        .collect();
    // Stable sort keeps insertion order for ties.
    items.sort_by_key(|(z, _)| *z);
    items.into_iter().map(|(_, item)| item).collect()
}

/// Move a widget or element within the shared draw order, then renumber
/// z-indices densely from zero.
///
/// An id matching neither a widget nor an element is `ElementNotFound`.
pub fn reorder_z(doc: &Document, item_id: &str, order: ZOrder, now: DateTime<Utc>) -> Result<Document> {
    let mut items = draw_items(doc);
    let position = items
        .iter()
        .position(|item| match *item {
            DrawItem::Widget(i) => doc.board.widgets[i].id == item_id,
            DrawItem::Element(i) => doc.board.elements[i].base.id == item_id,
        })
        .ok_or_else(|| BoardkitError::ElementNotFound {
            element_id: item_id.to_string(),
        })?;

    let item = items.remove(position);
    let target = match order {
        ZOrder::BringToFront => items.len(),
        ZOrder::SendToBack => 0,
        ZOrder::Forward => (position + 1).min(items.len()),
        ZOrder::Backward => position.saturating_sub(1),
    };
    items.insert(target, item);

    let mut next = doc.clone();
    for (z, item) in items.into_iter().enumerate() {
        let z = z as i64;
        match item {
            DrawItem::Widget(i) => next.board.widgets[i].z_index = z,
            DrawItem::Element(i) => next.board.elements[i].base.z_index = z,
        }
    }
    Ok(touched(next, now))
}

/// Set the viewport, clamping zoom to [`MIN_ZOOM`, `MAX_ZOOM`].
pub fn update_viewport(doc: &Document, viewport: Viewport, now: DateTime<Utc>) -> Document {
    let mut next = doc.clone();
    let zoom = if viewport.zoom.is_finite() {
        viewport.zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        1.0
    };
    next.board.viewport = Viewport { zoom, ..viewport };
    touched(next, now)
}

/// Record a permission and its link.
pub fn grant_permission(doc: &Document, permission: Permission, now: DateTime<Utc>) -> Document {
    let mut next = doc.clone();
    next.data_sharing.links.push(DataLink {
        id: new_id(),
        permission_id: permission.id.clone(),
        provider_widget_id: permission.provider_widget_id.clone(),
        consumer_widget_id: permission.consumer_widget_id.clone(),
        contract_id: permission.contract_id.clone(),
    });
    next.data_sharing.permissions.push(permission);
    touched(next, now)
}

/// Remove a permission and its link.
pub fn revoke_permission(doc: &Document, permission_id: &str, now: DateTime<Utc>) -> Result<Document> {
    if doc.permission(permission_id).is_none() {
        return Err(BoardkitError::PermissionNotFound {
            permission_id: permission_id.to_string(),
        });
    }
    let mut next = doc.clone();
    next.data_sharing.permissions.retain(|p| p.id != permission_id);
    next.data_sharing
        .links
        .retain(|l| l.permission_id != permission_id);
    Ok(touched(next, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::document::{PermissionScope, ShapeKind};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn todo_widget(x: f64) -> NewWidget {
        NewWidget {
            module_id: "todo".to_string(),
            x,
            y: 0.0,
            size: SizeConstraints::default(),
            initial_state: json!({"items": []}),
        }
    }

    fn shape() -> NewElement {
        NewElement {
            rect: Rect::new(0.0, 0.0, 50.0, 50.0),
            style: ElementStyle::default(),
            kind: ElementKind::Shape {
                shape: ShapeKind::Rectangle,
            },
        }
    }

    #[test]
    fn test_add_widget_assigns_unique_ids_and_top_z() {
        let doc = create_board("Board", 3, now());
        let (doc, a) = add_widget(&doc, todo_widget(0.0), now());
        let (doc, b) = add_widget(&doc, todo_widget(10.0), now());

        assert_ne!(a, b);
        assert_eq!(doc.widget(&a).unwrap().z_index, 0);
        assert_eq!(doc.widget(&b).unwrap().z_index, 1);
        assert_eq!(doc.module_state(&a), Some(&json!({"items": []})));
    }

    #[test]
    fn test_add_widget_z_above_elements() {
        let doc = create_board("Board", 3, now());
        let (doc, _) = add_element(&doc, shape(), now());
        let (doc, _) = add_element(&doc, shape(), now());
        let (doc, w) = add_widget(&doc, todo_widget(0.0), now());
        assert_eq!(doc.widget(&w).unwrap().z_index, 2);
    }

    #[test]
    fn test_remove_widget_cascades() {
        let doc = create_board("Board", 3, now());
        let (doc, provider) = add_widget(&doc, todo_widget(0.0), now());
        let (doc, consumer) = add_widget(&doc, todo_widget(10.0), now());
        let doc = grant_permission(
            &doc,
            Permission {
                id: "p1".to_string(),
                consumer_widget_id: consumer.clone(),
                provider_widget_id: provider.clone(),
                contract_id: "todo.progress.v1".to_string(),
                scope: PermissionScope::Read,
                granted_at: now(),
            },
            now(),
        );

        let doc = remove_widget(&doc, &provider, now()).unwrap();

        assert!(!doc.has_widget(&provider));
        assert!(doc.module_state(&provider).is_none());
        assert!(doc.data_sharing.permissions.is_empty());
        assert!(doc.data_sharing.links.is_empty());
        assert!(doc.has_widget(&consumer));
    }

    #[test]
    fn test_remove_missing_widget_fails_without_change() {
        let doc = create_board("Board", 3, now());
        assert!(matches!(
            remove_widget(&doc, "nope", now()),
            Err(BoardkitError::WidgetNotFound { .. })
        ));
    }

    #[test]
    fn test_resize_clamps_to_minimum() {
        let doc = create_board("Board", 3, now());
        let (doc, id) = add_widget(&doc, todo_widget(0.0), now());
        let size = SizeConstraints {
            min_width: 200.0,
            min_height: 150.0,
            default_width: 300.0,
            default_height: 200.0,
        };

        let doc = resize_widget(&doc, &id, 50.0, 400.0, &size, now()).unwrap();
        let rect = doc.widget(&id).unwrap().rect;
        assert_relative_eq!(rect.w, 200.0);
        assert_relative_eq!(rect.h, 400.0);
    }

    #[test]
    fn test_move_widget() {
        let doc = create_board("Board", 3, now());
        let (doc, id) = add_widget(&doc, todo_widget(0.0), now());
        let doc = move_widget(&doc, &id, 42.0, -7.5, now()).unwrap();
        let rect = doc.widget(&id).unwrap().rect;
        assert_relative_eq!(rect.x, 42.0);
        assert_relative_eq!(rect.y, -7.5);
    }

    #[test]
    fn test_update_module_state_requires_widget() {
        let doc = create_board("Board", 3, now());
        assert!(update_module_state(&doc, "ghost", json!({}), now()).is_err());
        assert!(doc.modules.is_empty());
    }

    #[test]
    fn test_locked_element_rejects_edits() {
        let doc = create_board("Board", 3, now());
        let (doc, id) = add_element(&doc, shape(), now());
        let doc = update_element(
            &doc,
            &id,
            ElementPatch {
                locked: Some(true),
                ..ElementPatch::default()
            },
            now(),
        )
        .unwrap();

        let moved = ElementPatch {
            rect: Some(Rect::new(5.0, 5.0, 50.0, 50.0)),
            ..ElementPatch::default()
        };
        assert!(matches!(
            update_element(&doc, &id, moved.clone(), now()),
            Err(BoardkitError::ElementLocked { .. })
        ));

        let unlock_and_move = ElementPatch {
            locked: Some(false),
            ..moved
        };
        let doc = update_element(&doc, &id, unlock_and_move, now()).unwrap();
        assert!(!doc.element(&id).unwrap().base.locked);
        assert_relative_eq!(doc.element(&id).unwrap().base.rect.x, 5.0);
    }

    #[test]
    fn test_remove_element() {
        let doc = create_board("Board", 3, now());
        let (doc, id) = add_element(&doc, shape(), now());
        let doc = remove_element(&doc, &id, now()).unwrap();
        assert!(doc.element(&id).is_none());
    }

    #[test]
    fn test_reorder_z_shared_space() {
        let doc = create_board("Board", 3, now());
        let (doc, w1) = add_widget(&doc, todo_widget(0.0), now());
        let (doc, e1) = add_element(&doc, shape(), now());
        let (doc, w2) = add_widget(&doc, todo_widget(0.0), now());
        assert_eq!(draw_order(&doc), vec![w1.clone(), e1.clone(), w2.clone()]);

        let front = reorder_z(&doc, &w1, ZOrder::BringToFront, now()).unwrap();
        assert_eq!(draw_order(&front), vec![e1.clone(), w2.clone(), w1.clone()]);

        let back = reorder_z(&doc, &w2, ZOrder::SendToBack, now()).unwrap();
        assert_eq!(draw_order(&back), vec![w2.clone(), w1.clone(), e1.clone()]);

        let forward = reorder_z(&doc, &w1, ZOrder::Forward, now()).unwrap();
        assert_eq!(draw_order(&forward), vec![e1.clone(), w1.clone(), w2.clone()]);

        let backward = reorder_z(&doc, &w1, ZOrder::Backward, now()).unwrap();
        assert_eq!(draw_order(&backward), draw_order(&doc));
    }

    #[test]
    fn test_reorder_z_unknown_item() {
        let doc = create_board("Board", 3, now());
        let (doc, _) = add_widget(&doc, todo_widget(0.0), now());

        let err = reorder_z(&doc, "missing", ZOrder::BringToFront, now()).unwrap_err();
        assert!(matches!(err, BoardkitError::ElementNotFound { ref element_id } if element_id == "missing"));
    }

    #[test]
    fn test_draw_order_ties_keep_insertion_order() {
        let doc = create_board("Board", 3, now());
        let (mut doc, a) = add_widget(&doc, todo_widget(0.0), now());
        let (next, b) = add_widget(&doc, todo_widget(0.0), now());
        doc = next;
        doc.board.widgets[1].z_index = 0;
        assert_eq!(draw_order(&doc), vec![a, b]);
    }

    #[test]
    fn test_update_viewport_clamps_zoom() {
        let doc = create_board("Board", 3, now());
        let doc = update_viewport(
            &doc,
            Viewport {
                x: 1.0,
                y: 2.0,
                zoom: 40.0,
            },
            now(),
        );
        assert_relative_eq!(doc.board.viewport.zoom, MAX_ZOOM);

        let doc = update_viewport(
            &doc,
            Viewport {
                x: 1.0,
                y: 2.0,
                zoom: f64::NAN,
            },
            now(),
        );
        assert_relative_eq!(doc.board.viewport.zoom, 1.0);
    }

    #[test]
    fn test_revoke_permission_removes_link() {
        let doc = create_board("Board", 3, now());
        let (doc, a) = add_widget(&doc, todo_widget(0.0), now());
        let (doc, b) = add_widget(&doc, todo_widget(0.0), now());
        let doc = grant_permission(
            &doc,
            Permission {
                id: "p1".to_string(),
                consumer_widget_id: b,
                provider_widget_id: a,
                contract_id: "todo.progress.v1".to_string(),
                scope: PermissionScope::Read,
                granted_at: now(),
            },
            now(),
        );
        assert_eq!(doc.data_sharing.links.len(), 1);

        let doc = revoke_permission(&doc, "p1", now()).unwrap();
        assert!(doc.data_sharing.permissions.is_empty());
        assert!(doc.data_sharing.links.is_empty());
        assert!(revoke_permission(&doc, "p1", now()).is_err());
    }

    #[test]
    fn test_rename_touches_updated_at() {
        let created = Utc::now() - chrono::Duration::hours(1);
        let doc = create_board("Board", 3, created);
        let later = Utc::now();
        let doc = rename_board(&doc, "Renamed", later);
        assert_eq!(doc.meta.title, "Renamed");
        assert_eq!(doc.meta.updated_at, later);
        assert_eq!(doc.meta.created_at, created);
    }
}
