//! Built-in board actions and the generated per-module "add" actions.

use super::registry::{Action, ActionContext, ActionSurface};
use crate::engine::BoardEngine;
use crate::modules::definition::ModuleDefinition;
use crate::state::document::Viewport;
use crate::state::history::CaptureOptions;
use crate::state::mutations::ZOrder;

/// Offset from the top-left of the visible area for widgets added without a pointer.
const SPAWN_MARGIN: f64 = 80.0;

pub fn actions() -> Vec<Action> {
    vec![
        Action::new("history.undo", "Undo", |engine, _| {
            engine.undo()?;
            Ok(())
        })
        .group("history")
        .keywords(&["back", "revert"])
        .shortcut("Mod+Z")
        .priority(10)
        .when(|engine, _| engine.can_undo()),
        Action::new("history.redo", "Redo", |engine, _| {
            engine.redo()?;
            Ok(())
        })
        .group("history")
        .keywords(&["again", "forward"])
        .shortcut("Mod+Shift+Z")
        .priority(10)
        .when(|engine, _| engine.can_redo()),
        Action::new("board.reset-view", "Reset View", |engine, _| {
            engine.update_viewport(Viewport::default(), CaptureOptions::skip());
            Ok(())
        })
        .group("view")
        .keywords(&["zoom", "center", "fit"])
        .shortcut("Mod+0")
        .contexts(&[ActionSurface::Global, ActionSurface::Canvas]),
        Action::new("widget.delete", "Delete Widget", |engine, ctx| {
            for widget_id in &ctx.selected_widgets {
                engine.remove_widget(widget_id, CaptureOptions::capture("Delete widget"))?;
            }
            Ok(())
        })
        .group("widget")
        .keywords(&["remove", "trash"])
        .shortcut("Delete")
        .contexts(&[ActionSurface::Global, ActionSurface::Widget])
        .when(has_selected_widgets),
        reorder_action("widget.bring-to-front", "Bring to Front", ZOrder::BringToFront, "Mod+]"),
        reorder_action("widget.send-to-back", "Send to Back", ZOrder::SendToBack, "Mod+["),
    ]
}

fn reorder_action(id: &str, title: &str, order: ZOrder, shortcut: &str) -> Action {
    let label = title.to_string();
    Action::new(id, title, move |engine, ctx| {
        for widget_id in &ctx.selected_widgets {
            engine.reorder_z(widget_id, order, CaptureOptions::capture(label.clone()))?;
        }
        Ok(())
    })
    .group("widget")
    .keywords(&["order", "layer", "z-index"])
    .shortcut(shortcut)
    .contexts(&[ActionSurface::Global, ActionSurface::Widget])
    .when(has_selected_widgets)
}

fn has_selected_widgets(engine: &BoardEngine, ctx: &ActionContext) -> bool {
    !ctx.selected_widgets.is_empty()
        && ctx
            .selected_widgets
            .iter()
            .all(|id| engine.document().has_widget(id))
}

/// The `board.add-<moduleId>` action for a module.
pub fn add_module_action(definition: &ModuleDefinition) -> Action {
    let module_id = definition.module_id.clone();
    let label = format!("Add {}", definition.title);
    Action::new(
        format!("board.add-{}", definition.module_id),
        label.clone(),
        move |engine, ctx| {
            let (x, y) = spawn_point(engine, ctx);
            engine.add_widget(&module_id, x, y, CaptureOptions::capture(label.clone()))?;
            Ok(())
        },
    )
    .group("widgets")
    .keywords(&["add", "new", "widget", definition.module_id.as_str()])
    .contexts(&[ActionSurface::Global, ActionSurface::Canvas])
}

fn spawn_point(engine: &BoardEngine, ctx: &ActionContext) -> (f64, f64) {
    if let Some(pointer) = ctx.pointer {
        return (pointer.x, pointer.y);
    }
    let viewport = &engine.document().board.viewport;
    (
        SPAWN_MARGIN / viewport.zoom - viewport.x / viewport.zoom,
        SPAWN_MARGIN / viewport.zoom - viewport.y / viewport.zoom,
    )
}
