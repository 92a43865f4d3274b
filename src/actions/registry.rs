//! Action registry
//!
//! Actions are plain records of metadata and closures, looked up by id.
//! Front ends (command palette, context menus, shortcuts) only ever go
//! through `execute` and `query` on the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::builtin;
use super::deferred::{ActionEffect, PendingAction};
use super::query;
use crate::engine::BoardEngine;
use crate::modules::definition::ModuleDefinition;
use crate::state::document::{Point, WidgetId};

/// Where an action is being invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionSurface {
    /// Command palette and keyboard shortcuts.
    #[default]
    Global,
    /// Context menu on empty canvas.
    Canvas,
    /// Context menu on a widget.
    Widget,
    /// Context menu on a canvas element.
    Element,
}

/// Invocation context passed to `when` and handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionContext {
    pub surface: ActionSurface,
    pub selected_widgets: Vec<WidgetId>,
    pub selected_elements: Vec<String>,
    /// Canvas position of the invocation, if it came from the pointer.
    pub pointer: Option<Point>,
}

impl ActionContext {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn widget(widget_id: impl Into<WidgetId>) -> Self {
        Self {
            surface: ActionSurface::Widget,
            selected_widgets: vec![widget_id.into()],
            ..Self::default()
        }
    }

    pub fn canvas_at(x: f64, y: f64) -> Self {
        Self {
            surface: ActionSurface::Canvas,
            pointer: Some(Point { x, y }),
            ..Self::default()
        }
    }
}

pub type WhenFn = Arc<dyn Fn(&BoardEngine, &ActionContext) -> bool + Send + Sync>;
pub type SyncRun = Arc<dyn Fn(&mut BoardEngine, &ActionContext) -> anyhow::Result<()> + Send + Sync>;
pub type DeferredRun = Arc<dyn Fn(&BoardEngine, &ActionContext) -> PendingAction + Send + Sync>;

/// How an action runs.
#[derive(Clone)]
pub enum ActionHandler {
    /// Mutates the engine directly.
    Sync(SyncRun),
    /// Starts an asynchronous run whose effect is applied later.
    Deferred(DeferredRun),
}

/// What registered an action. Module actions follow their module's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSource {
    Builtin,
    Module(String),
    Custom,
}

/// A registered action.
#[derive(Clone)]
pub struct Action {
    pub id: String,
    pub title: String,
    pub group: String,
    /// Surfaces the action is listed on. Empty means everywhere.
    pub contexts: Vec<ActionSurface>,
    pub keywords: Vec<String>,
    pub priority: i32,
    /// Display hint for menus, e.g. `"Mod+Z"`.
    pub shortcut: Option<String>,
    pub source: ActionSource,
    when: Option<WhenFn>,
    handler: ActionHandler,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("group", &self.group)
            .field("contexts", &self.contexts)
            .field("priority", &self.priority)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Action {
    /// A synchronous action.
    pub fn new<F>(id: impl Into<String>, title: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut BoardEngine, &ActionContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_handler(id, title, ActionHandler::Sync(Arc::new(run)))
    }

    /// An asynchronous action. `start` reads what it needs from the engine
    /// and returns the future doing the work.
    pub fn deferred<F, Fut>(id: impl Into<String>, title: impl Into<String>, start: F) -> Self
    where
        F: Fn(&BoardEngine, &ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ActionEffect>> + Send + 'static,
    {
        let id = id.into();
        let action_id = id.clone();
        let run: DeferredRun = Arc::new(move |engine: &BoardEngine, ctx: &ActionContext| {
            PendingAction::new(&action_id, Box::pin(start(engine, ctx)))
        });
        Self::with_handler(id, title, ActionHandler::Deferred(run))
    }

    fn with_handler(id: impl Into<String>, title: impl Into<String>, handler: ActionHandler) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            group: "general".to_string(),
            contexts: Vec::new(),
            keywords: Vec::new(),
            priority: 0,
            shortcut: None,
            source: ActionSource::Custom,
            when: None,
            handler,
        }
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn contexts(mut self, contexts: &[ActionSurface]) -> Self {
        self.contexts = contexts.to_vec();
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn shortcut(mut self, shortcut: &str) -> Self {
        self.shortcut = Some(shortcut.to_string());
        self
    }

    pub fn when<F>(mut self, when: F) -> Self
    where
        F: Fn(&BoardEngine, &ActionContext) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(when));
        self
    }

    pub(crate) fn source(mut self, source: ActionSource) -> Self {
        self.source = source;
        self
    }

    pub fn handler(&self) -> &ActionHandler {
        &self.handler
    }

    /// True unless `when` is set and rejects this context.
    pub fn is_available(&self, engine: &BoardEngine, ctx: &ActionContext) -> bool {
        self.when.as_ref().map_or(true, |when| when(engine, ctx))
    }

    /// True if the action is listed on `surface`.
    pub fn is_listed_on(&self, surface: ActionSurface) -> bool {
        self.contexts.is_empty() || self.contexts.contains(&surface)
    }
}

/// Result of executing an action.
#[derive(Debug)]
pub enum ActionOutcome {
    Completed,
    /// `when` rejected the context; nothing was touched.
    Unavailable,
    /// A deferred run was started; finish it with `complete_action`.
    Pending(PendingAction),
}

impl ActionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ActionOutcome::Unavailable)
    }
}

/// Registry of available actions, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Action>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in board actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for action in builtin::actions() {
            registry.register(action.source(ActionSource::Builtin));
        }
        registry
    }

    /// Register an action, replacing any action with the same id.
    pub fn register(&mut self, action: Action) -> Option<Action> {
        let id = action.id.clone();
        let previous = self.actions.insert(id.clone(), action);
        if previous.is_some() {
            log::warn!("action '{}' re-registered", id);
        } else {
            log::debug!("registered action '{}'", id);
        }
        previous
    }

    pub fn unregister(&mut self, action_id: &str) -> Option<Action> {
        self.actions.remove(action_id)
    }

    pub fn get(&self, action_id: &str) -> Option<&Action> {
        self.actions.get(action_id)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.actions.contains_key(action_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register or refresh the "add widget" action of a module.
    pub fn sync_module(&mut self, definition: &ModuleDefinition) {
        let action = builtin::add_module_action(definition)
            .source(ActionSource::Module(definition.module_id.clone()));
        self.actions.insert(action.id.clone(), action);
    }

    /// Drop every action generated for a module.
    pub fn remove_module(&mut self, module_id: &str) -> usize {
        let before = self.actions.len();
        self.actions
            .retain(|_, a| a.source != ActionSource::Module(module_id.to_string()));
        before - self.actions.len()
    }

    /// Actions listed on `ctx.surface` and available in `ctx`, ranked for `term`.
    pub fn query(&self, engine: &BoardEngine, ctx: &ActionContext, term: &str) -> Vec<&Action> {
        query::rank(
            self.actions
                .values()
                .filter(|a| a.is_listed_on(ctx.surface) && a.is_available(engine, ctx)),
            term,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::builtin::todo;

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins();

        for id in [
            "history.undo",
            "history.redo",
            "board.reset-view",
            "widget.delete",
            "widget.bring-to-front",
            "widget.send-to-back",
        ] {
            assert!(registry.contains(id), "missing {}", id);
        }
        assert!(registry.iter().all(|a| a.source == ActionSource::Builtin));
    }

    #[test]
    fn test_module_actions_follow_module() {
        let mut registry = ActionRegistry::new();
        registry.sync_module(&todo::definition());

        let action = registry.get("board.add-todo").unwrap();
        assert_eq!(action.source, ActionSource::Module("todo".to_string()));
        assert_eq!(action.group, "widgets");

        assert_eq!(registry.remove_module("todo"), 1);
        assert!(!registry.contains("board.add-todo"));
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = ActionRegistry::new();
        assert!(registry.register(Action::new("x", "First", |_, _| Ok(()))).is_none());
        let previous = registry.register(Action::new("x", "Second", |_, _| Ok(())));

        assert_eq!(previous.unwrap().title, "First");
        assert_eq!(registry.get("x").unwrap().title, "Second");
    }

    #[test]
    fn test_listed_on() {
        let action = Action::new("x", "X", |_, _| Ok(())).contexts(&[ActionSurface::Widget]);
        assert!(action.is_listed_on(ActionSurface::Widget));
        assert!(!action.is_listed_on(ActionSurface::Canvas));

        let anywhere = Action::new("y", "Y", |_, _| Ok(()));
        assert!(anywhere.is_listed_on(ActionSurface::Canvas));
    }
}
