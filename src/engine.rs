//! Board engine
//!
//! Owns one board document together with the module registry, the action
//! registry, the data-sharing bus and the history. Every mutation goes
//! through [`BoardEngine::commit`], which settles pending history, swaps the
//! document, records history and pushes changed provider state to the bus in
//! one step, so nothing can interleave between a change and its snapshot.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::actions::deferred::FinishedAction;
use crate::actions::registry::{Action, ActionContext, ActionHandler, ActionOutcome, ActionRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{BoardkitError, Result};
use crate::modules::definition::ModuleDefinition;
use crate::modules::registry::ModuleRegistry;
use crate::sharing::bus::{Connection, DataBus, DeliveryCallback, SubscriptionHandle, SubscriptionStatus};
use crate::state::codec::{self, LoadReport};
use crate::state::document::{Background, Document, ModuleBlob, Viewport, Visibility, WidgetId};
use crate::state::history::{CaptureOptions, History, HistoryItem};
use crate::state::mutations::{self, ElementPatch, NewElement, NewWidget, ZOrder};

const DEFAULT_BOARD_TITLE: &str = "Untitled board";

/// State to restore when an action fails halfway.
struct Checkpoint {
    document: Document,
    history: History,
    dirty: bool,
}

/// A board and everything that operates on it.
pub struct BoardEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    document: Document,
    /// Changed since the last load or [`BoardEngine::mark_saved`].
    dirty: bool,
    modules: ModuleRegistry,
    actions: ActionRegistry,
    bus: DataBus,
    history: History,
}

impl fmt::Debug for BoardEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardEngine")
            .field("config", &self.config)
            .field("document", &self.document.id)
            .field("dirty", &self.dirty)
            .field("modules", &self.modules.list_modules())
            .field("actions", &self.actions.len())
            .field("bus", &self.bus)
            .field("history", &self.history.len())
            .finish()
    }
}

impl BoardEngine {
    /// Create an engine with the wall clock and the built-in modules.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_modules(config, clock, ModuleRegistry::with_builtins())
    }

    /// Create an engine around an existing module registry.
    pub fn with_modules(config: EngineConfig, clock: Arc<dyn Clock>, modules: ModuleRegistry) -> Result<Self> {
        config.validate()?;

        let mut actions = ActionRegistry::with_builtins();
        for definition in modules.iter() {
            actions.sync_module(definition);
        }

        let document = mutations::create_board(DEFAULT_BOARD_TITLE, config.target_version, clock.now());
        let mut history = History::new(config.history_cap);
        history.reset(&document);

        Ok(Self {
            config,
            clock,
            document,
            dirty: false,
            modules,
            actions,
            bus: DataBus::new(),
            history,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after the document has been persisted.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn bus(&self) -> &DataBus {
        &self.bus
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    // ------------------------------------------------------------------
    // Document lifecycle
    // ------------------------------------------------------------------

    /// Replace the document with a new empty board.
    pub fn create_board(&mut self, title: &str) {
        let document = mutations::create_board(title, self.config.target_version, self.clock.now());
        self.bus.resync(&document, &self.modules);
        self.history.reset(&document);
        self.document = document;
        self.dirty = false;
        log::info!("created board '{}'", title);
    }

    /// Load a document from JSON text.
    pub fn load_str(&mut self, text: &str) -> Result<LoadReport> {
        self.load_value(codec::deserialize(text)?)
    }

    /// Load a raw document tree: migrate, validate, normalize module state
    /// and re-establish subscriptions.
    ///
    /// On error the current document is left untouched.
    pub fn load_value(&mut self, raw: Value) -> Result<LoadReport> {
        let (mut document, mut report) =
            codec::load_with_report(raw, self.config.target_version, self.clock.now())?;
        self.normalize_module_states(&mut document, &mut report);

        let resync = self.bus.resync(&document, &self.modules);
        for permission_id in &resync.pruned {
            let updated_at = document.meta.updated_at;
            document = mutations::revoke_permission(&document, permission_id, updated_at)?;
            report.pruned_permissions.push(permission_id.clone());
        }

        self.history.reset(&document);
        self.document = document;
        self.dirty = false;
        Ok(report)
    }

    /// Serialize the current document.
    pub fn serialize(&self) -> Result<String> {
        codec::serialize(&self.document)
    }

    /// Run every widget's state through its module's codec.
    ///
    /// Unreadable or missing blobs get the module's default state. Widgets of
    /// unregistered modules keep their blobs untouched.
    fn normalize_module_states(&self, document: &mut Document, report: &mut LoadReport) {
        for widget in &document.board.widgets {
            let Some(definition) = self.modules.resolve(&widget.module_id) else {
                log::debug!(
                    "module '{}' not registered; keeping state of {} as is",
                    widget.module_id,
                    widget.id
                );
                continue;
            };

            let normalized = match document.modules.get(&widget.id) {
                Some(blob) => definition.normalize_blob(blob).or_else(|e| {
                    log::warn!("resetting state of {}: {}", widget.id, e);
                    report.repaired.push(format!("modules.{}", widget.id));
                    definition.default_blob()
                }),
                None => {
                    report.repaired.push(format!("modules.{}", widget.id));
                    definition.default_blob()
                }
            };
            match normalized {
                Ok(blob) => {
                    document.modules.insert(widget.id.clone(), blob);
                }
                Err(e) => log::warn!("module '{}' has no usable state: {}", widget.module_id, e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Apply `next` as the new document.
    fn commit(&mut self, next: Document, opts: &CaptureOptions, default_label: &str) {
        let next = self.apply_revocations(next);
        let now = self.clock.now();
        let label = opts.history_label.as_deref().unwrap_or(default_label);
        let debounce_ms = opts.debounce_ms.unwrap_or(self.config.default_debounce_ms);

        // A pending debounced capture belongs to the document as it is now.
        let continues = (opts.capture_history && debounce_ms > 0).then_some(label);
        self.history.settle(&self.document, continues, now);

        let previous = std::mem::replace(&mut self.document, next);
        self.dirty = true;
        if opts.capture_history {
            self.history.capture(&self.document, label, debounce_ms, now);
        }

        self.bus.retain_permissions(&self.document);
        self.publish_changes(&previous);
    }

    /// Swap in a document produced by history navigation.
    ///
    /// Permissions in the restored snapshot that no longer resolve against
    /// the registered modules are pruned, as on load.
    fn restore(&mut self, next: Document) {
        let previous = std::mem::replace(&mut self.document, next);
        self.dirty = true;
        let resync = self.bus.resync(&self.document, &self.modules);
        for permission_id in &resync.pruned {
            let updated_at = self.document.meta.updated_at;
            match mutations::revoke_permission(&self.document, permission_id, updated_at) {
                Ok(pruned) => {
                    log::warn!("pruned permission {} after history navigation", permission_id);
                    self.document = pruned;
                }
                Err(e) => log::warn!("could not prune permission {}: {}", permission_id, e),
            }
        }
        self.publish_changes(&previous);
    }

    /// Remove from `document` the permissions of subscriptions revoked
    /// through a [`SubscriptionHandle`].
    fn apply_revocations(&mut self, mut document: Document) -> Document {
        for permission_id in self.bus.revoked_permissions() {
            if document.permission(&permission_id).is_none() {
                // Gone already; the commit drops the dead subscription.
                continue;
            }
            let now = self.clock.now();
            match self.bus.disconnect(&document, &permission_id, now) {
                Ok(next) => document = next,
                Err(e) => log::warn!("could not revoke permission {}: {}", permission_id, e),
            }
        }
        document
    }

    /// Commit handle revocations that no other mutation has picked up yet.
    /// Returns the number of permissions removed.
    pub fn sync_revocations(&mut self) -> usize {
        let pending = self
            .bus
            .revoked_permissions()
            .into_iter()
            .filter(|id| self.document.permission(id).is_some())
            .count();
        if pending > 0 {
            let next = self.document.clone();
            self.commit(next, &CaptureOptions::skip(), "Disconnect widgets");
        }
        pending
    }

    fn publish_changes(&mut self, previous: &Document) {
        let changed: Vec<WidgetId> = self
            .document
            .modules
            .iter()
            .filter(|(id, blob)| previous.modules.get(*id) != Some(*blob))
            .map(|(id, _)| id.clone())
            .collect();
        for widget_id in changed {
            self.bus
                .refresh_provider(&self.document, &self.modules, &widget_id);
        }
    }

    pub fn rename_board(&mut self, title: &str, opts: CaptureOptions) {
        let next = mutations::rename_board(&self.document, title, self.clock.now());
        self.commit(next, &opts, "Rename board");
    }

    pub fn set_background(&mut self, background: Background, opts: CaptureOptions) {
        let next = mutations::set_background(&self.document, background, self.clock.now());
        self.commit(next, &opts, "Change background");
    }

    pub fn update_viewport(&mut self, viewport: Viewport, opts: CaptureOptions) {
        let next = mutations::update_viewport(&self.document, viewport, self.clock.now());
        self.commit(next, &opts, "Move view");
    }

    /// Add a widget of `module_id` with the module's default state.
    pub fn add_widget(&mut self, module_id: &str, x: f64, y: f64, opts: CaptureOptions) -> Result<WidgetId> {
        let definition = self.modules.get(module_id)?;
        let state = definition.default_blob()?;
        self.insert_widget(&definition, x, y, state, opts)
    }

    /// Add a widget of `module_id` starting from `state`.
    pub fn add_widget_with_state(
        &mut self,
        module_id: &str,
        x: f64,
        y: f64,
        state: ModuleBlob,
        opts: CaptureOptions,
    ) -> Result<WidgetId> {
        let definition = self.modules.get(module_id)?;
        let state = definition.normalize_blob(&state)?;
        self.insert_widget(&definition, x, y, state, opts)
    }

    fn insert_widget(
        &mut self,
        definition: &ModuleDefinition,
        x: f64,
        y: f64,
        initial_state: ModuleBlob,
        opts: CaptureOptions,
    ) -> Result<WidgetId> {
        let (next, widget_id) = mutations::add_widget(
            &self.document,
            NewWidget {
                module_id: definition.module_id.clone(),
                x,
                y,
                size: definition.size,
                initial_state,
            },
            self.clock.now(),
        );
        self.commit(next, &opts, "Add widget");
        log::debug!("added {} widget {}", definition.module_id, widget_id);
        Ok(widget_id)
    }

    /// Remove a widget with its state, permissions and links.
    pub fn remove_widget(&mut self, widget_id: &str, opts: CaptureOptions) -> Result<()> {
        let next = mutations::remove_widget(&self.document, widget_id, self.clock.now())?;
        self.commit(next, &opts, "Delete widget");
        Ok(())
    }

    pub fn move_widget(&mut self, widget_id: &str, x: f64, y: f64, opts: CaptureOptions) -> Result<()> {
        let next = mutations::move_widget(&self.document, widget_id, x, y, self.clock.now())?;
        self.commit(next, &opts, "Move widget");
        Ok(())
    }

    /// Resize a widget, clamped to its module's minimum size.
    pub fn resize_widget(&mut self, widget_id: &str, width: f64, height: f64, opts: CaptureOptions) -> Result<()> {
        let size = self
            .document
            .widget(widget_id)
            .and_then(|w| self.modules.resolve(&w.module_id))
            .map(|d| d.size)
            .unwrap_or_default();
        let next = mutations::resize_widget(&self.document, widget_id, width, height, &size, self.clock.now())?;
        self.commit(next, &opts, "Resize widget");
        Ok(())
    }

    pub fn set_widget_visibility(&mut self, widget_id: &str, visibility: Visibility, opts: CaptureOptions) -> Result<()> {
        let next = mutations::set_widget_visibility(&self.document, widget_id, visibility, self.clock.now())?;
        self.commit(next, &opts, "Change visibility");
        Ok(())
    }

    /// Replace a widget's state blob.
    ///
    /// The blob is checked against the widget's module when that module is
    /// registered; subscribers of the widget receive the new projection.
    pub fn update_module_state(&mut self, widget_id: &str, state: ModuleBlob, opts: CaptureOptions) -> Result<()> {
        let module_id = self
            .document
            .widget(widget_id)
            .map(|w| w.module_id.clone())
            .ok_or_else(|| BoardkitError::WidgetNotFound {
                widget_id: widget_id.to_string(),
            })?;
        let state = match self.modules.resolve(&module_id) {
            Some(definition) => definition.normalize_blob(&state)?,
            None => state,
        };

        let next = mutations::update_module_state(&self.document, widget_id, state, self.clock.now())?;
        self.commit(next, &opts, "Edit widget");
        Ok(())
    }

    /// Read a widget's state as `S`.
    pub fn module_state<S: DeserializeOwned>(&self, widget_id: &str) -> Result<S> {
        let blob = self
            .document
            .module_state(widget_id)
            .ok_or_else(|| BoardkitError::WidgetNotFound {
                widget_id: widget_id.to_string(),
            })?;
        Ok(serde_json::from_value(blob.clone())?)
    }

    /// Edit a widget's state as `S`.
    pub fn update_module<S, F>(&mut self, widget_id: &str, edit: F, opts: CaptureOptions) -> Result<()>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S),
    {
        let mut state: S = self.module_state(widget_id)?;
        edit(&mut state);
        self.update_module_state(widget_id, serde_json::to_value(state)?, opts)
    }

    pub fn add_element(&mut self, element: NewElement, opts: CaptureOptions) -> String {
        let (next, element_id) = mutations::add_element(&self.document, element, self.clock.now());
        self.commit(next, &opts, "Add element");
        element_id
    }

    pub fn update_element(&mut self, element_id: &str, patch: ElementPatch, opts: CaptureOptions) -> Result<()> {
        let next = mutations::update_element(&self.document, element_id, patch, self.clock.now())?;
        self.commit(next, &opts, "Edit element");
        Ok(())
    }

    pub fn remove_element(&mut self, element_id: &str, opts: CaptureOptions) -> Result<()> {
        let next = mutations::remove_element(&self.document, element_id, self.clock.now())?;
        self.commit(next, &opts, "Delete element");
        Ok(())
    }

    /// Move a widget or element in the shared draw order.
    pub fn reorder_z(&mut self, item_id: &str, order: ZOrder, opts: CaptureOptions) -> Result<()> {
        let next = mutations::reorder_z(&self.document, item_id, order, self.clock.now())?;
        self.commit(next, &opts, "Reorder");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data sharing
    // ------------------------------------------------------------------

    /// Connect a consumer widget to a provider widget. Returns the permission id.
    pub fn connect(
        &mut self,
        consumer_widget_id: &str,
        provider_widget_id: &str,
        contract_id: &str,
        opts: CaptureOptions,
    ) -> Result<String> {
        let connected = self.bus.connect(
            &self.document,
            &self.modules,
            consumer_widget_id,
            provider_widget_id,
            contract_id,
            self.clock.now(),
        )?;
        if connected.document != self.document {
            self.commit(connected.document, &opts, "Connect widgets");
        }
        Ok(connected.permission_id)
    }

    /// Remove a permission and stop its deliveries.
    pub fn disconnect(&mut self, permission_id: &str, opts: CaptureOptions) -> Result<()> {
        let next = self
            .bus
            .disconnect(&self.document, permission_id, self.clock.now())?;
        self.commit(next, &opts, "Disconnect widgets");
        Ok(())
    }

    /// Receive every payload delivered to `consumer_widget_id` under `contract_id`.
    pub fn listen(&mut self, consumer_widget_id: &str, contract_id: &str, callback: DeliveryCallback) {
        self.bus.listen(consumer_widget_id, contract_id, callback);
    }

    pub fn subscription_status(&self, consumer_widget_id: &str, contract_id: &str) -> SubscriptionStatus {
        self.bus.status(consumer_widget_id, contract_id)
    }

    /// Handle for cancelling a subscription from inside a delivery callback.
    /// The permission is removed on the next commit or [`BoardEngine::tick`].
    pub fn subscription_handle(&self, permission_id: &str) -> Option<SubscriptionHandle> {
        self.bus.handle(permission_id)
    }

    pub fn connections(&self, consumer_widget_id: &str, contract_id: &str) -> Vec<Connection> {
        self.bus.connections(consumer_widget_id, contract_id)
    }

    /// What a consumer currently sees for a contract: the provider's payload
    /// in single mode, the consumer's aggregate in multi mode.
    pub fn aggregated_payload(&self, consumer_widget_id: &str, contract_id: &str) -> Option<Value> {
        let widget = self.document.widget(consumer_widget_id)?;
        let definition = self.modules.resolve(&widget.module_id)?;
        let consumed = definition.consumed(contract_id)?;
        self.bus.aggregate(consumer_widget_id, consumed)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> Result<()> {
        self.sync_revocations();
        self.history.flush(&self.document, self.clock.now());
        let document = self.history.undo(&self.document)?;
        self.restore(document);
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        self.sync_revocations();
        self.history.flush(&self.document, self.clock.now());
        let document = self.history.redo()?;
        self.restore(document);
        Ok(())
    }

    /// Jump to a history entry, discarding everything after it.
    pub fn go_to_history_entry(&mut self, entry_id: &str) -> Result<()> {
        self.sync_revocations();
        self.history.flush(&self.document, self.clock.now());
        let document = self.history.go_to(entry_id)?;
        self.restore(document);
        Ok(())
    }

    /// Redo everything that was undone. Returns false if already at the latest entry.
    pub fn go_to_latest(&mut self) -> bool {
        self.sync_revocations();
        self.history.flush(&self.document, self.clock.now());
        match self.history.go_to_latest() {
            Some(document) => {
                self.restore(document);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.history.has_pending()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_items(&self) -> Vec<HistoryItem> {
        self.history.items()
    }

    /// Drop all history, keeping the current document.
    pub fn clear_history(&mut self) {
        self.history.clear(&self.document);
    }

    /// Commit a debounced capture whose window has elapsed.
    ///
    /// Hosts call this from their event loop. Returns the new entry id.
    pub fn tick(&mut self) -> Option<String> {
        self.sync_revocations();
        self.history.poll(&self.document, self.clock.now())
    }

    /// Commit any pending debounced capture now.
    pub fn flush_history(&mut self) -> Option<String> {
        self.history.flush(&self.document, self.clock.now())
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    pub fn register_action(&mut self, action: Action) -> Option<Action> {
        self.actions.register(action)
    }

    pub fn unregister_action(&mut self, action_id: &str) -> Option<Action> {
        self.actions.unregister(action_id)
    }

    /// Run an action.
    ///
    /// Unavailable actions touch nothing. A failing handler is reported as
    /// [`BoardkitError::ActionFailure`] and its partial changes are rolled back.
    pub fn execute_action(&mut self, action_id: &str, ctx: &ActionContext) -> Result<ActionOutcome> {
        let action = self
            .actions
            .get(action_id)
            .cloned()
            .ok_or_else(|| BoardkitError::ActionNotFound {
                action_id: action_id.to_string(),
            })?;

        let span = tracing::info_span!("action", id = %action_id);
        let _guard = span.enter();

        if !action.is_available(self, ctx) {
            log::debug!("action '{}' unavailable", action_id);
            return Ok(ActionOutcome::Unavailable);
        }

        match action.handler() {
            ActionHandler::Sync(run) => {
                self.run_guarded(action_id, |engine| run(engine, ctx))?;
                Ok(ActionOutcome::Completed)
            }
            ActionHandler::Deferred(start) => {
                log::debug!("action '{}' started", action_id);
                Ok(ActionOutcome::Pending(start(self, ctx)))
            }
        }
    }

    /// Apply the effect of a finished deferred run.
    ///
    /// Aborted runs are dropped without side effects.
    pub fn complete_action(&mut self, finished: FinishedAction) -> Result<ActionOutcome> {
        let span = tracing::info_span!("action", id = %finished.action_id);
        let _guard = span.enter();

        if finished.is_aborted() {
            log::info!("action '{}' aborted; effect dropped", finished.action_id);
            return Err(BoardkitError::ActionAborted {
                action_id: finished.action_id,
            });
        }
        match finished.result {
            Ok(effect) => {
                self.run_guarded(&finished.action_id, effect)?;
                Ok(ActionOutcome::Completed)
            }
            Err(source) => {
                log::warn!("action '{}' failed: {:#}", finished.action_id, source);
                Err(BoardkitError::ActionFailure {
                    action_id: finished.action_id,
                    source,
                })
            }
        }
    }

    fn run_guarded<F>(&mut self, action_id: &str, run: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> anyhow::Result<()>,
    {
        let checkpoint = Checkpoint {
            document: self.document.clone(),
            history: self.history.clone(),
            dirty: self.dirty,
        };

        if let Err(source) = run(self) {
            log::warn!("action '{}' failed: {:#}", action_id, source);
            self.document = checkpoint.document;
            self.history = checkpoint.history;
            self.dirty = checkpoint.dirty;
            self.bus.resync(&self.document, &self.modules);
            return Err(BoardkitError::ActionFailure {
                action_id: action_id.to_string(),
                source,
            });
        }
        Ok(())
    }

    /// Available actions for `ctx`, ranked for `term`.
    pub fn query_actions(&self, ctx: &ActionContext, term: &str) -> Vec<&Action> {
        self.actions.query(self, ctx, term)
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Register (or replace) a module and its "add" action.
    pub fn register_module(&mut self, definition: ModuleDefinition) -> Result<()> {
        let module_id = definition.module_id.clone();
        self.modules.register(definition)?;
        self.sync_revocations();
        if let Some(definition) = self.modules.resolve(&module_id) {
            self.actions.sync_module(&definition);
        }
        // Permissions waiting on this module can connect now; ones the new
        // definition no longer serves are pruned.
        let resync = self.bus.resync(&self.document, &self.modules);
        if !resync.pruned.is_empty() {
            let mut next = self.document.clone();
            for permission_id in &resync.pruned {
                next = mutations::revoke_permission(&next, permission_id, self.clock.now())?;
            }
            log::warn!(
                "module '{}' pruned {} permission(s)",
                module_id,
                resync.pruned.len()
            );
            self.commit(next, &CaptureOptions::skip(), "Prune permissions");
        }
        Ok(())
    }

    /// Remove a module. Its widgets and permissions stay in the document;
    /// their subscriptions go to error.
    pub fn unregister_module(&mut self, module_id: &str) -> Option<Arc<ModuleDefinition>> {
        let removed = self.modules.unregister(module_id)?;
        self.actions.remove_module(module_id);
        self.bus.mark_module_unavailable(&self.document, module_id);
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::modules::builtin::{TodoState, TASK_RADAR_MODULE_ID, TODO_MODULE_ID, TODO_PROGRESS_CONTRACT};
    use crate::state::document::{ElementKind, ElementStyle, Rect, ShapeKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> BoardEngine {
        crate::logging::init_for_tests();
        BoardEngine::with_clock(EngineConfig::default(), Arc::new(ManualClock::default())).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BoardEngine::new(EngineConfig::default().with_history_cap(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_add_widget_uses_module_defaults() {
        let mut engine = engine();
        let id = engine
            .add_widget(TODO_MODULE_ID, 10.0, 20.0, CaptureOptions::capture("Add"))
            .unwrap();

        let widget = engine.document().widget(&id).unwrap();
        assert_eq!(widget.rect.w, 280.0);
        assert_eq!(widget.rect.h, 320.0);
        assert_eq!(engine.module_state::<TodoState>(&id).unwrap(), TodoState::default());
        assert!(engine.is_dirty());
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_unknown_module_rejected() {
        let mut engine = engine();
        let err = engine
            .add_widget("calendar", 0.0, 0.0, CaptureOptions::skip())
            .unwrap_err();
        assert_eq!(err.error_code(), "MODULE_NOT_REGISTERED");
        assert!(engine.document().board.widgets.is_empty());
    }

    #[test]
    fn test_resize_clamps_to_module_minimum() {
        let mut engine = engine();
        let id = engine
            .add_widget(TODO_MODULE_ID, 0.0, 0.0, CaptureOptions::skip())
            .unwrap();
        engine
            .resize_widget(&id, 10.0, 10.0, CaptureOptions::skip())
            .unwrap();

        let rect = engine.document().widget(&id).unwrap().rect;
        assert_eq!((rect.w, rect.h), (200.0, 160.0));
    }

    #[test]
    fn test_update_module_state_rejects_foreign_shape() {
        let mut engine = engine();
        let id = engine
            .add_widget(TODO_MODULE_ID, 0.0, 0.0, CaptureOptions::skip())
            .unwrap();

        let err = engine
            .update_module_state(&id, json!({"items": "nope"}), CaptureOptions::capture("Edit"))
            .unwrap_err();
        assert_eq!(err.error_code(), "MODULE_STATE");
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_provider_change_reaches_consumer() {
        let mut engine = engine();
        let todo = engine
            .add_widget_with_state(
                TODO_MODULE_ID,
                0.0,
                0.0,
                serde_json::to_value(TodoState::with_progress("A", 0, 2)).unwrap(),
                CaptureOptions::skip(),
            )
            .unwrap();
        let radar = engine
            .add_widget(TASK_RADAR_MODULE_ID, 400.0, 0.0, CaptureOptions::skip())
            .unwrap();
        engine
            .connect(&radar, &todo, TODO_PROGRESS_CONTRACT, CaptureOptions::capture("Connect"))
            .unwrap();

        engine
            .update_module(&todo, |s: &mut TodoState| s.items[0].done = true, CaptureOptions::skip())
            .unwrap();

        assert_eq!(
            engine.aggregated_payload(&radar, TODO_PROGRESS_CONTRACT),
            Some(json!({"done": 1, "total": 2, "sources": 1}))
        );
    }

    #[test]
    fn test_undo_restores_subscriptions() {
        let mut engine = engine();
        let todo = engine
            .add_widget(TODO_MODULE_ID, 0.0, 0.0, CaptureOptions::capture("Add todo"))
            .unwrap();
        let radar = engine
            .add_widget(TASK_RADAR_MODULE_ID, 400.0, 0.0, CaptureOptions::capture("Add radar"))
            .unwrap();
        engine
            .connect(&radar, &todo, TODO_PROGRESS_CONTRACT, CaptureOptions::capture("Connect"))
            .unwrap();
        engine
            .remove_widget(&todo, CaptureOptions::capture("Delete"))
            .unwrap();
        assert!(engine.connections(&radar, TODO_PROGRESS_CONTRACT).is_empty());

        engine.undo().unwrap();
        assert_eq!(engine.connections(&radar, TODO_PROGRESS_CONTRACT).len(), 1);
        assert_eq!(
            engine.subscription_status(&radar, TODO_PROGRESS_CONTRACT),
            SubscriptionStatus::Connected
        );
    }

    #[test]
    fn test_elements_share_draw_order() {
        let mut engine = engine();
        let widget = engine
            .add_widget(TODO_MODULE_ID, 0.0, 0.0, CaptureOptions::skip())
            .unwrap();
        let element = engine.add_element(
            NewElement {
                rect: Rect::new(0.0, 0.0, 50.0, 50.0),
                style: ElementStyle::default(),
                kind: ElementKind::Shape {
                    shape: ShapeKind::Rectangle,
                },
            },
            CaptureOptions::skip(),
        );

        engine
            .reorder_z(&element, ZOrder::SendToBack, CaptureOptions::skip())
            .unwrap();
        assert_eq!(mutations::draw_order(engine.document()), vec![element, widget]);
    }

    #[test]
    fn test_load_normalizes_module_state() {
        let mut engine = engine();
        let raw = json!({
            "version": 3,
            "id": "doc-1",
            "meta": {"title": "Loaded", "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"},
            "board": {
                "viewport": {"x": 0.0, "y": 0.0, "zoom": 1.0},
                "widgets": [
                    {"id": "w1", "moduleId": "todo", "rect": {"x": 0, "y": 0, "w": 280, "h": 320}, "zIndex": 0},
                    {"id": "w2", "moduleId": "todo", "rect": {"x": 0, "y": 0, "w": 280, "h": 320}, "zIndex": 1},
                    {"id": "w3", "moduleId": "sketchpad", "rect": {"x": 0, "y": 0, "w": 280, "h": 320}, "zIndex": 2}
                ],
                "elements": []
            },
            "modules": {
                "w1": {"items": "garbage"},
                "w3": {"strokes": 4}
            },
            "dataSharing": {"permissions": [], "links": []}
        });

        let report = engine.load_value(raw).unwrap();

        assert_eq!(engine.module_state::<TodoState>("w1").unwrap(), TodoState::default());
        assert_eq!(engine.module_state::<TodoState>("w2").unwrap(), TodoState::default());
        assert_eq!(engine.document().module_state("w3"), Some(&json!({"strokes": 4})));
        assert!(report.repaired.contains(&"modules.w1".to_string()));
        assert!(report.repaired.contains(&"modules.w2".to_string()));
        assert!(!engine.is_dirty());
        assert!(engine.history().is_empty());
    }

    #[test]
    fn test_register_module_adds_action() {
        #[derive(Debug, Default, Serialize, serde::Deserialize)]
        struct Note {
            text: String,
        }

        let mut engine = engine();
        engine
            .register_module(ModuleDefinition::builder::<Note>("note").title("Note").build())
            .unwrap();
        assert!(engine.actions().contains("board.add-note"));

        engine.unregister_module("note");
        assert!(!engine.actions().contains("board.add-note"));
    }
}
