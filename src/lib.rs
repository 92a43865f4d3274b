//! Boardkit - State engine for modular canvas boards
//!
//! A board is one serializable [`Document`]: a canvas of widgets and drawing
//! elements, the opaque state of every widget's module, and the permissions
//! that let widgets share data. The engine provides:
//!
//! - a document store of pure mutations with a schema migration pipeline
//! - a module registry that keeps each module's state opaque to the rest
//! - an action registry for palettes, menus and shortcuts
//! - a one-way data-sharing bus between provider and consumer widgets
//! - snapshot-based undo/redo with debounced capture
//!
//! # Architecture
//!
//! [`BoardEngine`] is an explicit context object owning all of the above for
//! one board. Nothing is global; tests build isolated engines freely.

pub mod actions;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod modules;
pub mod sharing;
pub mod state;

pub use actions::{Action, ActionContext, ActionOutcome, ActionRegistry, ActionSurface};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::BoardEngine;
pub use error::{BoardkitError, ConnectError, Result};
pub use modules::{ModuleDefinition, ModuleRegistry};
pub use sharing::{ConsumptionMode, ContractId, DataBus, SubscriptionStatus};
pub use state::{CaptureOptions, Document, LoadReport, CURRENT_SCHEMA_VERSION};
