//! Built-in reference modules.
//!
//! `todo` publishes its completion progress; `task-radar` reads progress from
//! any number of todo lists and shows the combined totals.

pub mod task_radar;
pub mod todo;

use super::definition::ModuleDefinition;

pub use task_radar::{RadarSummary, TaskRadarState, TASK_RADAR_MODULE_ID};
pub use todo::{TodoItem, TodoProgress, TodoState, TODO_MODULE_ID, TODO_PROGRESS_CONTRACT};

/// Definitions of every built-in module.
pub fn definitions() -> Vec<ModuleDefinition> {
    vec![todo::definition(), task_radar::definition()]
}
