use serde::{Deserialize, Serialize};

use super::todo::{TodoProgress, TODO_PROGRESS_CONTRACT};
use crate::modules::definition::ModuleDefinition;
use crate::state::mutations::SizeConstraints;

pub const TASK_RADAR_MODULE_ID: &str = "task-radar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRadarState {
    #[serde(default = "default_title")]
    pub title: String,
    /// Hide sources whose lists are complete.
    #[serde(default)]
    pub hide_completed: bool,
}

fn default_title() -> String {
    "Task Radar".to_string()
}

impl Default for TaskRadarState {
    fn default() -> Self {
        Self {
            title: default_title(),
            hide_completed: false,
        }
    }
}

/// Progress summed over every connected todo list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RadarSummary {
    pub done: u64,
    pub total: u64,
    pub sources: usize,
}

impl RadarSummary {
    pub fn from_progress(progress: &[TodoProgress]) -> Self {
        progress.iter().fold(
            Self {
                sources: progress.len(),
                ..Self::default()
            },
            |acc, p| Self {
                done: acc.done + p.done,
                total: acc.total + p.total,
                ..acc
            },
        )
    }
}

pub fn definition() -> ModuleDefinition {
    ModuleDefinition::builder::<TaskRadarState>(TASK_RADAR_MODULE_ID)
        .title("Task Radar")
        .version("1.0.0")
        .size(SizeConstraints {
            min_width: 220.0,
            min_height: 140.0,
            default_width: 320.0,
            default_height: 240.0,
        })
        .consumes_aggregated(TODO_PROGRESS_CONTRACT, RadarSummary::from_progress)
        .build()
}
