use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::modules::definition::ModuleDefinition;
use crate::state::document::new_id;
use crate::state::mutations::SizeConstraints;

pub const TODO_MODULE_ID: &str = "todo";
pub const TODO_PROGRESS_CONTRACT: &str = "todo.progress.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl TodoItem {
    pub fn new(text: impl Into<String>, done: bool) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoState {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub items: Vec<TodoItem>,
}

fn default_title() -> String {
    "To-do".to_string()
}

impl Default for TodoState {
    fn default() -> Self {
        Self {
            title: default_title(),
            items: Vec::new(),
        }
    }
}

impl TodoState {
    /// A list with `done` checked items out of `total`.
    pub fn with_progress(title: &str, done: usize, total: usize) -> Self {
        Self {
            title: title.to_string(),
            items: (0..total)
                .map(|i| TodoItem::new(format!("Task {}", i + 1), i < done))
                .collect(),
        }
    }

    pub fn progress(&self) -> TodoProgress {
        TodoProgress {
            done: self.items.iter().filter(|i| i.done).count() as u64,
            total: self.items.len() as u64,
        }
    }
}

/// Payload of `todo.progress.v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TodoProgress {
    pub done: u64,
    pub total: u64,
}

pub fn definition() -> ModuleDefinition {
    ModuleDefinition::builder::<TodoState>(TODO_MODULE_ID)
        .title("To-do List")
        .version("1.0.0")
        .size(SizeConstraints {
            min_width: 200.0,
            min_height: 160.0,
            default_width: 280.0,
            default_height: 320.0,
        })
        .provides(
            TODO_PROGRESS_CONTRACT,
            json!({
                "type": "object",
                "properties": {
                    "done": {"type": "integer"},
                    "total": {"type": "integer"}
                }
            }),
            TodoState::progress,
        )
        .build()
}
