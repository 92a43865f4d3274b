//! Error handling for Boardkit
//!
//! Registries and the document store return these as values; nothing in the
//! engine panics across a module boundary.

use thiserror::Error;

/// Result type alias for Boardkit operations
pub type Result<T> = std::result::Result<T, BoardkitError>;

/// Main error type for Boardkit operations
#[derive(Error, Debug)]
pub enum BoardkitError {
    // Load Errors
    #[error("Document schema version {found} is newer than supported version {supported}")]
    FatalLoad { found: u32, supported: u32 },

    #[error("Invalid document schema version: {value}")]
    InvalidSchemaVersion { value: String },

    #[error("Malformed document: {reason}")]
    MalformedDocument { reason: String },

    #[error("Migration from v{from} to v{to} failed: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },

    // Document Errors
    #[error("Widget not found: {widget_id}")]
    WidgetNotFound { widget_id: String },

    #[error("Element not found: {element_id}")]
    ElementNotFound { element_id: String },

    #[error("Element is locked: {element_id}")]
    ElementLocked { element_id: String },

    // Module Errors
    #[error("Module not registered: {module_id}")]
    ModuleNotRegistered { module_id: String },

    #[error("Invalid module definition '{module_id}': {reason}")]
    InvalidModuleDefinition { module_id: String, reason: String },

    #[error("Module '{module_id}' rejected its state: {reason}")]
    ModuleState { module_id: String, reason: String },

    // Data Sharing Errors
    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Permission not found: {permission_id}")]
    PermissionNotFound { permission_id: String },

    // Action Errors
    #[error("Action not found: {action_id}")]
    ActionNotFound { action_id: String },

    #[error("Action '{action_id}' failed: {source}")]
    ActionFailure {
        action_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Action '{action_id}' was aborted")]
    ActionAborted { action_id: String },

    // History Errors
    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("History entry not found: {entry_id}")]
    HistoryEntryNotFound { entry_id: String },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a consumer could not be connected to a provider.
///
/// Local to one subscription: the subscription goes to `error` and the rest of
/// the document is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("consumer widget '{widget_id}' does not exist")]
    ConsumerMissing { widget_id: String },

    #[error("provider widget '{widget_id}' does not exist")]
    ProviderMissing { widget_id: String },

    #[error("a widget cannot consume its own contract")]
    SelfConnection,

    #[error("module '{module_id}' is not registered")]
    ModuleUnavailable { module_id: String },

    #[error("module '{module_id}' does not consume '{contract_id}'")]
    NotConsumed {
        module_id: String,
        contract_id: String,
    },

    #[error("module '{module_id}' does not provide '{contract_id}'")]
    NotProvided {
        module_id: String,
        contract_id: String,
    },

    #[error("contract '{contract_id}' expects major version {expected}, provider offers {found}")]
    VersionMismatch {
        contract_id: String,
        expected: u32,
        found: u32,
    },

    #[error("invalid contract id '{contract_id}'")]
    InvalidContractId { contract_id: String },
}

impl BoardkitError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            BoardkitError::FatalLoad { .. } => "FATAL_LOAD",
            BoardkitError::InvalidSchemaVersion { .. } => "INVALID_SCHEMA_VERSION",
            BoardkitError::MalformedDocument { .. } => "MALFORMED_DOCUMENT",
            BoardkitError::MigrationFailed { .. } => "MIGRATION_FAILED",
            BoardkitError::WidgetNotFound { .. } => "WIDGET_NOT_FOUND",
            BoardkitError::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            BoardkitError::ElementLocked { .. } => "ELEMENT_LOCKED",
            BoardkitError::ModuleNotRegistered { .. } => "MODULE_NOT_REGISTERED",
            BoardkitError::InvalidModuleDefinition { .. } => "INVALID_MODULE_DEFINITION",
            BoardkitError::ModuleState { .. } => "MODULE_STATE",
            BoardkitError::Connect(_) => "CONTRACT_MISMATCH",
            BoardkitError::PermissionNotFound { .. } => "PERMISSION_NOT_FOUND",
            BoardkitError::ActionNotFound { .. } => "ACTION_NOT_FOUND",
            BoardkitError::ActionFailure { .. } => "ACTION_FAILURE",
            BoardkitError::ActionAborted { .. } => "ACTION_ABORTED",
            BoardkitError::NothingToUndo => "NOTHING_TO_UNDO",
            BoardkitError::NothingToRedo => "NOTHING_TO_REDO",
            BoardkitError::HistoryEntryNotFound { .. } => "HISTORY_ENTRY_NOT_FOUND",
            BoardkitError::InvalidConfig { .. } => "INVALID_CONFIG",
            BoardkitError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Only a document from a newer engine (or with an unreadable version) is
    /// fatal; everything else leaves the engine in a consistent state.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            BoardkitError::FatalLoad { .. }
                | BoardkitError::InvalidSchemaVersion { .. }
                | BoardkitError::MigrationFailed { .. }
        )
    }

    /// Returns a user-friendly recovery suggestion.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            BoardkitError::FatalLoad { .. } => {
                Some("This board was saved by a newer version. Update the application to open it.")
            }
            BoardkitError::ElementLocked { .. } => Some("Unlock the element before editing it."),
            BoardkitError::ModuleNotRegistered { .. } => {
                Some("Enable the module that created this widget.")
            }
            BoardkitError::Connect(_) => {
                Some("Pick a provider widget that publishes a compatible contract.")
            }
            BoardkitError::NothingToUndo => Some("There are no actions to undo."),
            BoardkitError::NothingToRedo => Some("There are no undone actions to redo."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BoardkitError::FatalLoad {
            found: 9,
            supported: 3,
        };
        assert_eq!(err.error_code(), "FATAL_LOAD");
        assert!(!err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_connect_error_is_local() {
        let err: BoardkitError = ConnectError::ProviderMissing {
            widget_id: "w-1".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "CONTRACT_MISMATCH");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("w-1"));
    }

    #[test]
    fn test_action_failure_keeps_source() {
        let err = BoardkitError::ActionFailure {
            action_id: "board.add-todo".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(err.to_string().contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
