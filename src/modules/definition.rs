//! Module capability descriptors.
//!
//! A [`ModuleDefinition`] is plain data plus closures. The typed state of a
//! module only exists inside those closures: the document store sees opaque
//! JSON blobs, and type recovery happens in the module's own
//! serialize/deserialize pair.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BoardkitError, Result};
use crate::sharing::contract::{ConsumptionMode, ContractId, DataContract};
use crate::state::document::ModuleBlob;
use crate::state::mutations::SizeConstraints;

/// Module state recovered from a blob, erased at the store boundary.
pub type ErasedState = Box<dyn Any + Send>;

type StateFactory = Arc<dyn Fn() -> ErasedState + Send + Sync>;
type SerializeFn = Arc<dyn Fn(&(dyn Any + Send)) -> std::result::Result<Value, String> + Send + Sync>;
type DeserializeFn = Arc<dyn Fn(&Value) -> std::result::Result<ErasedState, String> + Send + Sync>;
type ProjectFn = Arc<dyn Fn(&(dyn Any + Send)) -> std::result::Result<Value, String> + Send + Sync>;
type AggregateFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A contract a module publishes, with the projection from its state.
#[derive(Clone)]
pub struct ProvidedContract {
    pub contract: DataContract,
    project: ProjectFn,
}

impl ProvidedContract {
    pub fn contract_id(&self) -> &str {
        &self.contract.contract_id
    }
}

impl fmt::Debug for ProvidedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidedContract")
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

/// A contract a module reads.
#[derive(Clone)]
pub struct ConsumedContract {
    pub contract_id: String,
    pub mode: ConsumptionMode,
    aggregate: Option<AggregateFn>,
}

impl ConsumedContract {
    /// Fold the latest payloads of all connections into one value.
    ///
    /// Without an aggregator the payloads are returned as an array.
    pub fn aggregate(&self, payloads: &[Value]) -> Value {
        match &self.aggregate {
            Some(aggregate) => aggregate(payloads),
            None => Value::Array(payloads.to_vec()),
        }
    }
}

impl fmt::Debug for ConsumedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumedContract")
            .field("contract_id", &self.contract_id)
            .field("mode", &self.mode)
            .field("aggregated", &self.aggregate.is_some())
            .finish()
    }
}

/// Everything the engine knows about a module type.
#[derive(Clone)]
pub struct ModuleDefinition {
    /// Stable identifier referenced by widgets; never renamed.
    pub module_id: String,
    pub version: String,
    /// Display name, used for the generated "Add" action.
    pub title: String,
    pub size: SizeConstraints,
    pub provides: Vec<ProvidedContract>,
    pub consumes: Vec<ConsumedContract>,
    default_state: StateFactory,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("module_id", &self.module_id)
            .field("version", &self.version)
            .field("title", &self.title)
            .field("size", &self.size)
            .field("provides", &self.provides)
            .field("consumes", &self.consumes)
            .finish_non_exhaustive()
    }
}

impl ModuleDefinition {
    /// Start a definition whose state is `S`.
    pub fn builder<S>(module_id: impl Into<String>) -> ModuleBuilder<S>
    where
        S: Serialize + DeserializeOwned + Default + Send + 'static,
    {
        let module_id = module_id.into();
        ModuleBuilder {
            title: module_id.clone(),
            module_id,
            version: "1.0.0".to_string(),
            size: SizeConstraints::default(),
            provides: Vec::new(),
            consumes: Vec::new(),
            _state: PhantomData,
        }
    }

    pub fn default_state(&self) -> ErasedState {
        (self.default_state)()
    }

    pub fn serialize(&self, state: &(dyn Any + Send)) -> Result<ModuleBlob> {
        (self.serialize)(state).map_err(|reason| self.state_error(reason))
    }

    pub fn deserialize(&self, blob: &ModuleBlob) -> Result<ErasedState> {
        (self.deserialize)(blob).map_err(|reason| self.state_error(reason))
    }

    /// The blob a new widget starts with.
    pub fn default_blob(&self) -> Result<ModuleBlob> {
        self.serialize(self.default_state().as_ref())
    }

    /// Read a blob through the module's own codec and write it back.
    ///
    /// Fills fields the module added since the blob was written and fails if
    /// the blob cannot be read at all.
    pub fn normalize_blob(&self, blob: &ModuleBlob) -> Result<ModuleBlob> {
        let state = self.deserialize(blob)?;
        self.serialize(state.as_ref())
    }

    /// The provided contract sharing a name with `contract_id`, whatever its version.
    pub fn provided(&self, contract_id: &ContractId) -> Option<&ProvidedContract> {
        self.provides.iter().find(|p| {
            p.contract
                .id()
                .map(|id| id.name() == contract_id.name())
                .unwrap_or(false)
        })
    }

    /// The consumed contract with exactly this id.
    pub fn consumed(&self, contract_id: &str) -> Option<&ConsumedContract> {
        self.consumes.iter().find(|c| c.contract_id == contract_id)
    }

    /// Project a state blob to the payload of one provided contract.
    pub fn project(&self, provided: &ProvidedContract, blob: &ModuleBlob) -> Result<Value> {
        let state = self.deserialize(blob)?;
        (provided.project)(state.as_ref()).map_err(|reason| self.state_error(reason))
    }

    /// Check identifiers, contracts and sizes.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| BoardkitError::InvalidModuleDefinition {
            module_id: self.module_id.clone(),
            reason,
        };

        let id_ok = !self.module_id.is_empty()
            && self
                .module_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !id_ok {
            return Err(invalid(
                "module id must be lowercase letters, digits, '-' or '_'".to_string(),
            ));
        }

        let size = &self.size;
        if size.min_width <= 0.0
            || size.min_height <= 0.0
            || size.default_width < size.min_width
            || size.default_height < size.min_height
        {
            return Err(invalid(format!("inconsistent size constraints {:?}", size)));
        }

        let mut names = Vec::new();
        for provided in &self.provides {
            let id = provided
                .contract
                .id()
                .map_err(|e| invalid(e.to_string()))?;
            if names.contains(&id.name().to_string()) {
                return Err(invalid(format!("contract '{}' provided twice", id.name())));
            }
            names.push(id.name().to_string());
        }
        for consumed in &self.consumes {
            ContractId::parse(&consumed.contract_id).map_err(|e| invalid(e.to_string()))?;
        }

        Ok(())
    }

    fn state_error(&self, reason: String) -> BoardkitError {
        BoardkitError::ModuleState {
            module_id: self.module_id.clone(),
            reason,
        }
    }
}

/// Typed builder for [`ModuleDefinition`].
pub struct ModuleBuilder<S> {
    module_id: String,
    version: String,
    title: String,
    size: SizeConstraints,
    provides: Vec<ProvidedContract>,
    consumes: Vec<ConsumedContract>,
    _state: PhantomData<fn() -> S>,
}

fn downcast<S: 'static>(state: &(dyn Any + Send)) -> std::result::Result<&S, String> {
    state
        .downcast_ref::<S>()
        .ok_or_else(|| "state belongs to a different module".to_string())
}

impl<S> ModuleBuilder<S>
where
    S: Serialize + DeserializeOwned + Default + Send + 'static,
{
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, size: SizeConstraints) -> Self {
        self.size = size;
        self
    }

    /// Publish `contract_id`, projecting the module state with `project`.
    pub fn provides<P, F>(mut self, contract_id: &str, payload_schema: Value, project: F) -> Self
    where
        P: Serialize,
        F: Fn(&S) -> P + Send + Sync + 'static,
    {
        let project: ProjectFn = Arc::new(move |state: &(dyn Any + Send)| {
            let state = downcast::<S>(state)?;
            serde_json::to_value(project(state)).map_err(|e| e.to_string())
        });
        self.provides.push(ProvidedContract {
            contract: DataContract::new(contract_id, payload_schema),
            project,
        });
        self
    }

    /// Read `contract_id` from providers.
    pub fn consumes(mut self, contract_id: &str, mode: ConsumptionMode) -> Self {
        self.consumes.push(ConsumedContract {
            contract_id: contract_id.to_string(),
            mode,
            aggregate: None,
        });
        self
    }

    /// Read `contract_id` from any number of providers, folding their payloads with `aggregate`.
    ///
    /// Payloads that do not match `P` are skipped.
    pub fn consumes_aggregated<P, A, F>(mut self, contract_id: &str, aggregate: F) -> Self
    where
        P: DeserializeOwned,
        A: Serialize,
        F: Fn(&[P]) -> A + Send + Sync + 'static,
    {
        let aggregate: AggregateFn = Arc::new(move |payloads: &[Value]| {
            let typed: Vec<P> = payloads
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
            serde_json::to_value(aggregate(&typed)).unwrap_or(Value::Null)
        });
        self.consumes.push(ConsumedContract {
            contract_id: contract_id.to_string(),
            mode: ConsumptionMode::Multi,
            aggregate: Some(aggregate),
        });
        self
    }

    pub fn build(self) -> ModuleDefinition {
        ModuleDefinition {
            module_id: self.module_id,
            version: self.version,
            title: self.title,
            size: self.size,
            provides: self.provides,
            consumes: self.consumes,
            default_state: Arc::new(|| Box::new(S::default()) as ErasedState),
            serialize: Arc::new(|state: &(dyn Any + Send)| {
                let state = downcast::<S>(state)?;
                serde_json::to_value(state).map_err(|e| e.to_string())
            }),
            deserialize: Arc::new(|blob: &Value| {
                serde_json::from_value::<S>(blob.clone())
                    .map(|s| Box::new(s) as ErasedState)
                    .map_err(|e| e.to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        #[serde(default)]
        count: u32,
        #[serde(default)]
        label: String,
    }

    fn counter_module() -> ModuleDefinition {
        ModuleDefinition::builder::<Counter>("counter")
            .title("Counter")
            .provides("counter.value.v1", json!({"type": "integer"}), |s: &Counter| s.count)
            .build()
    }

    #[test]
    fn test_default_blob() {
        let module = counter_module();
        assert_eq!(module.default_blob().unwrap(), json!({"count": 0, "label": ""}));
    }

    #[test]
    fn test_normalize_fills_missing_fields() {
        let module = counter_module();
        let blob = module.normalize_blob(&json!({"count": 4})).unwrap();
        assert_eq!(blob, json!({"count": 4, "label": ""}));
    }

    #[test]
    fn test_normalize_rejects_unreadable_blob() {
        let module = counter_module();
        let err = module.normalize_blob(&json!({"count": "many"})).unwrap_err();
        assert_eq!(err.error_code(), "MODULE_STATE");
    }

    #[test]
    fn test_project_through_typed_state() {
        let module = counter_module();
        let contract = ContractId::parse("counter.value.v1").unwrap();
        let provided = module.provided(&contract).unwrap();
        assert_eq!(module.project(provided, &json!({"count": 9})).unwrap(), json!(9));
    }

    #[test]
    fn test_foreign_state_is_rejected() {
        let module = counter_module();
        let foreign: ErasedState = Box::new(String::from("not a counter"));
        assert!(module.serialize(foreign.as_ref()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ids() {
        let module = ModuleDefinition::builder::<Counter>("Bad Id").build();
        assert!(module.validate().is_err());

        let module = ModuleDefinition::builder::<Counter>("counter")
            .provides("counter-without-version", Value::Null, |s: &Counter| s.count)
            .build();
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_defaults() {
        let module = ModuleDefinition::builder::<Counter>("counter")
            .size(SizeConstraints {
                min_width: 300.0,
                min_height: 100.0,
                default_width: 200.0,
                default_height: 100.0,
            })
            .build();
        assert!(module.validate().is_err());
    }

    #[test]
    fn test_aggregate_skips_foreign_payloads() {
        let module = ModuleDefinition::builder::<Counter>("sum")
            .consumes_aggregated("counter.value.v1", |values: &[u32]| values.iter().sum::<u32>())
            .build();
        let consumed = module.consumed("counter.value.v1").unwrap();
        assert_eq!(consumed.mode, ConsumptionMode::Multi);
        assert_eq!(consumed.aggregate(&[json!(2), json!("x"), json!(5)]), json!(7));
    }
}
