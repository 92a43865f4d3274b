//! Data-sharing bus
//!
//! Push-based, one-way delivery of provider projections to consumer widgets.
//! Permissions persist in the document; subscriptions are the live side and
//! are rebuilt from the permissions whenever the document is replaced.
//!
//! Delivery iterates a snapshot of the subscriber list and checks each token
//! against the live set right before invoking, so a subscription revoked
//! during a delivery never sees another payload.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::contract::{ConsumptionMode, ContractId};
use crate::error::{ConnectError, Result};
use crate::modules::definition::{ConsumedContract, ModuleDefinition};
use crate::modules::registry::ModuleRegistry;
use crate::state::document::{new_id, Document, Permission, PermissionScope, WidgetId};
use crate::state::mutations;

/// Lifecycle of one consumer/contract subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error(ConnectError),
}

impl SubscriptionStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, SubscriptionStatus::Error(_))
    }
}

/// A payload pushed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub permission_id: String,
    pub consumer_widget_id: WidgetId,
    pub provider_widget_id: WidgetId,
    pub contract_id: String,
    pub payload: Value,
}

/// Consumer-side callback, invoked synchronously during publication.
pub type DeliveryCallback = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// A live connection as seen from the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub permission_id: String,
    pub provider_widget_id: WidgetId,
    pub contract_id: String,
    /// Latest payload, if the provider has produced one.
    pub payload: Option<Value>,
}

/// Result of a successful [`DataBus::connect`].
#[derive(Debug, Clone)]
pub struct Connected {
    pub document: Document,
    pub permission_id: String,
    /// Permissions revoked because the consumer reads this contract in single mode.
    pub replaced: Vec<String>,
}

/// Outcome of rebuilding subscriptions from a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResyncReport {
    pub established: usize,
    /// Permissions that no longer resolve and should be removed from the document.
    pub pruned: Vec<String>,
    /// Permissions kept in the document whose subscription is in error.
    pub errored: Vec<String>,
}

/// Revocation handle for one subscription.
///
/// Safe to use from inside a delivery callback. Revoking stops deliveries
/// immediately and the subscription stops counting as connected. The
/// permission stays in the document until the owner folds it in through
/// [`DataBus::revoked_permissions`] and [`DataBus::disconnect`]; the engine
/// does this on its next commit.
#[derive(Clone)]
pub struct SubscriptionHandle {
    token: u64,
    live: Arc<Mutex<HashSet<u64>>>,
}

impl SubscriptionHandle {
    pub fn revoke(&self) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }

    pub fn is_active(&self) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&self.token)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    contract_id: String,
    provider_widget_id: WidgetId,
}

#[derive(Debug, Clone)]
struct Subscriber {
    token: u64,
    permission_id: String,
    consumer_widget_id: WidgetId,
}

/// Everything `connect` needs once a link has been checked.
struct CheckedLink {
    contract: ContractId,
    mode: ConsumptionMode,
    provider: Arc<ModuleDefinition>,
}

/// Subscriber registry keyed by contract and provider widget.
#[derive(Default)]
pub struct DataBus {
    subscribers: HashMap<SubscriptionKey, Vec<Subscriber>>,
    live: Arc<Mutex<HashSet<u64>>>,
    next_token: u64,
    /// Latest payload per permission.
    inbox: HashMap<String, Value>,
    statuses: HashMap<(WidgetId, String), SubscriptionStatus>,
    listeners: HashMap<(WidgetId, String), DeliveryCallback>,
}

impl fmt::Debug for DataBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBus")
            .field("subscriptions", &self.subscription_count())
            .field("statuses", &self.statuses)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl DataBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `consumer` to `provider` for `contract_id`.
    ///
    /// On success the returned document carries the new permission and link,
    /// and the consumer has already received the provider's current payload.
    /// On failure the subscription goes to error and nothing is written.
    pub fn connect(
        &mut self,
        doc: &Document,
        modules: &ModuleRegistry,
        consumer_widget_id: &str,
        provider_widget_id: &str,
        contract_id: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Connected, ConnectError> {
        let status_key = (consumer_widget_id.to_string(), contract_id.to_string());
        self.statuses
            .insert(status_key.clone(), SubscriptionStatus::Connecting);

        let link = match check_link(doc, modules, consumer_widget_id, provider_widget_id, contract_id) {
            Ok(link) => link,
            Err(e) => {
                log::warn!(
                    "connect {} -> {} ({}) failed: {}",
                    consumer_widget_id,
                    provider_widget_id,
                    contract_id,
                    e
                );
                self.statuses
                    .insert(status_key, SubscriptionStatus::Error(e.clone()));
                return Err(e);
            }
        };

        let existing = doc.data_sharing.permissions.iter().find(|p| {
            p.consumer_widget_id == consumer_widget_id
                && p.provider_widget_id == provider_widget_id
                && p.contract_id == contract_id
        });
        if let Some(permission) = existing {
            if !self.has_subscription(&permission.id) {
                self.subscribe(doc, permission, &link);
            }
            self.statuses.insert(status_key, SubscriptionStatus::Connected);
            return Ok(Connected {
                document: doc.clone(),
                permission_id: permission.id.clone(),
                replaced: Vec::new(),
            });
        }

        let mut next = doc.clone();
        let mut replaced = Vec::new();
        if link.mode == ConsumptionMode::Single {
            let previous: Vec<String> = doc
                .data_sharing
                .permissions
                .iter()
                .filter(|p| p.consumer_widget_id == consumer_widget_id && p.contract_id == contract_id)
                .map(|p| p.id.clone())
                .collect();
            for permission_id in previous {
                self.unsubscribe(&permission_id);
                // Collected from `doc` just above, so the permission exists.
                if let Ok(pruned) = mutations::revoke_permission(&next, &permission_id, now) {
                    next = pruned;
                }
                replaced.push(permission_id);
            }
        }

        let permission = Permission {
            id: new_id(),
            consumer_widget_id: consumer_widget_id.to_string(),
            provider_widget_id: provider_widget_id.to_string(),
            contract_id: contract_id.to_string(),
            scope: PermissionScope::Read,
            granted_at: now,
        };
        let permission_id = permission.id.clone();
        next = mutations::grant_permission(&next, permission.clone(), now);
        self.subscribe(&next, &permission, &link);
        self.statuses.insert(status_key, SubscriptionStatus::Connected);

        log::info!(
            "connected {} -> {} ({})",
            consumer_widget_id,
            provider_widget_id,
            contract_id
        );
        Ok(Connected {
            document: next,
            permission_id,
            replaced,
        })
    }

    /// Revoke a permission: the live subscription first, then the record.
    pub fn disconnect(&mut self, doc: &Document, permission_id: &str, now: DateTime<Utc>) -> Result<Document> {
        let next = mutations::revoke_permission(doc, permission_id, now)?;
        self.unsubscribe(permission_id);

        if let Some(permission) = doc.permission(permission_id) {
            let still_connected = next.data_sharing.permissions.iter().any(|p| {
                p.consumer_widget_id == permission.consumer_widget_id
                    && p.contract_id == permission.contract_id
            });
            if !still_connected {
                self.statuses.insert(
                    (permission.consumer_widget_id.clone(), permission.contract_id.clone()),
                    SubscriptionStatus::Idle,
                );
            }
        }
        log::debug!("disconnected permission {}", permission_id);
        Ok(next)
    }

    /// Rebuild every subscription from the document's permissions.
    ///
    /// Permissions whose modules are not registered stay in the document with
    /// their subscription in error; permissions that no longer match the
    /// registered contracts are reported for pruning.
    pub fn resync(&mut self, doc: &Document, modules: &ModuleRegistry) -> ResyncReport {
        self.subscribers.clear();
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inbox.clear();
        self.statuses.clear();

        let mut report = ResyncReport::default();
        for permission in &doc.data_sharing.permissions {
            let status_key = (
                permission.consumer_widget_id.clone(),
                permission.contract_id.clone(),
            );
            match check_link(
                doc,
                modules,
                &permission.consumer_widget_id,
                &permission.provider_widget_id,
                &permission.contract_id,
            ) {
                Ok(link) => {
                    self.subscribe(doc, permission, &link);
                    self.statuses.insert(status_key, SubscriptionStatus::Connected);
                    report.established += 1;
                }
                Err(e @ ConnectError::ModuleUnavailable { .. }) => {
                    log::warn!("permission {} kept without subscription: {}", permission.id, e);
                    report.errored.push(permission.id.clone());
                    self.statuses.insert(status_key, SubscriptionStatus::Error(e));
                }
                Err(e) => {
                    log::warn!("pruning permission {}: {}", permission.id, e);
                    report.pruned.push(permission.id.clone());
                    self.statuses
                        .entry(status_key)
                        .or_insert(SubscriptionStatus::Error(e));
                }
            }
        }
        report
    }

    /// Drop subscriptions whose permission is no longer in the document.
    pub fn retain_permissions(&mut self, doc: &Document) {
        let stale: Vec<String> = self
            .subscribers
            .values()
            .flatten()
            .filter(|s| doc.permission(&s.permission_id).is_none())
            .map(|s| s.permission_id.clone())
            .collect();
        for permission_id in stale {
            self.unsubscribe(&permission_id);
        }
        self.statuses
            .retain(|(consumer, _), _| doc.has_widget(consumer));
        self.listeners
            .retain(|(consumer, _), _| doc.has_widget(consumer));
    }

    /// Re-project a provider's state and push it to its subscribers.
    ///
    /// Returns the number of deliveries made.
    pub fn refresh_provider(&mut self, doc: &Document, modules: &ModuleRegistry, provider_widget_id: &str) -> usize {
        let contracts: Vec<String> = self
            .subscribers
            .keys()
            .filter(|k| k.provider_widget_id == provider_widget_id)
            .map(|k| k.contract_id.clone())
            .collect();
        if contracts.is_empty() {
            return 0;
        }

        let Some(definition) = doc
            .widget(provider_widget_id)
            .and_then(|w| modules.resolve(&w.module_id))
        else {
            return 0;
        };

        let mut delivered = 0;
        for contract_id in contracts {
            let Ok(contract) = ContractId::parse(&contract_id) else {
                continue;
            };
            if let Some(payload) = project(doc, &definition, &contract, provider_widget_id) {
                delivered += self.publish(provider_widget_id, &contract_id, payload);
            }
        }
        delivered
    }

    /// Push `payload` to every live subscriber of `(contract_id, provider)`.
    pub fn publish(&mut self, provider_widget_id: &str, contract_id: &str, payload: Value) -> usize {
        let span = tracing::debug_span!(
            "bus.publish",
            provider = %provider_widget_id,
            contract = %contract_id
        );
        let _guard = span.enter();

        let key = SubscriptionKey {
            contract_id: contract_id.to_string(),
            provider_widget_id: provider_widget_id.to_string(),
        };
        let Some(subscribers) = self.subscribers.get(&key) else {
            return 0;
        };
        let snapshot = subscribers.clone();

        let mut delivered = 0;
        for subscriber in snapshot {
            if !self.is_live(subscriber.token) {
                continue;
            }
            self.inbox
                .insert(subscriber.permission_id.clone(), payload.clone());

            let listener = self
                .listeners
                .get(&(subscriber.consumer_widget_id.clone(), contract_id.to_string()))
                .cloned();
            if let Some(listener) = listener {
                listener(&Delivery {
                    permission_id: subscriber.permission_id.clone(),
                    consumer_widget_id: subscriber.consumer_widget_id.clone(),
                    provider_widget_id: provider_widget_id.to_string(),
                    contract_id: contract_id.to_string(),
                    payload: payload.clone(),
                });
            }
            delivered += 1;
        }
        log::debug!("published {} to {} subscriber(s)", contract_id, delivered);
        delivered
    }

    /// Register a callback for everything `consumer` receives under `contract_id`.
    pub fn listen(&mut self, consumer_widget_id: &str, contract_id: &str, callback: DeliveryCallback) {
        self.listeners.insert(
            (consumer_widget_id.to_string(), contract_id.to_string()),
            callback,
        );
    }

    pub fn unlisten(&mut self, consumer_widget_id: &str, contract_id: &str) -> bool {
        self.listeners
            .remove(&(consumer_widget_id.to_string(), contract_id.to_string()))
            .is_some()
    }

    /// Revocation handle for the subscription of `permission_id`.
    pub fn handle(&self, permission_id: &str) -> Option<SubscriptionHandle> {
        self.find_subscriber(permission_id)
            .map(|s| SubscriptionHandle {
                token: s.token,
                live: Arc::clone(&self.live),
            })
    }

    pub fn status(&self, consumer_widget_id: &str, contract_id: &str) -> SubscriptionStatus {
        let status = self
            .statuses
            .get(&(consumer_widget_id.to_string(), contract_id.to_string()))
            .cloned()
            .unwrap_or_default();
        if status == SubscriptionStatus::Connected
            && !self.has_live_subscription(consumer_widget_id, contract_id)
        {
            return SubscriptionStatus::Idle;
        }
        status
    }

    /// Permissions whose subscription was revoked through a handle but not
    /// yet disconnected.
    pub fn revoked_permissions(&self) -> Vec<String> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let mut revoked: Vec<String> = self
            .subscribers
            .values()
            .flatten()
            .filter(|s| !live.contains(&s.token))
            .map(|s| s.permission_id.clone())
            .collect();
        revoked.sort();
        revoked.dedup();
        revoked
    }

    /// Mark every subscription of `module_id`'s widgets as unavailable.
    pub fn mark_module_unavailable(&mut self, doc: &Document, module_id: &str) {
        let affected: Vec<&Permission> = doc
            .data_sharing
            .permissions
            .iter()
            .filter(|p| {
                [&p.consumer_widget_id, &p.provider_widget_id]
                    .iter()
                    .any(|w| doc.widget(w).map(|w| w.module_id == module_id).unwrap_or(false))
            })
            .collect();
        for permission in affected {
            self.unsubscribe(&permission.id);
            self.statuses.insert(
                (
                    permission.consumer_widget_id.clone(),
                    permission.contract_id.clone(),
                ),
                SubscriptionStatus::Error(ConnectError::ModuleUnavailable {
                    module_id: module_id.to_string(),
                }),
            );
        }
    }

    /// Live connections of `consumer` for `contract_id`, oldest first.
    pub fn connections(&self, consumer_widget_id: &str, contract_id: &str) -> Vec<Connection> {
        let mut found: Vec<(u64, Connection)> = self
            .subscribers
            .iter()
            .filter(|(key, _)| key.contract_id == contract_id)
            .flat_map(|(key, subscribers)| {
                subscribers
                    .iter()
                    .filter(move |s| s.consumer_widget_id == consumer_widget_id && self.is_live(s.token))
                    .map(move |s| {
                        (
                            s.token,
                            Connection {
                                permission_id: s.permission_id.clone(),
                                provider_widget_id: key.provider_widget_id.clone(),
                                contract_id: key.contract_id.clone(),
                                payload: self.inbox.get(&s.permission_id).cloned(),
                            },
                        )
                    })
            })
            .collect();
        found.sort_by_key(|(token, _)| *token);
        found.into_iter().map(|(_, c)| c).collect()
    }

    /// The consumer's view of a contract: the single payload, or the
    /// aggregate over all connections in multi mode.
    pub fn aggregate(&self, consumer_widget_id: &str, consumed: &ConsumedContract) -> Option<Value> {
        let payloads: Vec<Value> = self
            .connections(consumer_widget_id, &consumed.contract_id)
            .into_iter()
            .filter_map(|c| c.payload)
            .collect();
        match consumed.mode {
            ConsumptionMode::Single => payloads.into_iter().next(),
            ConsumptionMode::Multi => Some(consumed.aggregate(&payloads)),
        }
    }

    pub fn latest_payload(&self, permission_id: &str) -> Option<&Value> {
        self.inbox.get(permission_id)
    }

    pub fn has_subscription(&self, permission_id: &str) -> bool {
        self.find_subscriber(permission_id).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.values().map(Vec::len).sum()
    }

    fn subscribe(&mut self, doc: &Document, permission: &Permission, link: &CheckedLink) {
        self.next_token += 1;
        let token = self.next_token;
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token);

        let key = SubscriptionKey {
            contract_id: permission.contract_id.clone(),
            provider_widget_id: permission.provider_widget_id.clone(),
        };
        self.subscribers.entry(key).or_default().push(Subscriber {
            token,
            permission_id: permission.id.clone(),
            consumer_widget_id: permission.consumer_widget_id.clone(),
        });

        // Consumers start from the provider's current state.
        if let Some(payload) = project(doc, &link.provider, &link.contract, &permission.provider_widget_id) {
            self.inbox.insert(permission.id.clone(), payload);
        }
    }

    fn unsubscribe(&mut self, permission_id: &str) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        for subscribers in self.subscribers.values_mut() {
            subscribers.retain(|s| {
                if s.permission_id == permission_id {
                    live.remove(&s.token);
                    false
                } else {
                    true
                }
            });
        }
        drop(live);
        self.subscribers.retain(|_, subscribers| !subscribers.is_empty());
        self.inbox.remove(permission_id);
    }

    fn find_subscriber(&self, permission_id: &str) -> Option<&Subscriber> {
        self.subscribers
            .values()
            .flatten()
            .find(|s| s.permission_id == permission_id)
    }

    fn has_live_subscription(&self, consumer_widget_id: &str, contract_id: &str) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        self.subscribers
            .iter()
            .filter(|(key, _)| key.contract_id == contract_id)
            .flat_map(|(_, subscribers)| subscribers)
            .any(|s| s.consumer_widget_id == consumer_widget_id && live.contains(&s.token))
    }

    fn is_live(&self, token: u64) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&token)
    }
}

fn check_link(
    doc: &Document,
    modules: &ModuleRegistry,
    consumer_widget_id: &str,
    provider_widget_id: &str,
    contract_id: &str,
) -> std::result::Result<CheckedLink, ConnectError> {
    let expected = ContractId::parse(contract_id)?;

    let consumer = doc
        .widget(consumer_widget_id)
        .ok_or_else(|| ConnectError::ConsumerMissing {
            widget_id: consumer_widget_id.to_string(),
        })?;
    let provider = doc
        .widget(provider_widget_id)
        .ok_or_else(|| ConnectError::ProviderMissing {
            widget_id: provider_widget_id.to_string(),
        })?;
    if consumer.id == provider.id {
        return Err(ConnectError::SelfConnection);
    }

    let consumer_def = modules
        .resolve(&consumer.module_id)
        .ok_or_else(|| ConnectError::ModuleUnavailable {
            module_id: consumer.module_id.clone(),
        })?;
    let provider_def = modules
        .resolve(&provider.module_id)
        .ok_or_else(|| ConnectError::ModuleUnavailable {
            module_id: provider.module_id.clone(),
        })?;

    let consumed = consumer_def
        .consumed(contract_id)
        .ok_or_else(|| ConnectError::NotConsumed {
            module_id: consumer.module_id.clone(),
            contract_id: contract_id.to_string(),
        })?;
    let provided = provider_def
        .provided(&expected)
        .ok_or_else(|| ConnectError::NotProvided {
            module_id: provider.module_id.clone(),
            contract_id: contract_id.to_string(),
        })?;
    expected.check_offered(&provided.contract.id()?)?;

    Ok(CheckedLink {
        contract: expected,
        mode: consumed.mode,
        provider: provider_def,
    })
}

fn project(
    doc: &Document,
    definition: &ModuleDefinition,
    contract: &ContractId,
    provider_widget_id: &str,
) -> Option<Value> {
    let provided = definition.provided(contract)?;
    let blob = match doc.module_state(provider_widget_id) {
        Some(blob) => blob.clone(),
        None => definition.default_blob().ok()?,
    };
    match definition.project(provided, &blob) {
        Ok(payload) => Some(payload),
        Err(e) => {
            log::warn!("projection of {} for {} failed: {}", contract, provider_widget_id, e);
            None
        }
    }
}
