//! Data-Sharing Bus
//!
//! Versioned contracts between modules and the bus that delivers provider
//! payloads to connected consumers.

pub mod bus;
pub mod contract;

pub use bus::{
    Connected, Connection, DataBus, Delivery, DeliveryCallback, ResyncReport, SubscriptionHandle,
    SubscriptionStatus,
};
pub use contract::{ConsumptionMode, ContractId, DataContract};
