/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Reference reconciliation loop for the provisioner.
//!
//! The supervisors poll resources in pending-work states, take the advisory
//! lock, run one step and persist the result. Waiting is modelled as state:
//! a resource that is not ready yet simply stays where it is until the next
//! tick.
pub mod background_tasks;
pub mod delivery;
pub mod error;
pub mod store;
pub mod supervisor;

pub use delivery::{DeliveryPolicy, DeliverySupervisor, WebhookSender};
pub use error::{Result, SupervisorError};
pub use store::MemoryStore;
pub use supervisor::{ClusterProvisioner, ClusterSupervisor, EventSink, SupervisorOptions};
