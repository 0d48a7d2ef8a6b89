/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Records, requests and filters for every resource the provisioner manages.
pub mod backups;
pub mod clusters;
pub mod db_migrations;
pub mod db_restorations;
pub mod deletion_report;
pub mod env_vars;
pub mod events;
pub mod groups;
pub mod installations;
pub mod multitenant_databases;
pub mod node_groups;
pub mod subscriptions;
pub mod volumes;

pub use backups::InstallationBackup;
pub use clusters::Cluster;
pub use db_migrations::InstallationDbMigrationOperation;
pub use db_restorations::InstallationDbRestorationOperation;
pub use events::{Event, StateChangeEvent};
pub use groups::Group;
pub use installations::Installation;
pub use multitenant_databases::MultitenantDatabase;
pub use subscriptions::{EventDelivery, Subscription};
