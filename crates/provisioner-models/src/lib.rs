/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Core domain model for the provisioner: resource records, request
//! validation, patching, state transitions and advisory locks.
//!
//! Nothing in this crate performs I/O. Waiting is modelled as state, and
//! every validator and patch is side-effect-free on failure.
pub mod error;
pub mod ids;
pub mod locks;
pub mod models;
pub mod patch;
pub mod query;
pub mod transitions;

pub use error::{ModelError, Result};
