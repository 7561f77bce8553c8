//! Escrow-backed task marketplace core
//!
//! This crate implements the escrow lifecycle and task-expiration
//! reconciliation engine for a task marketplace: clients fund work
//! through an escrow address, freelancers are paid on completion, and
//! an expiry sweep refunds abandoned engagements. Four record sets
//! (tasks, escrows, wallets, transactions) are kept mutually consistent
//! behind a single write-lock and a whole-snapshot persistence boundary.
//!
//! Authentication, profiles, chat and UI are external collaborators;
//! the core receives already-resolved user identifiers and talks to the
//! chain through the [`observer::ChainObserver`] seam.

pub mod error;
pub mod escrow;
pub mod keys;
pub mod models;
pub mod node;
pub mod observer;
pub mod settings;
pub mod store;
pub mod task_manager;
pub mod wallet;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
