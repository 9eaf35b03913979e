// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed persistence and workflow engines for field operation plans.
//!
//! The crate is organised around one [`SqliteStore`] shared by every engine:
//!
//! - [`SyncEngine`] converges stored operations onto uploaded full-snapshot documents,
//! - [`OperationStore`], [`PortalStore`], [`LinkStore`], [`MarkerStore`], [`KeyStore`] and
//!   [`TeamStore`] carry the fine-grained per-item workflow,
//! - [`OrderingEngine`] renumbers links and markers in bulk,
//! - [`AccessResolver`] answers every permission question the engines ask.
//!
//! Whole-document convergence runs inside a single strictly serialized transaction; per-item
//! actions are single-row updates straight against the pool. Every successful mutation restamps
//! the operation's monotonic change-version so clients can poll cheaply with
//! [`OperationStore::populate_if_newer`].

mod access;
mod anchors;
mod error;
mod keys;
mod links;
mod markers;
mod notify;
mod operations;
mod order;
mod portals;
mod sqlite;
mod sync;
mod teams;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use access::AccessResolver;
pub use error::OpError;
pub use keys::KeyStore;
pub use links::LinkStore;
pub use markers::MarkerStore;
pub use notify::{LogNotifier, Notifier};
#[cfg(any(test, feature = "test_utils"))]
pub use notify::test_utils::RecordingNotifier;
pub use operations::{OperationStat, OperationStore};
pub use order::{Collection, OrderingEngine};
pub use portals::PortalStore;
pub use sqlite::{
    DecodeError, SqliteError, SqliteStore, SqliteStoreBuilder, Transaction, TransactionPermit,
    connection_pool, create_database, drop_database, migrations, run_pending_migrations,
};
pub use sync::SyncEngine;
pub use teams::TeamStore;
