//! modelgate-state — durable routing state for modelgate.
//!
//! Holds the deployment-wide [`TierState`] and one [`SessionRecord`] per
//! live session. Records are JSON-encoded into a [`KvStore`]; the bundled
//! [`RedbKv`] keeps them in [redb](https://docs.rs/redb) with expiry kept
//! in a side table and checked on every read.
//!
//! # Guarantees
//!
//! - A session is assigned once: `set_session` with different arguments for
//!   a live session fails with `SessionConflict` instead of overwriting.
//! - The tier state is one record, so a tier flip and its threshold change
//!   commit together.
//! - Backend failures surface as `StoreUnavailable`; nothing falls back to a
//!   default tier.
//!
//! The [`ModelStateStore`] is `Clone` + `Send` + `Sync` (backed by
//! `Arc<dyn KvStore>`) and can be shared across async tasks.

pub mod error;
pub mod kv;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use kv::{KvStore, RedbKv, epoch_millis};
pub use store::ModelStateStore;
pub use types::*;
