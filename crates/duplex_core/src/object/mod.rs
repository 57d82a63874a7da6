//! # Core Objects
//!
//! Every synchronizable resource is split in two halves:
//! - a sim-side [`CoreObject`], mutated by gameplay code
//! - a core-side [`CoreObjectCore`], read by the core (render) thread
//!
//! The sim half owns its core half through an `Arc`. The manager and the
//! sync payloads in flight only observe the core half through `Weak`.

mod contract;
mod id;
mod state;

pub use contract::{CoreObject, CoreObjectCore, CoreObjectExt};
pub use id::{CoreObjectId, DirtyState, ALL_DIRTY_FLAGS};
pub use state::CoreObjectState;
