//! vnflcm-storage: persistence contract for the VNF lifecycle engine.
//!
//! [`LcmStorage`] stores VNF instances, operation records and the
//! GrantRequest/Grant pair of each unfinished operation. Writes are staged
//! in a snapshot and become visible together on commit, so an instance and
//! its operation record (or a grant pair and its record) are never observed
//! half-written.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{GrantRecord, StorageDump};
pub use traits::LcmStorage;
