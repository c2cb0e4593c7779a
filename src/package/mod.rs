//! Package management module
//!
//! The on-disk registry of installed packages: environment slots, the
//! per-environment metadata record, executable links, name resolution and
//! garbage collection.

mod gc;
mod links;
mod meta;
mod registry;
pub mod requirement;
mod resolver;
mod slot;

pub use gc::{GarbageCollector, PurgeReport};
pub use links::SymlinkReconciler;
pub use meta::{MetadataRecord, MetadataStore};
pub use registry::{EnvId, InstalledPackage, Registry, SortOrder};
pub use resolver::{PackageResolver, PackageToken, Resolution};
pub use slot::{MAX_ENVIRONMENTS, Slot, SlotAllocator, SlotLock, next_free};
