//! Connection Descriptor Store
//!
//! Typed descriptors, merge-patch updates over sealed secrets, groups, and
//! the repository seam that persists them.

pub mod descriptors;
pub mod groups;
pub mod redb_repo;
pub mod repository;
pub mod types;

pub use descriptors::{DescriptorStore, ResolvedSecrets};
pub use groups::{BatchReport, GroupStore, ItemOutcome, ItemStatus, MembershipChange};
pub use redb_repo::RedbRepository;
pub use repository::{ConnectionRepository, MemoryRepository, RepositoryError};
pub use types::*;
