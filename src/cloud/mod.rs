// ABOUTME: Cloud resource-management API seen as opaque capabilities.
// ABOUTME: Exports the capability traits, provider data types and the in-memory provider.

mod error;
pub mod memory;
mod traits;
mod types;

pub use error::CloudError;
pub use memory::{CloudCall, InMemoryCloud};
pub use traits::{ArtifactOps, Cloud, StackOps, TableOps};
pub use types::{
    IndexState, IndexStatus, StackDescription, StackEvent, StackStatus, UpdateRequest,
};
