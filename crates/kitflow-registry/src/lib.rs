pub mod metadata;
pub mod registry;

pub use metadata::{Complexity, KitFactory, KitMetadata, KitSummary};
pub use registry::{global_registry, reset_global_registry, KitQuery, KitRegistry, RegistrySummary};
