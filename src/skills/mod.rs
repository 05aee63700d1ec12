pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use repo_types::SkillCatalogEntry;
pub use services::{normalize_skill_names, ReconcileReport, SkillSynchronizer, SyncReport};
