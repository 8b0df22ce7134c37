//! Shared types, error model, and configuration for lawledger.
//!
//! This crate is the foundation depended on by all other lawledger crates.
//! It provides:
//! - [`LawLedgerError`]: the unified error type
//! - Domain types ([`Category`], [`DocumentRecord`], [`Provenance`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - Path-safe naming and worker pool sizing helpers

pub mod config;
pub mod error;
pub mod naming;
pub mod pool;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DiscoveryConfig, HttpConfig, RemoteConfig, SessionConfig, StorageConfig,
    ThrottleConfig, WorkersConfig, WorkflowConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_config,
};
pub use error::{LawLedgerError, Result};
pub use naming::{MAX_NAME_BYTES, ascii_name, candidate_stems, sanitize_component, truncate_bytes};
pub use pool::{allocate_workers, per_worker_delay};
pub use types::{Category, DocumentRecord, Provenance, SUBTYPE_FOLDERS, subtype_folder};
