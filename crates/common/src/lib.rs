//! osxpve Common Library
//!
//! Shared types, validation, and error taxonomy for the osxpve workspace.

pub mod error;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
pub use types::*;
pub use validate::validate_config;

/// osxpve version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default Proxmox ISO template directory
pub const DEFAULT_ISO_DIR: &str = "/var/lib/vz/template/iso";

/// Default storage target for VM disks
pub const DEFAULT_STORAGE: &str = "local-lvm";

/// Default network bridge
pub const DEFAULT_BRIDGE: &str = "vmbr0";

/// Directory for generated artefacts (logs, snapshots, bundles)
pub fn generated_dir() -> std::path::PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
        .join("generated")
}
