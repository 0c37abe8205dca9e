//! osxpve Core Library
//!
//! The installation orchestrator: host probes, preflight, SMBIOS identity
//! generation, asset resolution and download, install planning, and the
//! executor that applies plans against the Proxmox toolchain.
//!
//! The core is single-threaded and synchronous; long-running operations
//! report progress through callbacks and front-ends decide threading.

pub mod adapter;
pub mod assets;
pub mod diagnostics;
pub mod download;
pub mod executor;
pub mod ocplist;
pub mod planner;
pub mod preflight;
pub mod probes;
pub mod smbios;
pub mod snapshot;
pub mod stamp;

pub use adapter::{CommandRunner, ProxmoxAdapter, RecordingRunner};
pub use executor::{apply_plan, StepCallback};
pub use planner::{build_destroy_plan, build_plan, ensure_identity, render_script};
pub use snapshot::{create_snapshot, rollback_hints};
