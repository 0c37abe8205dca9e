//! Hidden subcommands invoked by generated plan scripts
//!
//! The OpenCore build script and the recovery stamp script shell back
//! into this binary for the typed file edits: the config.plist patch and
//! the HFS+ volume-flag fix. Both validate their inputs and exit
//! non-zero with a message the executor surfaces.

use anyhow::{bail, Context};
use osxpve_core::adapter::ProxmoxAdapter;
use osxpve_core::ocplist::{patch_config_file, PatchOptions, PlatformValues};
use osxpve_core::stamp::fix_hfs_flags;
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
pub struct PlistPatchArgs {
    /// Path to the mounted config.plist
    pub plist: PathBuf,

    /// Kernel quirk to force on (repeatable)
    #[arg(long = "kernel-quirk")]
    pub kernel_quirks: Vec<String>,

    /// Append -v to boot-args
    #[arg(long)]
    pub verbose_boot: bool,

    /// SMBIOS serial for PlatformInfo.Generic
    #[arg(long)]
    pub serial: Option<String>,

    /// SMBIOS MLB for PlatformInfo.Generic
    #[arg(long)]
    pub mlb: Option<String>,

    /// SMBIOS UUID for PlatformInfo.Generic
    #[arg(long)]
    pub uuid: Option<String>,

    /// SMBIOS ROM (12 hex chars) for PlatformInfo.Generic
    #[arg(long)]
    pub rom: Option<String>,

    /// SMBIOS model for PlatformInfo.Generic
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct HfsFixArgs {
    /// Recovery image to fix
    pub image: PathBuf,
}

pub fn plist_patch(args: PlistPatchArgs) -> anyhow::Result<i32> {
    for quirk in &args.kernel_quirks {
        if quirk.is_empty() || !quirk.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("invalid kernel quirk name: '{quirk}'");
        }
    }

    let platform = match (&args.serial, &args.mlb, &args.uuid, &args.rom, &args.model) {
        (None, None, None, None, None) => None,
        (Some(serial), Some(mlb), Some(uuid), Some(rom), Some(model)) => Some(PlatformValues {
            serial: serial.clone(),
            mlb: mlb.clone(),
            uuid: uuid.clone(),
            rom: rom.clone(),
            model: model.clone(),
        }),
        _ => bail!("--serial, --mlb, --uuid, --rom, and --model must be given together"),
    };

    let opts = PatchOptions {
        kernel_quirks: args.kernel_quirks,
        verbose_boot: args.verbose_boot,
        platform,
    };
    patch_config_file(&args.plist, &opts)
        .with_context(|| format!("patching {}", args.plist.display()))?;
    println!("config.plist patched");
    Ok(0)
}

pub fn hfs_fix(args: HfsFixArgs) -> anyhow::Result<i32> {
    let runner = ProxmoxAdapter::new();
    fix_hfs_flags(&args.image, &runner)
        .with_context(|| format!("fixing HFS+ flags on {}", args.image.display()))?;
    println!("HFS+ flags fixed");
    Ok(0)
}
