//! Recovery image conditioning
//!
//! Linux refuses to mount an HFS+ volume read-write while its "locked"
//! bit is set or the "unmounted cleanly" bit is clear. This module flips
//! the volume-attributes word of the first partition so the stamping
//! script can mount the recovery image and write the boot-picker label
//! and icon.

use crate::adapter::CommandRunner;
use osxpve_common::{Error, Result};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::info;

/// HFS+ volume header: 1024 bytes into the partition, attributes word at
/// offset 4 within the header.
const VOLUME_ATTRIBUTES_OFFSET: u64 = 1024 + 4;

/// kHFSVolumeUnmountedBit: set means the volume was cleanly unmounted.
const ATTR_UNMOUNTED: u32 = 0x100;

/// kHFSVolumeSoftwareLockBit: set means the volume is locked read-only.
const ATTR_LOCKED: u32 = 0x800;

/// Extract the first-partition start sector from `sgdisk -i 1` output.
pub fn parse_first_sector(sgdisk_output: &str) -> Result<u64> {
    for line in sgdisk_output.lines() {
        if let Some(rest) = line.trim().strip_prefix("First sector:") {
            let token = rest
                .split('(')
                .next()
                .unwrap_or("")
                .trim();
            return token.parse::<u64>().map_err(|_| {
                Error::Internal(format!("unparseable first sector in sgdisk output: {line}"))
            });
        }
    }
    Err(Error::Internal(
        "no 'First sector' line in sgdisk output".into(),
    ))
}

/// Flip the volume-attributes word at a known partition start: set
/// "unmounted cleanly", clear "locked".
pub fn fix_volume_flags_at(image: &Path, start_sector: u64) -> Result<u32> {
    let offset = start_sector * 512 + VOLUME_ATTRIBUTES_OFFSET;
    let mut file = OpenOptions::new().read(true).write(true).open(image)?;

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    let attributes = u32::from_be_bytes(buf);

    let fixed = (attributes | ATTR_UNMOUNTED) & !ATTR_LOCKED;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&fixed.to_be_bytes())?;

    Ok(fixed)
}

/// Locate the first partition via sgdisk and fix its HFS+ flags so the
/// volume mounts read-write.
pub fn fix_hfs_flags(image: &Path, runner: &dyn CommandRunner) -> Result<()> {
    let result = runner.run(&[
        "sgdisk".into(),
        "-i".into(),
        "1".into(),
        image.display().to_string(),
    ]);
    if !result.ok {
        return Err(Error::Subprocess {
            command: format!("sgdisk -i 1 {}", image.display()),
            returncode: result.returncode,
            output: result.output,
        });
    }
    let start_sector = parse_first_sector(&result.output)?;
    let fixed = fix_volume_flags_at(image, start_sector)?;
    info!(
        "HFS+ flags fixed on {} (start sector {}, attributes {:#010x})",
        image.display(),
        start_sector,
        fixed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RecordingRunner;

    const SGDISK_OUTPUT: &str = "\
Partition GUID code: 48465300-0000-11AA-AA11-00306543ECAC (Apple HFS/HFS+)
Partition unique GUID: 11111111-2222-3333-4444-555555555555
First sector: 2048 (at 1024.0 KiB)
Last sector: 1230847 (at 601.0 MiB)
Partition size: 1228800 sectors (600.0 MiB)
Partition name: 'Recovery'";

    #[test]
    fn test_parse_first_sector() {
        assert_eq!(parse_first_sector(SGDISK_OUTPUT).unwrap(), 2048);
    }

    #[test]
    fn test_parse_first_sector_missing() {
        assert!(parse_first_sector("Partition name: 'x'").is_err());
    }

    fn make_image(start_sector: u64, attributes: u32) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.img");
        let size = (start_sector * 512 + 2048) as usize;
        let mut data = vec![0u8; size];
        let offset = (start_sector * 512 + VOLUME_ATTRIBUTES_OFFSET) as usize;
        data[offset..offset + 4].copy_from_slice(&attributes.to_be_bytes());
        std::fs::write(&path, data).unwrap();
        (dir, path)
    }

    fn read_attributes(path: &Path, start_sector: u64) -> u32 {
        let data = std::fs::read(path).unwrap();
        let offset = (start_sector * 512 + VOLUME_ATTRIBUTES_OFFSET) as usize;
        u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_fix_volume_flags_sets_clean_clears_lock() {
        // Locked, dirty volume: locked bit set, unmounted bit clear.
        let (_dir, path) = make_image(2048, 0x0000_0800 | 0x0000_2000);
        let fixed = fix_volume_flags_at(&path, 2048).unwrap();
        assert_eq!(fixed & ATTR_UNMOUNTED, ATTR_UNMOUNTED);
        assert_eq!(fixed & ATTR_LOCKED, 0);
        // Unrelated bits survive.
        assert_eq!(fixed & 0x2000, 0x2000);
        assert_eq!(read_attributes(&path, 2048), fixed);
    }

    #[test]
    fn test_fix_volume_flags_idempotent() {
        let (_dir, path) = make_image(2048, 0x0800);
        let first = fix_volume_flags_at(&path, 2048).unwrap();
        let second = fix_volume_flags_at(&path, 2048).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fix_hfs_flags_via_sgdisk() {
        let (_dir, path) = make_image(2048, 0x0800);
        let runner = RecordingRunner::new().respond_ok("sgdisk -i 1", SGDISK_OUTPUT);
        fix_hfs_flags(&path, &runner).unwrap();
        assert_eq!(read_attributes(&path, 2048) & ATTR_LOCKED, 0);
        let commands = runner.commands();
        assert!(commands[0].starts_with("sgdisk -i 1"));
    }

    #[test]
    fn test_fix_hfs_flags_sgdisk_failure_propagates() {
        let (_dir, path) = make_image(2048, 0x0800);
        let runner = RecordingRunner::new().respond_fail("sgdisk", 2, "not a GPT disk");
        let err = fix_hfs_flags(&path, &runner).unwrap_err();
        assert!(matches!(err, Error::Subprocess { .. }));
    }
}
