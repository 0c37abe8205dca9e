//! Generated shell scripts for the image-conditioning plan steps
//!
//! The complex stages run as a single `bash -c "<script>"` so the shell
//! boundary is explicit in the plan. Trusted literals live here; every
//! user-derived token is regex-validated up front and additionally
//! shell-quoted on insertion. The config.plist edit and the HFS+ flag fix
//! are delegated to hidden subcommands of this binary so the typed code
//! paths own all file mutation.

use crate::ocplist::AMD_KERNEL_QUIRKS;
use osxpve_common::shell_quote;
use std::path::Path;

/// Mount points owned by the currently executing plan step.
pub const OC_SRC_MOUNT: &str = "/tmp/oc-src";
pub const OC_DEST_MOUNT: &str = "/tmp/oc-dest";
pub const RECOVERY_MOUNT: &str = "/tmp/oc-recovery";

fn q(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

/// Detach any loop devices still bound to an image from a previous run.
fn detach_stale_loops(image: &Path) -> String {
    format!(
        "for lo in $(losetup -j {img} -O NAME --noheadings 2>/dev/null); do losetup -d $lo; done; ",
        img = q(image)
    )
}

/// partprobe can lag on slow storage; retry it before trusting the
/// partition nodes.
fn partprobe_retry(loop_var: &str) -> String {
    format!(
        "for i in 1 2 3 4 5; do partprobe ${loop_var} 2>/dev/null && break; sleep 1; done; sleep 1 && "
    )
}

fn unmount_lazy(mountpoint: &str) -> String {
    format!("(umount {mountpoint} 2>/dev/null || umount -l {mountpoint})")
}

/// Extra flags handed to the hidden `plist-patch` subcommand.
pub struct PlistPatchArgs {
    pub amd: bool,
    pub verbose_boot: bool,
    /// (serial, mlb, uuid, rom, model) when Apple services are enabled
    /// and an identity is present.
    pub platform: Option<(String, String, String, String, String)>,
}

fn plist_patch_invocation(exe: &str, args: &PlistPatchArgs) -> String {
    let mut cmd = format!("{exe} plist-patch {OC_DEST_MOUNT}/EFI/OC/config.plist");
    if args.amd {
        for quirk in AMD_KERNEL_QUIRKS {
            cmd.push_str(&format!(" --kernel-quirk {quirk}"));
        }
    }
    if args.verbose_boot {
        cmd.push_str(" --verbose-boot");
    }
    if let Some((serial, mlb, uuid, rom, model)) = &args.platform {
        cmd.push_str(&format!(
            " --serial {} --mlb {} --uuid {} --rom {} --model {}",
            shell_quote(serial),
            shell_quote(mlb),
            shell_quote(uuid),
            shell_quote(rom),
            shell_quote(model)
        ));
    }
    cmd
}

/// Build the OpenCore ESP disk: clean stale holders, lay down GPT+EF00,
/// copy the source image contents, patch config.plist, and hide the
/// partition from the boot picker.
pub fn oc_disk_script(
    exe: &str,
    opencore_path: &Path,
    dest: &Path,
    patch: &PlistPatchArgs,
) -> String {
    let src = q(opencore_path);
    let dst = q(dest);
    let mut script = String::new();

    // Idempotent cleanup of anything a previous failed run left behind.
    script.push_str(&format!("umount {OC_SRC_MOUNT} 2>/dev/null; umount {OC_DEST_MOUNT} 2>/dev/null; "));
    script.push_str(&detach_stale_loops(opencore_path));
    script.push_str(&detach_stale_loops(dest));

    // 1 GiB raw image with a single EFI System Partition labelled OPENCORE.
    script.push_str(&format!("dd if=/dev/zero of={dst} bs=1M count=1024 && "));
    script.push_str(&format!("sgdisk -Z {dst} && "));
    script.push_str(&format!("sgdisk -n 1:0:0 -t 1:EF00 -c 1:OPENCORE {dst} && "));

    // Attach the source image. The vfat partition is detected by
    // filesystem type, not index, so any layout (raw FAT32, MBR p1, GPT
    // p2) works; raw mount is the last resort.
    script.push_str(&format!("SRC_LOOP=$(losetup -P --find --show {src}) && "));
    script.push_str(&partprobe_retry("SRC_LOOP"));
    script.push_str(&format!("mkdir -p {OC_SRC_MOUNT} && "));
    script.push_str(
        "SRC_PART=$(blkid -o device $SRC_LOOP ${SRC_LOOP}p* 2>/dev/null \
         | xargs -I{} sh -c 'blkid -s TYPE -o value {} 2>/dev/null | grep -q vfat && echo {}' \
         | head -1) && ",
    );
    script.push_str(&format!(
        "if [ -n \"$SRC_PART\" ]; then mount \"$SRC_PART\" {OC_SRC_MOUNT}; \
         else echo 'WARN: no vfat partition detected, mounting raw'; mount $SRC_LOOP {OC_SRC_MOUNT}; fi && "
    ));
    script.push_str(&format!("mountpoint -q {OC_SRC_MOUNT} && "));

    // Format and mount the destination ESP.
    script.push_str(&format!("DEST_LOOP=$(losetup -P --find --show {dst}) && "));
    script.push_str(&partprobe_retry("DEST_LOOP"));
    script.push_str(&format!("mkfs.fat -F 32 -n OPENCORE ${{DEST_LOOP}}p1 && "));
    script.push_str(&format!("mkdir -p {OC_DEST_MOUNT} && mount ${{DEST_LOOP}}p1 {OC_DEST_MOUNT} && "));

    // Copy everything, hidden files included, and insist on EFI/OC.
    script.push_str(&format!("cp -a {OC_SRC_MOUNT}/. {OC_DEST_MOUNT}/ && "));
    script.push_str(&format!("[ -d {OC_DEST_MOUNT}/EFI/OC ] && "));

    script.push_str(&plist_patch_invocation(exe, patch));
    script.push_str(" && ");

    // Hidden from the boot picker until the user presses Space.
    script.push_str(&format!("echo Auxiliary > {OC_DEST_MOUNT}/.contentVisibility && "));

    script.push_str(&unmount_lazy(OC_SRC_MOUNT));
    script.push_str(" && losetup -d $SRC_LOOP && ");
    script.push_str(&unmount_lazy(OC_DEST_MOUNT));
    script.push_str(" && losetup -d $DEST_LOOP");

    script
}

/// Stamp the recovery image: fix the HFS+ flags so Linux mounts it
/// read-write, write the boot-picker label, and copy the installer icon
/// to the volume root.
pub fn recovery_stamp_script(exe: &str, recovery_path: &Path, label: &str) -> String {
    let img = q(recovery_path);
    let mut script = String::new();

    script.push_str(&format!("{exe} hfs-fix {img} && "));
    script.push_str(&format!("umount {RECOVERY_MOUNT} 2>/dev/null; "));
    script.push_str(&detach_stale_loops(recovery_path));

    script.push_str(&format!("RLOOP=$(losetup -P --find --show {img}) && "));
    script.push_str(&partprobe_retry("RLOOP"));
    script.push_str(&format!("mkdir -p {RECOVERY_MOUNT} && "));
    script.push_str(&format!("mount -t hfsplus -o rw ${{RLOOP}}p1 {RECOVERY_MOUNT} && "));

    // The label shown in the boot picker comes from .contentDetails in
    // the blessed directory.
    script.push_str(&format!(
        "rm -f {RECOVERY_MOUNT}/System/Library/CoreServices/.contentDetails 2>/dev/null; "
    ));
    script.push_str(&format!(
        "printf {} > {RECOVERY_MOUNT}/System/Library/CoreServices/.contentDetails && ",
        shell_quote(label)
    ));

    // Copy the macOS installer icon as the volume icon; missing icon is
    // not fatal, the picker falls back to the default.
    script.push_str(&format!(
        "ICON=$(find {RECOVERY_MOUNT} -path '*/Install macOS*/Contents/Resources/InstallAssistant.icns' 2>/dev/null | head -1) && "
    ));
    script.push_str(&format!(
        "if [ -n \"$ICON\" ]; then rm -f {RECOVERY_MOUNT}/.VolumeIcon.icns; \
         cp \"$ICON\" {RECOVERY_MOUNT}/.VolumeIcon.icns && echo \"Volume icon set from $ICON\"; \
         else echo 'No InstallAssistant.icns found, using default icon'; fi && "
    ));

    script.push_str(&unmount_lazy(RECOVERY_MOUNT));
    script.push_str(" && losetup -d $RLOOP");

    script
}

/// Import a disk image and attach it to a bus slot, scraping the storage
/// reference out of the import tool's output.
///
/// The `'\K[^']+` scrape after "successfully imported" works across old
/// and new qm versions. `repair_gpt` re-writes the first 2048 sectors
/// from the source image afterwards, undoing the GPT header corruption
/// thin-provisioned LVM imports can cause.
pub fn import_attach_script(
    import_verb: &str,
    vmid: u32,
    image: &Path,
    storage: &str,
    slot: &str,
    repair_gpt: bool,
) -> String {
    let img = q(image);
    let mut script = format!(
        "REF=$(qm {import_verb} {vmid} {img} {storage} 2>&1 | \
         grep 'successfully imported' | grep -oP \"'\\K[^']+\") && \
         qm set {vmid} --{slot} $REF,media=disk"
    );
    if repair_gpt {
        script.push_str(&format!(
            " && DEV=$(pvesm path $REF) && dd if={img} of=$DEV bs=512 count=2048 conv=notrunc 2>/dev/null"
        ));
    }
    script
}
