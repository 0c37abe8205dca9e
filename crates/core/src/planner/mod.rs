//! Install and destroy planning
//!
//! Turns a validated `VmConfig` plus the detected host CPU into an
//! ordered list of plan steps, each a plain argv. Nothing here touches
//! the host beyond the one probe for the disk-import verb; the executor
//! owns all side effects.

pub mod scripts;

use crate::adapter::CommandRunner;
use crate::assets::{resolve_opencore_path, resolve_recovery_or_installer_path};
use crate::smbios::{generate_mac, generate_smbios, generate_vmgenid, model_for_release};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use osxpve_common::{
    release_info, validate_config, CpuInfo, Error, PlanStep, Result, StepRisk, VmConfig, VmInfo,
    DEFAULT_ISO_DIR,
};
use scripts::{import_attach_script, oc_disk_script, recovery_stamp_script, PlistPatchArgs};
use std::path::PathBuf;
use tracing::debug;

/// The OSK every Mac's SMC hands to macOS; QEMU's isa-applesmc forwards it.
const APPLE_OSK: &str =
    "ourhardworkbythesewordsguardedpleasedontsteal(c)AppleComputerInc";

/// QEMU -cpu string for this host.
///
/// AMD and hybrid Intel present a Cascadelake server CPUID with the
/// instructions those parts lack stripped; legacy Intel passes the host
/// CPU through. An explicit `cpu_model` override wins over both.
pub fn cpu_flag_string(config: &VmConfig, cpu: &CpuInfo) -> String {
    if !config.cpu_model.is_empty() {
        return format!(
            "-cpu {},kvm=on,vendor=GenuineIntel,+invtsc,vmware-cpuid-freq=on",
            config.cpu_model
        );
    }
    if cpu.needs_emulated_cpu {
        return "-cpu Cascadelake-Server,vendor=GenuineIntel,+invtsc,-pcid,-hle,-rtm,\
                -avx512f,-avx512dq,-avx512cd,-avx512bw,-avx512vl,-avx512vnni,\
                kvm=on,vmware-cpuid-freq=on"
            .to_string();
    }
    "-cpu host,kvm=on,vendor=GenuineIntel,+kvm_pv_unhalt,+kvm_pv_eoi,+hypervisor,+invtsc,\
     vmware-cpuid-freq=on"
        .to_string()
}

/// Probe which import verb this qm supports: `qm disk import` on current
/// releases, `qm importdisk` on older ones.
pub fn detect_import_verb(runner: &dyn CommandRunner) -> &'static str {
    let result = runner.run(&["qm".into(), "help".into(), "disk".into()]);
    if result.ok {
        "disk import"
    } else {
        "importdisk"
    }
}

/// Fill in any identity fields the user left empty so the plan and the
/// UI agree on what was generated.
pub fn ensure_identity(config: &mut VmConfig) {
    if !config.no_smbios && config.smbios_serial.is_empty() {
        let identity = generate_smbios(&config.macos, config.apple_services);
        config.smbios_serial = identity.serial;
        config.smbios_uuid = identity.uuid;
        config.smbios_mlb = identity.mlb;
        config.smbios_rom = identity.rom;
        config.smbios_model = identity.model;
    }
    if config.apple_services {
        if config.vmgenid.is_empty() {
            config.vmgenid = generate_vmgenid();
        }
        if config.static_mac.is_empty() {
            config.static_mac = generate_mac();
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn bash_step(title: &str, script: String) -> PlanStep {
    PlanStep::new(title, vec!["bash".to_string(), "-c".to_string(), script])
}

fn encode_smbios_value(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

fn smbios_step(config: &VmConfig, vmid: &str) -> Option<PlanStep> {
    if config.no_smbios || config.smbios_serial.is_empty() {
        return None;
    }
    let model = if config.smbios_model.is_empty() {
        model_for_release(&config.macos).to_string()
    } else {
        config.smbios_model.clone()
    };
    // Proxmox wants free-form smbios1 values Base64-encoded and flagged;
    // the UUID stays plain.
    let value = format!(
        "uuid={},serial={},manufacturer={},product={},family={},base64=1",
        config.smbios_uuid,
        encode_smbios_value(&config.smbios_serial),
        encode_smbios_value("Apple Inc."),
        encode_smbios_value(&model),
        encode_smbios_value("Mac"),
    );
    Some(PlanStep::new(
        "Set SMBIOS identity",
        argv(&["qm", "set", vmid, "--smbios1", &value]),
    ))
}

fn apple_services_steps(config: &VmConfig, vmid: &str) -> Vec<PlanStep> {
    if !config.apple_services {
        return Vec::new();
    }
    vec![
        PlanStep::new(
            "Configure vmgenid for Apple services",
            argv(&["qm", "set", vmid, "--vmgenid", &config.vmgenid]),
        ),
        PlanStep::new(
            "Configure static MAC for Apple services",
            argv(&[
                "qm",
                "set",
                vmid,
                "--net0",
                &format!(
                    "vmxnet3,bridge={},macaddr={},firewall=0",
                    config.bridge, config.static_mac
                ),
            ]),
        ),
    ]
}

fn current_exe_token() -> String {
    std::env::current_exe()
        .map(|p| osxpve_common::shell_quote(&p.display().to_string()))
        .unwrap_or_else(|_| "osxpve".to_string())
}

/// Build the ordered install plan.
///
/// Rejects an un-validated config defensively even though front-ends run
/// the validator first. `ensure_identity` should have run when the caller
/// wants the generated SMBIOS values reflected back into the config.
pub fn build_plan(
    config: &VmConfig,
    cpu: &CpuInfo,
    runner: &dyn CommandRunner,
) -> Result<Vec<PlanStep>> {
    let issues = validate_config(config);
    if !issues.is_empty() {
        return Err(Error::Validation { issues });
    }
    let release = release_info(&config.macos)
        .ok_or_else(|| Error::UnsupportedRelease(config.macos.clone()))?;

    let vmid = config.vmid.to_string();
    let recovery_path = resolve_recovery_or_installer_path(config);
    let opencore_path = resolve_opencore_path(&config.macos, &config.iso_dir);
    let oc_disk = opencore_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ISO_DIR))
        .join(format!("opencore-{}-vm{}.img", config.macos, vmid));

    let cpu_flag = cpu_flag_string(config, cpu);
    let is_amd = config.cpu_model.is_empty() && cpu.needs_emulated_cpu;
    let import_verb = detect_import_verb(runner);
    debug!("planning install for VM {} ({})", vmid, release.label);

    let exe = current_exe_token();
    let patch = PlistPatchArgs {
        amd: is_amd,
        verbose_boot: config.verbose_boot,
        platform: (config.apple_services && !config.smbios_serial.is_empty()).then(|| {
            let model = if config.smbios_model.is_empty() {
                model_for_release(&config.macos).to_string()
            } else {
                config.smbios_model.clone()
            };
            (
                config.smbios_serial.clone(),
                config.smbios_mlb.clone(),
                config.smbios_uuid.clone(),
                config.smbios_rom.clone(),
                model,
            )
        }),
    };

    let hw_args = format!(
        "-device isa-applesmc,osk=\"{APPLE_OSK}\" \
         -smbios type=2 -device qemu-xhci -device usb-kbd -device usb-tablet \
         -global nec-usb-xhci.msi=off -global ICH9-LPC.acpi-pci-hotplug-with-bridge-support=off \
         {cpu_flag}"
    );

    let mut steps = vec![
        PlanStep::new(
            "Create VM shell",
            argv(&[
                "qm",
                "create",
                &vmid,
                "--name",
                &config.name,
                "--ostype",
                "other",
                "--machine",
                "q35",
                "--bios",
                "ovmf",
                "--cores",
                &config.cores.to_string(),
                "--sockets",
                "1",
                "--memory",
                &config.memory_mb.to_string(),
                // macOS has no balloon driver.
                "--balloon",
                "0",
                "--agent",
                "1",
                "--net0",
                &format!("vmxnet3,bridge={},firewall=0", config.bridge),
            ]),
        ),
        PlanStep::new(
            "Apply macOS hardware profile",
            argv(&[
                "qm",
                "set",
                &vmid,
                "--args",
                &hw_args,
                "--vga",
                "std",
                "--tablet",
                "1",
                "--scsihw",
                "virtio-scsi-pci",
            ]),
        ),
    ];

    steps.extend(smbios_step(config, &vmid));
    steps.extend(apple_services_steps(config, &vmid));

    steps.push(PlanStep::new(
        "Attach EFI + TPM",
        argv(&[
            "qm",
            "set",
            &vmid,
            "--efidisk0",
            &format!("{}:0,efitype=4m,pre-enrolled-keys=0", config.storage),
            "--tpmstate0",
            &format!("{}:0,version=v2.0", config.storage),
        ]),
    ));
    steps.push(PlanStep::new(
        "Create main disk",
        argv(&[
            "qm",
            "set",
            &vmid,
            "--virtio0",
            &format!("{}:{}", config.storage, config.disk_gb),
        ]),
    ));
    steps.push(bash_step(
        "Build OpenCore boot disk",
        oc_disk_script(&exe, &opencore_path, &oc_disk, &patch),
    ));
    steps.push(bash_step(
        "Import and attach OpenCore disk",
        import_attach_script(import_verb, config.vmid, &oc_disk, &config.storage, "ide0", true),
    ));
    steps.push(bash_step(
        "Stamp recovery with Apple icon flavour",
        recovery_stamp_script(&exe, &recovery_path, release.label),
    ));
    steps.push(bash_step(
        "Import and attach macOS recovery",
        import_attach_script(
            import_verb,
            config.vmid,
            &recovery_path,
            &config.storage,
            "ide2",
            false,
        ),
    ));
    steps.push(PlanStep::new(
        "Set boot order",
        argv(&["qm", "set", &vmid, "--boot", "order=ide2;virtio0;ide0"]),
    ));
    steps.push(
        PlanStep::new("Start VM", argv(&["qm", "start", &vmid])).with_risk(StepRisk::Action),
    );

    Ok(steps)
}

/// Render a plan as a standalone bash script.
pub fn render_script(config: &VmConfig, steps: &[PlanStep]) -> String {
    let label = release_info(&config.macos)
        .map(|r| format!("{} (channel={})", r.label, r.channel))
        .unwrap_or_else(|| config.macos.clone());
    let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%SZ");

    let mut lines = vec![
        "#!/usr/bin/env bash".to_string(),
        "set -euo pipefail".to_string(),
        String::new(),
        format!("# Generated by osxpve on {now}"),
        format!("# Target: {label}"),
        format!("# VMID: {}", config.vmid),
        String::new(),
    ];
    let total = steps.len();
    for (idx, step) in steps.iter().enumerate() {
        lines.push(format!("echo '[{}/{}] {}'", idx + 1, total, step.title));
        lines.push(step.command());
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Fetch status and config of an existing VM; None when it does not exist.
pub fn fetch_vm_info(vmid: u32, runner: &dyn CommandRunner) -> Option<VmInfo> {
    let status_result = runner.run(&["qm".into(), "status".into(), vmid.to_string()]);
    if !status_result.ok {
        return None;
    }
    let status = if status_result.output.to_lowercase().contains("running") {
        "running"
    } else {
        "stopped"
    };

    let config_result = runner.run(&["qm".into(), "config".into(), vmid.to_string()]);
    let config_raw = if config_result.ok {
        config_result.output
    } else {
        String::new()
    };
    let name = config_raw
        .lines()
        .find_map(|l| l.strip_prefix("name:"))
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    Some(VmInfo {
        vmid,
        name,
        status: status.to_string(),
        config_raw,
    })
}

/// Two-step destroy plan: stop, then destroy (optionally purging disks).
pub fn build_destroy_plan(vmid: u32, purge: bool) -> Vec<PlanStep> {
    let vid = vmid.to_string();
    let mut destroy = argv(&["qm", "destroy", &vid]);
    if purge {
        destroy.push("--purge".to_string());
    }
    vec![
        PlanStep::new("Stop VM", argv(&["qm", "stop", &vid])).with_risk(StepRisk::Warn),
        PlanStep::new("Destroy VM", destroy).with_risk(StepRisk::Warn),
    ]
}
