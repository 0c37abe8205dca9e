//! OpenCore config.plist patching
//!
//! The OpenCore disk build script mounts the ESP and hands the mounted
//! `config.plist` to this module (via the hidden `plist-patch`
//! subcommand). Edits are applied as an explicit, ordered sequence of
//! field mutations so each one is testable in isolation.

use osxpve_common::{Error, Result};
use plist::{Dictionary, Value};
use std::path::Path;

/// Apple NVRAM variable GUID used for csr-active-config and boot-args.
pub const APPLE_NVRAM_GUID: &str = "7C436110-AB2A-4BBB-A880-FE41995C9F82";

/// SMBIOS values written into PlatformInfo.Generic in Apple-services mode.
#[derive(Debug, Clone)]
pub struct PlatformValues {
    pub serial: String,
    pub model: String,
    pub uuid: String,
    pub mlb: String,
    pub rom: String,
}

/// Kernel quirks AMD hosts need on top of CPUID emulation.
pub const AMD_KERNEL_QUIRKS: &[&str] = &["AppleCpuPmCfgLock", "AppleXcpmCfgLock"];

/// What to change in the mounted config.plist.
#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Kernel quirks to force on (the planner passes the AMD pair).
    pub kernel_quirks: Vec<String>,
    /// Append `-v` to boot-args.
    pub verbose_boot: bool,
    /// Populate PlatformInfo.Generic when Apple services are requested.
    pub platform: Option<PlatformValues>,
}

fn ensure_dict<'a>(dict: &'a mut Dictionary, key: &str) -> &'a mut Dictionary {
    if !matches!(dict.get(key), Some(Value::Dictionary(_))) {
        dict.insert(key.to_string(), Value::Dictionary(Dictionary::new()));
    }
    dict.get_mut(key)
        .and_then(Value::as_dictionary_mut)
        .expect("just inserted")
}

/// Apply the OpenCore edit list to a parsed config.plist.
pub fn patch_config_value(root: &mut Value, opts: &PatchOptions) -> Result<()> {
    let root = root
        .as_dictionary_mut()
        .ok_or_else(|| Error::Internal("config.plist root is not a dictionary".into()))?;

    // Security: recovery images converted with dmg2img are unsigned, so
    // DmgLoading must be Any, and OpenCore requires SecureBootModel be
    // Disabled whenever DmgLoading is Any.
    let misc = ensure_dict(root, "Misc");
    let security = ensure_dict(misc, "Security");
    security.insert("ScanPolicy".into(), Value::Integer(0u64.into()));
    security.insert("DmgLoading".into(), Value::String("Any".into()));
    security.insert("SecureBootModel".into(), Value::String("Disabled".into()));

    // Boot picker behavior.
    let boot = ensure_dict(misc, "Boot");
    boot.insert("Timeout".into(), Value::Integer(15u64.into()));
    boot.insert("PickerAttributes".into(), Value::Integer(17u64.into()));
    boot.insert("HideAuxiliary".into(), Value::Boolean(true));
    boot.insert("PickerMode".into(), Value::String("External".into()));
    boot.insert("PickerVariant".into(), Value::String("Acidanthera\\Syrah".into()));

    // NVRAM: weaken SIP enough for installer media, set boot-args, and
    // force a US keyboard layout for the recovery environment.
    let mut boot_args = String::from("keepsyms=1 debug=0x100");
    if opts.verbose_boot {
        boot_args.push_str(" -v");
    }
    let nvram = ensure_dict(root, "NVRAM");
    let add = ensure_dict(nvram, "Add");
    let vars = ensure_dict(add, APPLE_NVRAM_GUID);
    vars.insert(
        "csr-active-config".into(),
        Value::Data(vec![0x67, 0x0F, 0x00, 0x00]),
    );
    vars.insert("boot-args".into(), Value::String(boot_args));
    vars.insert("prev-lang:kbd".into(), Value::Data(b"en-US:0".to_vec()));

    // Purge stale values so the Add entries take effect.
    let delete = ensure_dict(nvram, "Delete");
    delete.insert(
        APPLE_NVRAM_GUID.into(),
        Value::Array(vec![
            Value::String("csr-active-config".into()),
            Value::String("boot-args".into()),
            Value::String("prev-lang:kbd".into()),
        ]),
    );
    nvram.insert("WriteFlash".into(), Value::Boolean(true));

    // The shipped image has VirtualSMC disabled; macOS will not boot
    // without the SMC emulator.
    let kernel = ensure_dict(root, "Kernel");
    if let Some(Value::Array(entries)) = kernel.get_mut("Add") {
        for entry in entries.iter_mut() {
            let Some(entry) = entry.as_dictionary_mut() else {
                continue;
            };
            let is_vsmc = entry
                .get("BundlePath")
                .and_then(Value::as_string)
                .is_some_and(|p| p.contains("VirtualSMC"));
            if is_vsmc {
                entry.insert("Enabled".into(), Value::Boolean(true));
            }
        }
    }

    if !opts.kernel_quirks.is_empty() {
        let quirks = ensure_dict(kernel, "Quirks");
        for quirk in &opts.kernel_quirks {
            quirks.insert(quirk.clone(), Value::Boolean(true));
        }
    }

    if let Some(platform) = &opts.platform {
        let rom = hex::decode(&platform.rom)
            .map_err(|_| Error::Internal(format!("ROM is not valid hex: {}", platform.rom)))?;
        if rom.len() != 6 {
            return Err(Error::Internal(format!(
                "ROM must decode to 6 bytes, got {}",
                rom.len()
            )));
        }
        let info = ensure_dict(root, "PlatformInfo");
        let generic = ensure_dict(info, "Generic");
        generic.insert(
            "SystemSerialNumber".into(),
            Value::String(platform.serial.clone()),
        );
        generic.insert(
            "SystemProductName".into(),
            Value::String(platform.model.clone()),
        );
        generic.insert("SystemUUID".into(), Value::String(platform.uuid.clone()));
        generic.insert("MLB".into(), Value::String(platform.mlb.clone()));
        generic.insert("ROM".into(), Value::Data(rom));
        info.insert("UpdateSMBIOS".into(), Value::Boolean(true));
        info.insert("UpdateDataHub".into(), Value::Boolean(true));
    }

    Ok(())
}

/// Load, patch, and rewrite a config.plist on disk (XML or binary input;
/// written back as XML).
pub fn patch_config_file(path: &Path, opts: &PatchOptions) -> Result<()> {
    let mut value = Value::from_file(path)?;
    patch_config_value(&mut value, opts)?;
    value.to_file_xml(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kext(path: &str, enabled: bool) -> Value {
        let mut entry = Dictionary::new();
        entry.insert("BundlePath".into(), Value::String(path.into()));
        entry.insert("Enabled".into(), Value::Boolean(enabled));
        Value::Dictionary(entry)
    }

    fn sample_config() -> Value {
        let mut root = Dictionary::new();

        let mut security = Dictionary::new();
        security.insert("ScanPolicy".into(), Value::Integer(17760515u64.into()));
        security.insert("DmgLoading".into(), Value::String("Signed".into()));
        security.insert("SecureBootModel".into(), Value::String("Default".into()));
        let mut misc = Dictionary::new();
        misc.insert("Security".into(), Value::Dictionary(security));
        misc.insert("Boot".into(), Value::Dictionary(Dictionary::new()));
        root.insert("Misc".into(), Value::Dictionary(misc));

        let mut kernel = Dictionary::new();
        kernel.insert(
            "Add".into(),
            Value::Array(vec![
                kext("Lilu.kext", true),
                kext("VirtualSMC.kext", false),
                kext("Plugins/SMCProcessor.kext", false),
            ]),
        );
        kernel.insert("Quirks".into(), Value::Dictionary(Dictionary::new()));
        root.insert("Kernel".into(), Value::Dictionary(kernel));

        Value::Dictionary(root)
    }

    fn dict<'a>(value: &'a Value, path: &[&str]) -> &'a Dictionary {
        let mut current = value.as_dictionary().unwrap();
        for key in path {
            current = current.get(key).unwrap().as_dictionary().unwrap();
        }
        current
    }

    #[test]
    fn test_security_and_boot_edits() {
        let mut config = sample_config();
        patch_config_value(&mut config, &PatchOptions::default()).unwrap();

        let security = dict(&config, &["Misc", "Security"]);
        assert_eq!(security.get("ScanPolicy"), Some(&Value::Integer(0u64.into())));
        assert_eq!(security.get("DmgLoading"), Some(&Value::String("Any".into())));
        assert_eq!(
            security.get("SecureBootModel"),
            Some(&Value::String("Disabled".into()))
        );

        let boot = dict(&config, &["Misc", "Boot"]);
        assert_eq!(boot.get("Timeout"), Some(&Value::Integer(15u64.into())));
        assert_eq!(boot.get("PickerAttributes"), Some(&Value::Integer(17u64.into())));
        assert_eq!(boot.get("HideAuxiliary"), Some(&Value::Boolean(true)));
        assert_eq!(boot.get("PickerMode"), Some(&Value::String("External".into())));
        assert_eq!(
            boot.get("PickerVariant"),
            Some(&Value::String("Acidanthera\\Syrah".into()))
        );
    }

    #[test]
    fn test_nvram_add_and_delete() {
        let mut config = sample_config();
        patch_config_value(&mut config, &PatchOptions::default()).unwrap();

        let vars = dict(&config, &["NVRAM", "Add", APPLE_NVRAM_GUID]);
        assert_eq!(
            vars.get("csr-active-config"),
            Some(&Value::Data(vec![0x67, 0x0F, 0x00, 0x00]))
        );
        assert_eq!(
            vars.get("boot-args"),
            Some(&Value::String("keepsyms=1 debug=0x100".into()))
        );
        assert_eq!(
            vars.get("prev-lang:kbd"),
            Some(&Value::Data(b"en-US:0".to_vec()))
        );

        let nvram = dict(&config, &["NVRAM"]);
        assert_eq!(nvram.get("WriteFlash"), Some(&Value::Boolean(true)));
        let deleted = nvram
            .get("Delete")
            .unwrap()
            .as_dictionary()
            .unwrap()
            .get(APPLE_NVRAM_GUID)
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(deleted.len(), 3);
    }

    #[test]
    fn test_verbose_boot_appends_v() {
        let mut config = sample_config();
        let opts = PatchOptions {
            verbose_boot: true,
            ..Default::default()
        };
        patch_config_value(&mut config, &opts).unwrap();
        let vars = dict(&config, &["NVRAM", "Add", APPLE_NVRAM_GUID]);
        assert_eq!(
            vars.get("boot-args"),
            Some(&Value::String("keepsyms=1 debug=0x100 -v".into()))
        );
    }

    #[test]
    fn test_virtualsmc_enabled_others_untouched() {
        let mut config = sample_config();
        patch_config_value(&mut config, &PatchOptions::default()).unwrap();

        let entries = dict(&config, &["Kernel"])
            .get("Add")
            .unwrap()
            .as_array()
            .unwrap();
        for entry in entries {
            let entry = entry.as_dictionary().unwrap();
            let path = entry.get("BundlePath").unwrap().as_string().unwrap();
            let enabled = entry.get("Enabled").unwrap().as_boolean().unwrap();
            if path.contains("VirtualSMC") {
                assert!(enabled, "{path} must be enabled");
            } else if path.contains("SMCProcessor") {
                assert!(!enabled, "{path} must stay as shipped");
            }
        }
    }

    #[test]
    fn test_amd_quirks_only_when_requested() {
        let mut config = sample_config();
        patch_config_value(&mut config, &PatchOptions::default()).unwrap();
        let quirks = dict(&config, &["Kernel", "Quirks"]);
        assert!(quirks.get("AppleCpuPmCfgLock").is_none());
        assert!(quirks.get("AppleXcpmCfgLock").is_none());

        let mut config = sample_config();
        let opts = PatchOptions {
            kernel_quirks: AMD_KERNEL_QUIRKS.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        patch_config_value(&mut config, &opts).unwrap();
        let quirks = dict(&config, &["Kernel", "Quirks"]);
        assert_eq!(quirks.get("AppleCpuPmCfgLock"), Some(&Value::Boolean(true)));
        assert_eq!(quirks.get("AppleXcpmCfgLock"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_platform_info_population() {
        let mut config = sample_config();
        let opts = PatchOptions {
            platform: Some(PlatformValues {
                serial: "C02K7HX87ABC".into(),
                model: "iMacPro1,1".into(),
                uuid: "12345678-1234-1234-1234-123456789ABC".into(),
                mlb: "C02815403GUJ13704".into(),
                rom: "A2BB5C001122".into(),
            }),
            ..Default::default()
        };
        patch_config_value(&mut config, &opts).unwrap();

        let generic = dict(&config, &["PlatformInfo", "Generic"]);
        assert_eq!(
            generic.get("SystemSerialNumber"),
            Some(&Value::String("C02K7HX87ABC".into()))
        );
        assert_eq!(
            generic.get("ROM"),
            Some(&Value::Data(vec![0xA2, 0xBB, 0x5C, 0x00, 0x11, 0x22]))
        );
        let info = dict(&config, &["PlatformInfo"]);
        assert_eq!(info.get("UpdateSMBIOS"), Some(&Value::Boolean(true)));
        assert_eq!(info.get("UpdateDataHub"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_bad_rom_rejected() {
        let mut config = sample_config();
        let opts = PatchOptions {
            platform: Some(PlatformValues {
                serial: "S".into(),
                model: "M".into(),
                uuid: "U".into(),
                mlb: "B".into(),
                rom: "NOTHEX".into(),
            }),
            ..Default::default()
        };
        assert!(patch_config_value(&mut config, &opts).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.plist");
        sample_config().to_file_xml(&path).unwrap();

        patch_config_file(&path, &PatchOptions::default()).unwrap();

        let reloaded = Value::from_file(&path).unwrap();
        let security = dict(&reloaded, &["Misc", "Security"]);
        assert_eq!(security.get("DmgLoading"), Some(&Value::String("Any".into())));
    }
}
