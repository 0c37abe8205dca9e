//! Full-installer acquisition from the Apple software catalog
//!
//! The preview release is not served by osrecovery as an installer, so
//! the full `InstallAssistant.pkg` is located through the gzip'd software
//! catalog, its `SharedSupport.dmg` is pulled out of the XAR heap, and
//! the DMG is converted to a raw image.

use super::{convert_dmg_to_img, download_url, http_get_bytes, xar, ProgressFn};
use crate::adapter::CommandRunner;
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use osxpve_common::{release_info, DownloadPhase, Error, Result};
use plist::Value;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Seed catalog covering current and preview releases.
const CATALOG_URL: &str = "https://swscan.apple.com/content/catalogs/others/index-26seed-26-15-14-13-12-10.16.merged-1.sucatalog.gz";

/// Packages below this size are deltas or stubs, never the full installer.
const MIN_INSTALLER_SIZE: u64 = 5 * 1024 * 1024 * 1024;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<title>([^<]*)</title>").unwrap());

/// One full-installer package found in the catalog.
#[derive(Debug, Clone)]
pub(crate) struct InstallerCandidate {
    pub url: String,
    pub post_date: SystemTime,
}

/// Extract the `<title>` of a distribution XML.
pub(crate) fn distribution_title(distribution_xml: &str) -> Option<String> {
    TITLE_RE
        .captures(distribution_xml)
        .map(|c| c[1].trim().to_string())
}

fn product_distribution_url(product: &plist::Dictionary) -> Option<&str> {
    let distributions = product.get("Distributions")?.as_dictionary()?;
    distributions
        .get("English")
        .or_else(|| distributions.get("en"))?
        .as_string()
}

fn product_installer_package(product: &plist::Dictionary) -> Option<&str> {
    let packages = product.get("Packages")?.as_array()?;
    packages.iter().find_map(|pkg| {
        let pkg = pkg.as_dictionary()?;
        let url = pkg.get("URL")?.as_string()?;
        if !url.contains("InstallAssistant.pkg") {
            return None;
        }
        let size = pkg.get("Size")?.as_unsigned_integer()?;
        (size > MIN_INSTALLER_SIZE).then_some(url)
    })
}

fn product_post_date(product: &plist::Dictionary) -> SystemTime {
    match product.get("PostDate") {
        Some(Value::Date(date)) => date.clone().into(),
        _ => SystemTime::UNIX_EPOCH,
    }
}

/// Walk the catalog products and collect full installers whose
/// distribution title matches the release, newest first.
pub(crate) fn find_installer_candidates<F>(
    catalog: &Value,
    release_keyword: &str,
    fetch_distribution: F,
) -> Vec<InstallerCandidate>
where
    F: Fn(&str) -> Result<String>,
{
    let Some(products) = catalog
        .as_dictionary()
        .and_then(|c| c.get("Products"))
        .and_then(Value::as_dictionary)
    else {
        return Vec::new();
    };

    let keyword = release_keyword.to_lowercase();
    let mut candidates = Vec::new();

    for (product_id, product) in products.iter() {
        let Some(product) = product.as_dictionary() else {
            continue;
        };
        let Some(pkg_url) = product_installer_package(product) else {
            continue;
        };
        let Some(dist_url) = product_distribution_url(product) else {
            continue;
        };
        let Ok(distribution) = fetch_distribution(dist_url) else {
            continue;
        };
        let Some(title) = distribution_title(&distribution) else {
            continue;
        };
        if !title.to_lowercase().contains(&keyword) {
            continue;
        }
        debug!("installer candidate {product_id}: '{title}' at {pkg_url}");
        candidates.push(InstallerCandidate {
            url: pkg_url.to_string(),
            post_date: product_post_date(product),
        });
    }

    candidates.sort_by(|a, b| b.post_date.cmp(&a.post_date));
    candidates
}

/// Fetch the catalog and parse it, gunzipping when the server sends the
/// compressed form.
fn fetch_catalog() -> Result<Value> {
    let raw = http_get_bytes(CATALOG_URL, &[]).map_err(|e| {
        Error::download(
            format!("Failed to fetch Apple catalog: {e}"),
            "Check network access to swscan.apple.com.",
        )
    })?;

    let decompressed = if raw.starts_with(&[0x1F, 0x8B]) {
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| Error::Protocol(format!("Failed to gunzip Apple catalog: {e}")))?;
        out
    } else {
        raw
    };

    Value::from_reader(Cursor::new(decompressed))
        .map_err(|e| Error::Protocol(format!("Failed to parse Apple catalog: {e}")))
}

/// Download the full installer for the preview release into `dest_dir` as
/// `<release>-full-installer.img`.
pub fn download_full_installer(
    macos: &str,
    dest_dir: &Path,
    runner: &dyn CommandRunner,
    progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf> {
    let release = release_info(macos)
        .ok_or_else(|| osxpve_common::Error::UnsupportedRelease(macos.to_string()))?;

    let dest = dest_dir.join(format!("{macos}-full-installer.img"));
    if dest.exists() {
        return Ok(dest);
    }

    info!("searching Apple catalog for a {} full installer", release.label);
    let catalog = fetch_catalog()?;
    let candidates = find_installer_candidates(&catalog, macos, |url| {
        http_get_bytes(url, &[]).and_then(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| Error::Protocol(format!("distribution XML is not UTF-8: {e}")))
        })
    });

    let Some(newest) = candidates.first() else {
        return Err(Error::download(
            format!("Could not find an InstallAssistant.pkg for '{}'", release.label),
            "The catalog may not list the preview yet; stage a full installer manually.",
        ));
    };

    let pkg_path = dest_dir.join(format!("{macos}-InstallAssistant.pkg"));
    let dmg_path = dest_dir.join(format!("{macos}-SharedSupport.dmg"));

    download_url(&newest.url, &[], &pkg_path, progress, DownloadPhase::Installer)?;

    let staged = xar::extract_file(&pkg_path, "SharedSupport.dmg", &dmg_path)
        .and_then(|()| convert_dmg_to_img(&dmg_path, &dest, runner));

    let _ = std::fs::remove_file(&pkg_path);
    let _ = std::fs::remove_file(&dmg_path);
    staged?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Dictionary;
    use std::time::Duration;

    fn package(url: &str, size: u64) -> Value {
        let mut pkg = Dictionary::new();
        pkg.insert("URL".into(), Value::String(url.into()));
        pkg.insert("Size".into(), Value::Integer(size.into()));
        Value::Dictionary(pkg)
    }

    fn product(pkg_url: &str, size: u64, dist_url: &str, days: u64) -> Value {
        let mut dists = Dictionary::new();
        dists.insert("English".into(), Value::String(dist_url.into()));
        let mut product = Dictionary::new();
        product.insert("Packages".into(), Value::Array(vec![package(pkg_url, size)]));
        product.insert("Distributions".into(), Value::Dictionary(dists));
        product.insert(
            "PostDate".into(),
            Value::Date(plist::Date::from(
                SystemTime::UNIX_EPOCH + Duration::from_secs(days * 86_400),
            )),
        );
        Value::Dictionary(product)
    }

    fn catalog(products: Vec<(&str, Value)>) -> Value {
        let mut map = Dictionary::new();
        for (id, product) in products {
            map.insert(id.into(), product);
        }
        let mut root = Dictionary::new();
        root.insert("Products".into(), Value::Dictionary(map));
        Value::Dictionary(root)
    }

    const SIX_GB: u64 = 6 * 1024 * 1024 * 1024;

    fn dist_for(title: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><installer-gui-script minSpecVersion=\"2\"><title>{title}</title></installer-gui-script>"
        )
    }

    #[test]
    fn test_title_extraction() {
        assert_eq!(
            distribution_title(&dist_for("macOS Tahoe beta")),
            Some("macOS Tahoe beta".to_string())
        );
        assert_eq!(distribution_title("<foo/>"), None);
    }

    #[test]
    fn test_small_packages_are_stubs() {
        let cat = catalog(vec![(
            "p1",
            product("https://a/InstallAssistant.pkg", 100, "https://a/en.dist", 1),
        )]);
        let found = find_installer_candidates(&cat, "tahoe", |_| Ok(dist_for("macOS Tahoe")));
        assert!(found.is_empty());
    }

    #[test]
    fn test_title_mismatch_filtered() {
        let cat = catalog(vec![(
            "p1",
            product("https://a/InstallAssistant.pkg", SIX_GB, "https://a/en.dist", 1),
        )]);
        let found = find_installer_candidates(&cat, "tahoe", |_| Ok(dist_for("macOS Sequoia")));
        assert!(found.is_empty());
    }

    #[test]
    fn test_newest_post_date_wins() {
        let cat = catalog(vec![
            (
                "old",
                product("https://a/old/InstallAssistant.pkg", SIX_GB, "https://a/1", 10),
            ),
            (
                "new",
                product("https://a/new/InstallAssistant.pkg", SIX_GB, "https://a/2", 20),
            ),
        ]);
        let found = find_installer_candidates(&cat, "tahoe", |_| Ok(dist_for("macOS Tahoe beta")));
        assert_eq!(found.len(), 2);
        assert!(found[0].url.contains("/new/"));
    }

    #[test]
    fn test_non_installer_packages_ignored() {
        let mut dists = Dictionary::new();
        dists.insert("en".into(), Value::String("https://a/en.dist".into()));
        let mut product = Dictionary::new();
        product.insert(
            "Packages".into(),
            Value::Array(vec![package("https://a/BaseSystem.dmg", SIX_GB)]),
        );
        product.insert("Distributions".into(), Value::Dictionary(dists));
        let cat = catalog(vec![("p1", Value::Dictionary(product))]);

        let found = find_installer_candidates(&cat, "tahoe", |_| Ok(dist_for("macOS Tahoe")));
        assert!(found.is_empty());
    }

    #[test]
    fn test_en_distribution_fallback() {
        let mut dists = Dictionary::new();
        dists.insert("en".into(), Value::String("https://a/en.dist".into()));
        let mut prod = Dictionary::new();
        prod.insert(
            "Packages".into(),
            Value::Array(vec![package("https://a/InstallAssistant.pkg", SIX_GB)]),
        );
        prod.insert("Distributions".into(), Value::Dictionary(dists));
        let cat = catalog(vec![("p1", Value::Dictionary(prod))]);

        let found = find_installer_candidates(&cat, "tahoe", |url| {
            assert_eq!(url, "https://a/en.dist");
            Ok(dist_for("macOS Tahoe"))
        });
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_existing_installer_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("tahoe-full-installer.img");
        std::fs::write(&existing, b"staged").unwrap();
        let runner = crate::adapter::RecordingRunner::new();
        let result = download_full_installer("tahoe", dir.path(), &runner, None).unwrap();
        assert_eq!(result, existing);
    }
}
