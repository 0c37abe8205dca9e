//! OpenCore image acquisition from project releases

use super::{download_url, http_get_json, ProgressFn};
use crate::assets::OPENCORE_UNIVERSAL;
use osxpve_common::{DownloadPhase, Error, Result, VERSION};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const RELEASES_API: &str = "https://api.github.com/repos/lucid-fabrics/osxpve/releases";

/// Minimal release-asset schema: everything else in the payload is noise.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Resolve a release by exact version tag, falling back to latest.
pub fn fetch_release(version: &str) -> Result<Release> {
    let tag_url = format!("{RELEASES_API}/tags/v{version}");
    match http_get_json::<Release>(&tag_url) {
        Ok(release) => return Ok(release),
        Err(err) => debug!("release tag v{version} unavailable: {err}"),
    }

    http_get_json::<Release>(&format!("{RELEASES_API}/latest")).map_err(|err| {
        Error::download(
            format!("Could not fetch release metadata (tried v{version} and latest): {err}"),
            "Check network access to api.github.com.",
        )
    })
}

/// Find a release asset by exact name; empty URLs count as missing.
pub fn find_asset<'a>(release: &'a Release, name: &str) -> Option<&'a str> {
    release
        .assets
        .iter()
        .find(|a| a.name == name && !a.browser_download_url.is_empty())
        .map(|a| a.browser_download_url.as_str())
}

/// Download the OpenCore image for a release into `dest_dir`.
///
/// The per-release image is preferred; the universal image is the
/// fallback. An already-staged file short-circuits the network entirely.
pub fn download_opencore(
    macos: &str,
    dest_dir: &Path,
    progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf> {
    let candidates = [format!("opencore-{macos}.iso"), OPENCORE_UNIVERSAL.to_string()];

    for name in &candidates {
        let dest = dest_dir.join(name);
        if dest.exists() {
            return Ok(dest);
        }
    }

    let release = fetch_release(VERSION)?;
    for name in &candidates {
        if let Some(url) = find_asset(&release, name) {
            let dest = dest_dir.join(name);
            download_url(url, &[], &dest, progress, DownloadPhase::OpenCore)?;
            return Ok(dest);
        }
    }

    Err(Error::download(
        format!(
            "No OpenCore asset found in release '{}' (tried: {})",
            release.tag_name,
            candidates.join(", ")
        ),
        "Place the OpenCore image in the ISO directory manually.",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(assets: &[(&str, &str)]) -> Release {
        Release {
            tag_name: "v0.4.0".into(),
            assets: assets
                .iter()
                .map(|(name, url)| ReleaseAsset {
                    name: name.to_string(),
                    browser_download_url: url.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_find_asset_exact_name() {
        let release = release(&[
            ("opencore-sequoia.iso", "https://dl.example.com/oc.iso"),
            ("other.zip", "https://dl.example.com/other.zip"),
        ]);
        assert_eq!(
            find_asset(&release, "opencore-sequoia.iso"),
            Some("https://dl.example.com/oc.iso")
        );
        assert_eq!(find_asset(&release, "opencore-sonoma.iso"), None);
    }

    #[test]
    fn test_find_asset_rejects_empty_url() {
        let release = release(&[("opencore-sequoia.iso", "")]);
        assert_eq!(find_asset(&release, "opencore-sequoia.iso"), None);
    }

    #[test]
    fn test_existing_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("opencore-sequoia.iso");
        std::fs::write(&existing, b"already staged").unwrap();

        let result = download_opencore("sequoia", dir.path(), None).unwrap();
        assert_eq!(result, existing);
    }

    #[test]
    fn test_existing_universal_image_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join(OPENCORE_UNIVERSAL);
        std::fs::write(&existing, b"universal").unwrap();

        let result = download_opencore("sonoma", dir.path(), None).unwrap();
        assert_eq!(result, existing);
    }

    #[test]
    fn test_release_schema_parses_minimal_json() {
        let json = r#"{
            "tag_name": "v0.4.0",
            "assets": [
                {"name": "opencore-sequoia.iso",
                 "browser_download_url": "https://example.com/oc.iso",
                 "size": 1048576,
                 "content_type": "application/octet-stream"}
            ],
            "html_url": "ignored"
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v0.4.0");
        assert_eq!(release.assets.len(), 1);
    }
}
