//! Asset acquisition
//!
//! Three flows share one atomic-download primitive: the OpenCore image
//! from project releases, the macOS recovery image from Apple's
//! osrecovery endpoint, and the full installer for the preview release
//! from the Apple software catalog. Files are streamed into `<dest>.part`
//! and renamed only on full success; retries apply to per-attempt network
//! failures, protocol errors fail fast.

pub mod catalog;
pub mod github;
pub mod osrecovery;
pub mod xar;

pub use catalog::download_full_installer;
pub use github::download_opencore;
pub use osrecovery::download_recovery;

use crate::adapter::CommandRunner;
use osxpve_common::{DownloadPhase, DownloadProgress, Error, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// User agent for project-side requests (Apple endpoints use their own).
const USER_AGENT: &str = concat!("osxpve/", env!("CARGO_PKG_VERSION"));

/// Retries apply to file downloads only; protocol errors are not retried.
const MAX_RETRIES: usize = 3;
const BACKOFF_SECONDS: [u64; 2] = [1, 2];
const LAST_BACKOFF_SECONDS: u64 = 4;

/// HTTP timeouts per request class.
pub(crate) const METADATA_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const INFO_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const FILE_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_SIZE: usize = 64 * 1024;

/// Progress callback; the caller may dispatch it to any thread.
pub type ProgressFn<'a> = &'a dyn Fn(DownloadProgress);

fn backoff_for(attempt: usize) -> u64 {
    *BACKOFF_SECONDS.get(attempt).unwrap_or(&LAST_BACKOFF_SECONDS)
}

/// Atomic download primitive.
///
/// Runs `attempt` against `<dest>.part` up to `MAX_RETRIES` times with
/// exponential backoff, renames to `dest` only on full success, and
/// removes the partial file on every failure. After a failed run neither
/// `dest` nor `<dest>.part` exists.
pub fn download_with_retry<F>(dest: &Path, mut attempt: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = dest.with_extension(match dest.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    });

    let mut last_error = None;
    for retry in 0..MAX_RETRIES {
        match attempt(&part) {
            Ok(()) => {
                std::fs::rename(&part, dest)?;
                return Ok(());
            }
            Err(err) => {
                let _ = std::fs::remove_file(&part);
                warn!("download attempt {} failed: {}", retry + 1, err);
                last_error = Some(err);
                if retry + 1 < MAX_RETRIES {
                    std::thread::sleep(Duration::from_secs(backoff_for(retry)));
                }
            }
        }
    }

    Err(Error::download(
        format!(
            "Download failed after {MAX_RETRIES} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ),
        "Check network connectivity and retry.",
    ))
}

pub(crate) fn client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::download(format!("HTTP client init failed: {e}"), "Retry."))
}

/// Stream one HTTP response into a file, reporting progress as chunks
/// land. `total` is 0 when the server sends no Content-Length.
pub(crate) fn stream_response(
    mut response: reqwest::blocking::Response,
    dest: &Path,
    progress: Option<ProgressFn<'_>>,
    phase: DownloadPhase,
) -> Result<()> {
    let total = response.content_length().unwrap_or(0);
    let mut file = std::fs::File::create(dest)?;
    let mut downloaded: u64 = 0;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = response
            .read(&mut buf)
            .map_err(|e| Error::download(format!("read failed: {e}"), "Retry."))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        if let Some(progress) = progress {
            progress(DownloadProgress {
                downloaded,
                total,
                phase,
            });
        }
    }
    file.flush()?;
    Ok(())
}

/// Download a URL to `dest` with retries, optional extra headers, and
/// progress reporting.
pub(crate) fn download_url(
    url: &str,
    headers: &[(&str, String)],
    dest: &Path,
    progress: Option<ProgressFn<'_>>,
    phase: DownloadPhase,
) -> Result<()> {
    info!("downloading {} -> {}", url, dest.display());
    let client = client(FILE_TIMEOUT)?;
    download_with_retry(dest, |part| {
        let mut request = client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .map_err(|e| Error::download(format!("request failed: {e}"), "Retry."))?;
        if !response.status().is_success() {
            return Err(Error::download(
                format!("HTTP {} for {url}", response.status()),
                "Retry.",
            ));
        }
        stream_response(response, part, progress, phase)
    })
}

/// GET a small JSON document (release metadata class, 15 s timeout).
pub(crate) fn http_get_json<T: serde::de::DeserializeOwned>(url: &str) -> Result<T> {
    debug!("GET {}", url);
    let response = client(METADATA_TIMEOUT)?
        .get(url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .map_err(|e| Error::download(format!("request failed: {e}"), "Retry."))?;
    if !response.status().is_success() {
        return Err(Error::download(
            format!("HTTP {} for {url}", response.status()),
            "Retry.",
        ));
    }
    response
        .json::<T>()
        .map_err(|e| Error::Protocol(format!("unexpected response shape from {url}: {e}")))
}

/// GET a document body (catalog/image-info class, 30 s timeout).
pub(crate) fn http_get_bytes(url: &str, headers: &[(&str, String)]) -> Result<Vec<u8>> {
    debug!("GET {}", url);
    let mut request = client(INFO_TIMEOUT)?.get(url);
    for (name, value) in headers {
        request = request.header(*name, value);
    }
    let response = request
        .send()
        .map_err(|e| Error::download(format!("request failed: {e}"), "Retry."))?;
    if !response.status().is_success() {
        return Err(Error::download(
            format!("HTTP {} for {url}", response.status()),
            "Retry.",
        ));
    }
    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| Error::download(format!("read failed: {e}"), "Retry."))
}

/// Convert a DMG to a raw disk image with the external dmg2img tool.
///
/// The destination is removed on conversion failure so a half-written
/// image can never be imported.
pub(crate) fn convert_dmg_to_img(
    dmg: &Path,
    dest: &Path,
    runner: &dyn CommandRunner,
) -> Result<()> {
    let result = runner.run(&[
        "dmg2img".into(),
        dmg.display().to_string(),
        dest.display().to_string(),
    ]);
    if result.ok {
        return Ok(());
    }
    let _ = std::fs::remove_file(dest);
    if result.output.contains("failed to spawn") {
        return Err(Error::download(
            "dmg2img is required but not installed",
            "Install it with: apt install dmg2img",
        ));
    }
    Err(Error::download(
        format!("Failed to convert DMG: {}", result.output),
        "Verify the downloaded DMG is intact and re-run the download.",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RecordingRunner;
    use std::cell::Cell;

    #[test]
    fn test_retry_succeeds_on_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("asset.iso");
        let calls = Cell::new(0);

        download_with_retry(&dest, |part| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                return Err(Error::download("transient network error", "Retry."));
            }
            std::fs::write(part, b"success payload")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(calls.get(), 2);
        assert_eq!(std::fs::read(&dest).unwrap(), b"success payload");
        assert!(!dir.path().join("asset.iso.part").exists());
    }

    #[test]
    fn test_all_attempts_failing_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("asset.iso");

        let err = download_with_retry(&dest, |part| {
            // Partial data lands, then the stream dies.
            std::fs::write(part, b"partial")?;
            Err(Error::download("mid-stream failure", "Retry."))
        })
        .unwrap_err();

        assert!(err.to_string().contains("after 3 attempts"));
        assert!(!dest.exists());
        assert!(!dir.path().join("asset.iso.part").exists());
    }

    #[test]
    fn test_success_removes_part_and_keeps_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("asset.iso");
        download_with_retry(&dest, |part| {
            std::fs::write(part, b"full bytes")?;
            Ok(())
        })
        .unwrap();
        assert!(dest.exists());
        assert!(!dir.path().join("asset.iso.part").exists());
    }

    #[test]
    fn test_part_name_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chunklist");
        download_with_retry(&dest, |part| {
            assert!(part.to_string_lossy().ends_with("chunklist.part"));
            std::fs::write(part, b"x")?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_convert_dmg_missing_tool_hint() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().respond_fail(
            "dmg2img",
            -1,
            "failed to spawn dmg2img: No such file or directory",
        );
        let err = convert_dmg_to_img(
            &dir.path().join("a.dmg"),
            &dir.path().join("a.img"),
            &runner,
        )
        .unwrap_err();
        assert!(err.to_string().contains("apt install dmg2img"));
    }

    #[test]
    fn test_convert_dmg_failure_removes_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.img");
        std::fs::write(&dest, b"half written").unwrap();
        let runner = RecordingRunner::new().respond_fail("dmg2img", 1, "corrupt dmg");
        assert!(convert_dmg_to_img(&dir.path().join("a.dmg"), &dest, &runner).is_err());
        assert!(!dest.exists());
    }
}
