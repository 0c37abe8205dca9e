//! Apple internet-recovery (osrecovery) protocol
//!
//! Two-step handshake: GET the endpoint for a session cookie, then POST a
//! form identifying a Mac board to receive asset URLs and tokens for the
//! BaseSystem DMG and its chunklist. The DMG is converted to a raw image
//! with dmg2img.

use super::{convert_dmg_to_img, download_url, ProgressFn};
use crate::adapter::CommandRunner;
use osxpve_common::{DownloadPhase, Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const OSRECOVERY_URL: &str = "http://osrecovery.apple.com/";
const OSRECOVERY_IMAGE_URL: &str = "http://osrecovery.apple.com/InstallationPayload/RecoveryImage";
const RECOVERY_USER_AGENT: &str = "InternetRecovery/1.0";

/// All-zero MLB: requests a generic (non-personalized) recovery payload.
const MLB_ZERO: &str = "00000000000000000";

/// Board identity presented to osrecovery per release. The preview
/// release reuses the sequoia board with os=latest, which makes Apple
/// serve the preview payload.
const RECOVERY_BOARDS: &[(&str, &str, &str)] = &[
    ("ventura", "Mac-4B682C642B45593E", "default"),
    ("sonoma", "Mac-827FAC58A8FDFA22", "default"),
    ("sequoia", "Mac-27AD2F918AE68F61", "default"),
    ("tahoe", "Mac-27AD2F918AE68F61", "latest"),
];

fn board_for(macos: &str) -> Option<(&'static str, &'static str)> {
    RECOVERY_BOARDS
        .iter()
        .find(|(name, _, _)| *name == macos)
        .map(|(_, board, os)| (*board, *os))
}

/// Random upper-case hex token of the given length.
fn generate_token(len: usize) -> String {
    const HEX: &[u8] = b"0123456789ABCDEF";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..16)] as char)
        .collect()
}

/// Extract the `session=...` cookie from Set-Cookie header values.
pub(crate) fn parse_session_cookie<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    for value in values {
        for part in value.split("; ") {
            if part.starts_with("session=") {
                return Some(part.to_string());
            }
        }
    }
    None
}

fn get_session() -> Result<String> {
    let client = super::client(super::METADATA_TIMEOUT)?;
    let response = client
        .get(OSRECOVERY_URL)
        .header("User-Agent", RECOVERY_USER_AGENT)
        .header("Connection", "close")
        .send()
        .map_err(|e| Error::download(format!("Failed to get recovery session: {e}"), "Retry."))?;

    let values = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>();
    parse_session_cookie(values.into_iter())
        .ok_or_else(|| Error::Protocol("No session cookie in Apple recovery response.".into()))
}

/// Parse the `KEY: VALUE` response body; AU/AT/CU/CT are required.
pub(crate) fn parse_image_info(body: &str) -> Result<HashMap<String, String>> {
    let mut info = HashMap::new();
    for line in body.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            info.insert(key.to_string(), value.to_string());
        }
    }
    for required in ["AU", "AT", "CU", "CT"] {
        if !info.contains_key(required) {
            return Err(Error::Protocol(format!(
                "Missing key '{required}' in Apple recovery response."
            )));
        }
    }
    Ok(info)
}

fn get_image_info(session: &str, board_id: &str, os_type: &str) -> Result<HashMap<String, String>> {
    let body = format!(
        "cid={cid}\nsn={sn}\nbid={bid}\nk={k}\nfg={fg}\nos={os}\n",
        cid = generate_token(16),
        sn = MLB_ZERO,
        bid = board_id,
        k = generate_token(64),
        fg = generate_token(64),
        os = os_type,
    );

    let client = super::client(super::INFO_TIMEOUT)?;
    let response = client
        .post(OSRECOVERY_IMAGE_URL)
        .header("User-Agent", RECOVERY_USER_AGENT)
        .header("Connection", "close")
        .header("Cookie", session)
        .header("Content-Type", "text/plain")
        .body(body)
        .send()
        .map_err(|e| Error::download(format!("Failed to get recovery image info: {e}"), "Retry."))?;
    let text = response
        .text()
        .map_err(|e| Error::download(format!("Failed to read image info: {e}"), "Retry."))?;
    parse_image_info(&text)
}

fn token_headers(token: &str) -> Vec<(&'static str, String)> {
    vec![
        ("User-Agent", RECOVERY_USER_AGENT.to_string()),
        ("Cookie", format!("AssetToken={token}")),
    ]
}

/// Download and convert the recovery image for a release into `dest_dir`.
pub fn download_recovery(
    macos: &str,
    dest_dir: &Path,
    runner: &dyn CommandRunner,
    progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf> {
    let Some((board_id, os_type)) = board_for(macos) else {
        return Err(Error::download(
            format!("No recovery board ID for '{macos}'"),
            "Provide a recovery image manually via --installer-path.",
        ));
    };

    let dest = dest_dir.join(format!("{macos}-recovery.img"));
    if dest.exists() {
        return Ok(dest);
    }

    info!("requesting recovery payload for {} (board {})", macos, board_id);
    let session = get_session()?;
    let image_info = get_image_info(&session, board_id, os_type)?;

    let dmg_path = dest_dir.join(format!("{macos}-BaseSystem.dmg"));
    let chunklist_path = dest_dir.join(format!("{macos}-BaseSystem.chunklist"));

    download_url(
        &image_info["AU"],
        &token_headers(&image_info["AT"]),
        &dmg_path,
        progress,
        DownloadPhase::Recovery,
    )?;
    download_url(
        &image_info["CU"],
        &token_headers(&image_info["CT"]),
        &chunklist_path,
        None,
        DownloadPhase::Recovery,
    )?;

    let converted = convert_dmg_to_img(&dmg_path, &dest, runner);

    let _ = std::fs::remove_file(&dmg_path);
    let _ = std::fs::remove_file(&chunklist_path);
    converted?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_table() {
        assert_eq!(board_for("sonoma"), Some(("Mac-827FAC58A8FDFA22", "default")));
        assert_eq!(board_for("sequoia"), Some(("Mac-27AD2F918AE68F61", "default")));
        // Preview payload: sequoia board with os=latest.
        assert_eq!(board_for("tahoe"), Some(("Mac-27AD2F918AE68F61", "latest")));
        assert_eq!(board_for("bigsur"), None);
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token(64);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_parse_session_cookie() {
        let headers = ["session=ABCDEF123; path=/; HttpOnly"];
        assert_eq!(
            parse_session_cookie(headers.into_iter()),
            Some("session=ABCDEF123".to_string())
        );
        let none = ["other=1; path=/"];
        assert_eq!(parse_session_cookie(none.into_iter()), None);
    }

    #[test]
    fn test_parse_image_info_complete() {
        let body = "AU: http://example.com/BaseSystem.dmg\nAT: token-a\nCU: http://example.com/BaseSystem.chunklist\nCT: token-c\nextra line without colon\n";
        let info = parse_image_info(body).unwrap();
        assert_eq!(info["AU"], "http://example.com/BaseSystem.dmg");
        assert_eq!(info["CT"], "token-c");
    }

    #[test]
    fn test_parse_image_info_missing_key_fails_fast() {
        let body = "AU: http://example.com/BaseSystem.dmg\nAT: token-a\n";
        let err = parse_image_info(body).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("CU"));
    }

    #[test]
    fn test_unknown_release_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = crate::adapter::RecordingRunner::new();
        let err = download_recovery("bigsur", dir.path(), &runner, None).unwrap_err();
        assert!(err.to_string().contains("No recovery board ID"));
    }

    #[test]
    fn test_existing_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("sequoia-recovery.img");
        std::fs::write(&existing, b"already staged").unwrap();
        let runner = crate::adapter::RecordingRunner::new();
        let result = download_recovery("sequoia", dir.path(), &runner, None).unwrap();
        assert_eq!(result, existing);
        assert!(runner.calls().is_empty());
    }
}
