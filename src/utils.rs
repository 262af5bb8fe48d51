//! Utility functions for file naming, artifact cleanup and disk space

use crate::error::{Error, Result};
use crate::types::JobId;
use std::path::{Component, Path, PathBuf};

/// Longest title kept by [`sanitize_title`]
const MAX_TITLE_LENGTH: usize = 100;

/// Clean a human title so it can be used in a file name
///
/// Drops non-ASCII and anything other than letters, digits, whitespace, `-` and `_`,
/// collapses whitespace, title-cases each word and caps the length. An empty result
/// becomes `"download"`.
///
/// ```
/// use media_dl::utils::sanitize_title;
///
/// assert_eq!(sanitize_title("  my  cool   VIDEO!! 🎬 "), "My Cool Video");
/// assert_eq!(sanitize_title("???"), "download");
/// ```
pub fn sanitize_title(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || *c == '-' || *c == '_')
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut titled = String::with_capacity(collapsed.len());
    let mut prev_alpha = false;
    for c in collapsed.chars() {
        if c.is_ascii_alphabetic() {
            if prev_alpha {
                titled.push(c.to_ascii_lowercase());
            } else {
                titled.push(c.to_ascii_uppercase());
            }
            prev_alpha = true;
        } else {
            titled.push(c);
            prev_alpha = false;
        }
    }

    // ASCII only at this point, so byte truncation is char-safe
    titled.truncate(MAX_TITLE_LENGTH);
    let trimmed = titled.trim();

    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File name (with extension) suggested by a response's headers or URL
///
/// Tries `Content-Disposition` (`filename=` and RFC 5987 `filename*=`), then the last
/// non-empty URL path segment (percent-decoded). Returns `None` when neither yields a name.
pub fn filename_from_headers(headers: &reqwest::header::HeaderMap, url: &str) -> Option<String> {
    if let Some(content_disposition) = headers.get(reqwest::header::CONTENT_DISPOSITION)
        && let Ok(value) = content_disposition.to_str()
    {
        // Format: attachment; filename="file.mp4" or filename*=UTF-8''file.mp4
        for part in value.split(';') {
            let part = part.trim();
            if let Some(encoded) = part.strip_prefix("filename*=") {
                if let Some(idx) = encoded.rfind('\'')
                    && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
                    && let Some(name) = base_name(&decoded)
                {
                    return Some(name);
                }
            } else if let Some(plain) = part.strip_prefix("filename=")
                && let Some(name) = base_name(plain.trim_matches('"'))
            {
                return Some(name);
            }
        }
    }

    filename_from_url(url)
}

/// Last non-empty, percent-decoded path segment of a URL
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(last).ok()?;
    base_name(&decoded)
}

/// Strip any directory components a server might smuggle into a name
fn base_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Lowercase extension of a file name, if any
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
}

/// Remove a delivered or abandoned artifact, best effort
///
/// Only files inside `root` are deleted. Also removes the artifact's parent directory
/// when it is left empty, unless that directory is `root`. Failures are logged, never
/// returned.
pub async fn remove_artifact(path: &Path, root: &Path) -> bool {
    if !is_within(path, root).await {
        tracing::warn!(
            path = %path.display(),
            root = %root.display(),
            "Refusing to delete artifact outside the download root"
        );
        return false;
    }

    let removed = match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete artifact");
            return false;
        }
    };

    if let Some(parent) = path.parent()
        && parent != root
        && parent.starts_with(root)
        && let Ok(mut entries) = tokio::fs::read_dir(parent).await
        && let Ok(None) = entries.next_entry().await
    {
        if let Err(e) = tokio::fs::remove_dir(parent).await {
            tracing::debug!(dir = %parent.display(), error = %e, "Failed to remove empty artifact directory");
        }
    }

    removed
}

/// Whether `path` lies under `root`, comparing canonical paths when the plain ones differ
async fn is_within(path: &Path, root: &Path) -> bool {
    let plain = !path.components().any(|c| c == Component::ParentDir);
    if plain && path.starts_with(root) {
        return true;
    }

    match (
        tokio::fs::canonicalize(path).await,
        tokio::fs::canonicalize(root).await,
    ) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}

/// Private working directory of a job under `root`
///
/// Torrents are fetched into it, since the engine picks their file names.
pub fn job_dir(root: &Path, id: JobId) -> PathBuf {
    root.join(format!("job-{}", id))
}

/// Delete a job's working directory and everything left in it, best effort
pub async fn remove_job_dir(root: &Path, id: JobId) {
    let dir = job_dir(root, id);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => tracing::debug!(dir = %dir.display(), "Removed job directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove job directory"),
    }
}

/// Fail with [`Error::InsufficientSpace`] when `dir` has less than `required` bytes free
pub fn ensure_free_space(dir: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }

    let available = get_available_space(dir).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to check disk space for '{}': {}", dir.display(), e),
        ))
    })?;

    if available < required {
        return Err(Error::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux/macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialised,
        // and the struct is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out pointer refers to a live u64.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
