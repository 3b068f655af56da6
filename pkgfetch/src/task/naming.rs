//! Centralized naming conventions.
//!
//! This module is the single source of truth for every name the engine
//! derives from task and package metadata:
//! - Persisted task file names (e.g., `PHSP_25.0-en_US-macuniversal-task.json`)
//! - Stable package identifiers (e.g., `Pkg_1a2b..._Core.zip`)
//! - Chunk state file names (e.g., `Pkg_1a2b..._Core.zip.chunkstate`)
//! - Package URLs and destination paths
//!
//! Other modules should call these functions rather than building names
//! themselves, so a re-derived task always maps to the same files.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Prefix of every package identifier.
pub const PACKAGE_ID_PREFIX: &str = "Pkg";

/// Extension of chunk state files.
pub const CHUNK_STATE_EXTENSION: &str = "chunkstate";

/// Suffix of persisted task files.
pub const TASK_FILE_SUFFIX: &str = "-task.json";

/// Generate the persisted file name of a task.
///
/// # Format
///
/// `{product_id}_{version}[-{language}]-{platform}-task.json`
///
/// The language part is omitted when the language is empty.
///
/// # Examples
///
/// ```
/// use pkgfetch::task::naming::task_file_name;
///
/// assert_eq!(
///     task_file_name("PHSP", "25.0", "en_US", "macuniversal"),
///     "PHSP_25.0-en_US-macuniversal-task.json"
/// );
/// assert_eq!(
///     task_file_name("APRO", "24.1", "", "osx10"),
///     "APRO_24.1-osx10-task.json"
/// );
/// ```
pub fn task_file_name(product_id: &str, version: &str, language: &str, platform: &str) -> String {
    if language.is_empty() {
        format!("{}_{}-{}{}", product_id, version, platform, TASK_FILE_SUFFIX)
    } else {
        format!(
            "{}_{}-{}-{}{}",
            product_id, version, language, platform, TASK_FILE_SUFFIX
        )
    }
}

/// Generate the stable identifier of a package.
///
/// The identifier embeds the first 16 hex characters of the SHA-256 of
/// `{product_id}_{version}_{component_code}_{package_name}`, so it is the
/// same in every process.
///
/// # Examples
///
/// ```
/// use pkgfetch::task::naming::package_identifier;
///
/// let id = package_identifier("PHSP", "25.0", "KBRG", "Core.zip");
/// assert!(id.starts_with("Pkg_"));
/// assert!(id.ends_with("_Core.zip"));
/// assert_eq!(id, package_identifier("PHSP", "25.0", "KBRG", "Core.zip"));
/// assert_ne!(id, package_identifier("PHSP", "25.0", "COSY", "Core.zip"));
/// ```
pub fn package_identifier(
    product_id: &str,
    version: &str,
    component_code: &str,
    package_name: &str,
) -> String {
    let stable = format!(
        "{}_{}_{}_{}",
        product_id, version, component_code, package_name
    );
    let digest = format!("{:x}", Sha256::digest(stable.as_bytes()));
    format!("{}_{}_{}", PACKAGE_ID_PREFIX, &digest[..16], package_name)
}

/// Generate the chunk state file name for a package identifier.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_`.
///
/// # Examples
///
/// ```
/// use pkgfetch::task::naming::chunk_state_file_name;
///
/// assert_eq!(chunk_state_file_name("Pkg_ab_Core.zip"), "Pkg_ab_Core.zip.chunkstate");
/// assert_eq!(chunk_state_file_name("a/b c:d"), "a_b_c_d.chunkstate");
/// ```
pub fn chunk_state_file_name(package_id: &str) -> String {
    let sanitized: String = package_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", sanitized, CHUNK_STATE_EXTENSION)
}

/// Build the download URL of a package.
///
/// Absolute `http(s)` paths are used as-is; anything else is joined to the
/// CDN base with exactly one `/`.
///
/// # Examples
///
/// ```
/// use pkgfetch::task::naming::package_url;
///
/// assert_eq!(
///     package_url("https://cdn.example.com/", "/pkgs/Core.zip"),
///     "https://cdn.example.com/pkgs/Core.zip"
/// );
/// assert_eq!(
///     package_url("https://cdn.example.com", "pkgs/Core.zip"),
///     "https://cdn.example.com/pkgs/Core.zip"
/// );
/// assert_eq!(
///     package_url("https://cdn.example.com", "https://mirror.example.com/Core.zip"),
///     "https://mirror.example.com/Core.zip"
/// );
/// ```
pub fn package_url(cdn_base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        cdn_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Destination path of a package: `{task_dir}/{component_code}/{package_name}`.
pub fn package_destination(task_dir: &Path, component_code: &str, package_name: &str) -> PathBuf {
    task_dir.join(component_code).join(package_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_identifier_shape() {
        let id = package_identifier("PHSP", "25.0", "PHSP", "AdobePhotoshop25-Core.zip");
        let parts: Vec<&str> = id.splitn(3, '_').collect();
        assert_eq!(parts[0], "Pkg");
        assert_eq!(parts[1].len(), 16);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "AdobePhotoshop25-Core.zip");
    }

    #[test]
    fn test_identifier_depends_on_every_part() {
        let base = package_identifier("A", "1", "C", "p.zip");
        assert_ne!(base, package_identifier("B", "1", "C", "p.zip"));
        assert_ne!(base, package_identifier("A", "2", "C", "p.zip"));
        assert_ne!(base, package_identifier("A", "1", "D", "p.zip"));
    }

    #[test]
    fn test_package_destination() {
        assert_eq!(
            package_destination(Path::new("/downloads/PHSP"), "KBRG", "Core.zip"),
            PathBuf::from("/downloads/PHSP/KBRG/Core.zip")
        );
    }

    #[test]
    fn test_task_file_names_differ_by_language() {
        assert_ne!(
            task_file_name("PHSP", "25.0", "en_US", "osx10"),
            task_file_name("PHSP", "25.0", "de_DE", "osx10")
        );
    }
}
