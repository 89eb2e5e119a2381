//! Build identity: the immutable build id and the cache policy derived from it.
//!
//! In production the build id is read once from `<dist>/BUILD_ID` at startup
//! and never changes. Versioned asset URLs carrying any other id are stale:
//! they are rejected with [`InvalidBuildId`] rather than served.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Name of the build manifest file under the build output directory.
pub const BUILD_ID_FILE: &str = "BUILD_ID";

/// Placeholder build id used in development, where ids are never checked.
pub const DEV_BUILD_ID: &str = "-";

/// `Cache-Control` for anything that may change between requests.
pub const NO_STORE: &str = "no-store, must-revalidate";

/// `Cache-Control` for content addressed by an immutable build.
pub const IMMUTABLE: &str = "max-age=31536000, immutable";

/// Whether the server runs against a live compiler or a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn from_dev(dev: bool) -> Self {
        if dev { Self::Development } else { Self::Production }
    }

    pub fn is_dev(self) -> bool {
        self == Self::Development
    }

    /// The cache policy for versioned build assets in this mode.
    pub fn cache_control(self) -> &'static str {
        match self {
            Self::Development => NO_STORE,
            Self::Production => IMMUTABLE,
        }
    }
}

/// Errors loading the build manifest.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(
        "could not find a valid build in `{}`; build the app before starting the server",
        dist.display()
    )]
    Missing { dist: PathBuf },

    #[error("failed to read build id from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build id in {} is empty", path.display())]
    Empty { path: PathBuf },
}

/// A request carried a build id other than the one this process serves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("INVALID_BUILD_ID")]
pub struct InvalidBuildId {
    pub requested: String,
}

/// The process-wide build identity.
///
/// # Examples
///
/// ```
/// use ssrv::build::{BuildIdentity, IMMUTABLE};
///
/// let build = BuildIdentity::production("a1b2c3");
/// assert_eq!(build.cache_control(), IMMUTABLE);
/// assert!(build.validate("a1b2c3").is_ok());
/// assert!(build.validate("stale").is_err());
///
/// let dev = BuildIdentity::development();
/// assert!(dev.validate("anything").is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    mode: Mode,
    build_id: String,
}

impl BuildIdentity {
    pub fn development() -> Self {
        Self {
            mode: Mode::Development,
            build_id: DEV_BUILD_ID.to_owned(),
        }
    }

    pub fn production(build_id: impl Into<String>) -> Self {
        Self {
            mode: Mode::Production,
            build_id: build_id.into(),
        }
    }

    /// Loads the identity for `mode`; production reads `<dist>/BUILD_ID`.
    ///
    /// # Errors
    ///
    /// In production, [`BuildError::Missing`] when the manifest does not
    /// exist, [`BuildError::Read`] when it cannot be read, and
    /// [`BuildError::Empty`] when it holds only whitespace.
    pub fn load(mode: Mode, dist: &Path) -> Result<Self, BuildError> {
        match mode {
            Mode::Development => Ok(Self::development()),
            Mode::Production => read_build_id(dist).map(Self::production),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn cache_control(&self) -> &'static str {
        self.mode.cache_control()
    }

    /// Checks a build id taken from a request URL.
    ///
    /// Development accepts anything; production requires an exact match.
    pub fn validate(&self, requested: &str) -> Result<(), InvalidBuildId> {
        if self.mode.is_dev() || requested == self.build_id {
            Ok(())
        } else {
            Err(InvalidBuildId {
                requested: requested.to_owned(),
            })
        }
    }
}

/// Reads and trims the build id from `<dist>/BUILD_ID`.
pub fn read_build_id(dist: &Path) -> Result<String, BuildError> {
    let path = dist.join(BUILD_ID_FILE);
    let raw = fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            BuildError::Missing {
                dist: dist.to_path_buf(),
            }
        } else {
            BuildError::Read {
                path: path.clone(),
                source,
            }
        }
    })?;

    let id = raw.trim();
    if id.is_empty() {
        return Err(BuildError::Empty { path });
    }
    debug!(build_id = id, "loaded build id");
    Ok(id.to_owned())
}

/// Lists the production dynamic-import chunks under `<dist>/chunks`.
///
/// Maps each chunk name (file name up to the first `-`) to its file name.
/// Only `.js` files count; a missing or unreadable directory yields an
/// empty map.
pub fn available_chunks(dist: &Path) -> BTreeMap<String, String> {
    let Ok(entries) = fs::read_dir(dist.join("chunks")) else {
        return BTreeMap::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(".js"))
        .map(|file| {
            let name = file.split('-').next().unwrap_or(&file).to_owned();
            (name, file)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_policy_per_mode() {
        assert_eq!(Mode::Development.cache_control(), "no-store, must-revalidate");
        assert_eq!(Mode::Production.cache_control(), "max-age=31536000, immutable");
    }

    #[test]
    fn production_rejects_other_ids() {
        let build = BuildIdentity::production("abc");
        let err = build.validate("abd").unwrap_err();
        assert_eq!(err.requested, "abd");
        assert_eq!(err.to_string(), "INVALID_BUILD_ID");
    }

    #[test]
    fn reads_and_trims_build_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(BUILD_ID_FILE), "  xyz123\n").unwrap();
        let build = BuildIdentity::load(Mode::Production, dir.path()).unwrap();
        assert_eq!(build.build_id(), "xyz123");
    }

    #[test]
    fn missing_manifest_is_fatal_in_production_only() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BuildIdentity::load(Mode::Production, dir.path()),
            Err(BuildError::Missing { .. })
        ));
        let dev = BuildIdentity::load(Mode::Development, dir.path()).unwrap();
        assert_eq!(dev.build_id(), DEV_BUILD_ID);
    }

    #[test]
    fn blank_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(BUILD_ID_FILE), "\n").unwrap();
        assert!(matches!(
            read_build_id(dir.path()),
            Err(BuildError::Empty { .. })
        ));
    }

    #[test]
    fn chunk_listing_keys_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = dir.path().join("chunks");
        fs::create_dir(&chunks).unwrap();
        fs::write(chunks.join("comments-3f2a.js"), "").unwrap();
        fs::write(chunks.join("plain.js"), "").unwrap();
        fs::write(chunks.join("notes.txt"), "").unwrap();

        let map = available_chunks(dir.path());
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("comments").map(String::as_str), Some("comments-3f2a.js"));
        assert_eq!(map.get("plain.js").map(String::as_str), Some("plain.js"));
    }

    #[test]
    fn chunk_listing_without_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(available_chunks(dir.path()).is_empty());
    }
}
