use std::path::{Component, Path, PathBuf};

/// Allow-list check for files the server may stream back.
///
/// A candidate is serveable only if, once made absolute and lexically
/// normalized, it lies strictly *inside* one of the allowed roots. Comparison
/// is per path component, so `/app/static-evil/x` does not pass for the root
/// `/app/static`, and the root directory itself is not serveable.
///
/// Callers turn a rejection into a plain 404 so the response says nothing
/// about what exists outside the roots.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ssrv::security::StaticAssetGate;
///
/// let gate = StaticAssetGate::new(["/srv/app/.next", "/srv/app/static"]);
///
/// assert!(gate.is_serveable(Path::new("/srv/app/static/img/logo.png")));
/// assert!(!gate.is_serveable(Path::new("/srv/app/static-evil/x")));
/// assert!(!gate.is_serveable(Path::new("/srv/app/static/../secrets.txt")));
/// ```
#[derive(Debug, Clone)]
pub struct StaticAssetGate {
    roots: Vec<PathBuf>,
}

impl StaticAssetGate {
    /// Builds a gate over `roots`, resolving each to an absolute, normalized path.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots.into_iter().map(|r| resolve(r.as_ref())).collect(),
        }
    }

    /// Returns the resolved allowed roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns `true` if `candidate` resolves to a path below an allowed root.
    ///
    /// Purely lexical: symlinks are not followed and the file need not exist.
    pub fn is_serveable(&self, candidate: &Path) -> bool {
        let resolved = resolve(candidate);
        self.roots
            .iter()
            .any(|root| resolved != *root && resolved.starts_with(root))
    }
}

/// Makes `path` absolute against the current directory and removes `.` and
/// `..` components without touching the filesystem.
///
/// `..` at the filesystem root stays at the root. If the current directory
/// cannot be determined, a relative path is normalized as-is (and will then
/// never fall under an absolute root).
pub fn resolve(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
