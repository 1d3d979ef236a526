//! Path normalizer
//!
//! Deterministic, pure, no I/O: canonicalizes cloud paths and local paths,
//! and computes the relative path of a local absolute path under the sync
//! root. These functions are the join point between the cloud adapter's
//! wire format and the index's storage key.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A canonical cloud path. Always begins with `/`; `/` itself denotes the
/// root. Accepts a bare name, a leading-slash path, or a `disk:`-prefixed
/// path as input and normalizes all three to the same form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CloudPath(String);

impl CloudPath {
    /// Normalizes any of the three accepted input forms into a `CloudPath`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCloudPath` if the normalized result is
    /// invalid per [`is_valid_cloud`].
    pub fn normalize(s: &str) -> Result<Self, DomainError> {
        let trimmed = s.trim_matches(|c: char| c == ' ' || c == '\t');
        let stripped = trimmed.strip_prefix("disk:").unwrap_or(trimmed);

        let mut collapsed = stripped.to_string();
        while collapsed.starts_with("//") {
            collapsed.remove(0);
        }
        if !collapsed.starts_with('/') {
            collapsed = format!("/{collapsed}");
        }

        if !is_valid_cloud(&collapsed) {
            return Err(DomainError::InvalidCloudPath(s.to_string()));
        }

        Ok(Self(collapsed))
    }

    /// The root path, `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Borrow the normalized string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first path segment (the "top level" name), without the
    /// leading slash. `None` for the root path.
    #[must_use]
    pub fn top_level(&self) -> Option<&str> {
        if self.0 == "/" {
            return None;
        }
        self.0[1..].split('/').next()
    }

    /// Inserts `/` between `parent` and `name` iff `parent != "/"`.
    ///
    /// # Errors
    /// Propagates normalization errors from the joined result.
    pub fn join(parent: &CloudPath, name: &str) -> Result<Self, DomainError> {
        let joined = if parent.0 == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", parent.0)
        };
        Self::normalize(&joined)
    }
}

impl Display for CloudPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CloudPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for CloudPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::normalize(&s)
    }
}

impl From<CloudPath> for String {
    fn from(p: CloudPath) -> Self {
        p.0
    }
}

/// `true` iff `x` is non-empty, contains no NUL/CR/LF/TAB, and (after
/// normalization) equals `"/"` or does not end with `/`.
#[must_use]
pub fn is_valid_cloud(x: &str) -> bool {
    if x.is_empty() {
        return false;
    }
    if x.chars().any(|c| matches!(c, '\0' | '\r' | '\n' | '\t')) {
        return false;
    }
    x == "/" || !x.ends_with('/')
}

/// Normalizes any of the three accepted input forms. Thin wrapper around
/// [`CloudPath::normalize`] for call sites that only need the string.
///
/// # Errors
/// See [`CloudPath::normalize`].
pub fn normalize_cloud(s: &str) -> Result<CloudPath, DomainError> {
    CloudPath::normalize(s)
}

/// Inserts `/` between `parent` and `name` iff `parent != "/"`.
///
/// # Errors
/// See [`CloudPath::join`].
pub fn join_cloud(parent: &CloudPath, name: &str) -> Result<CloudPath, DomainError> {
    CloudPath::join(parent, name)
}

/// An OS-absolute, cleaned path with no trailing separator (except when it
/// denotes the filesystem root itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct LocalAbsPath(PathBuf);

impl LocalAbsPath {
    /// Validates and cleans an absolute local path.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLocalPath` if `path` is not absolute or
    /// escapes its own root via `..`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(DomainError::InvalidLocalPath(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }
        Ok(Self(normalize_components(&path)?))
    }

    /// Borrow the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Joins a relative child path segment onto this absolute path.
    ///
    /// # Errors
    /// Returns an error if `component` attempts to traverse upward or is
    /// itself absolute.
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.contains("..") || component.starts_with('/') {
            return Err(DomainError::InvalidLocalPath(format!(
                "invalid path component: {component}"
            )));
        }
        Self::new(self.0.join(component))
    }
}

impl Display for LocalAbsPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for LocalAbsPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<LocalAbsPath> for PathBuf {
    fn from(path: LocalAbsPath) -> Self {
        path.0
    }
}

impl AsRef<Path> for LocalAbsPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// `normalize_root(local) -> LocalAbsPath`: absolute, cleaned, no trailing
/// separator except root.
///
/// # Errors
/// See [`LocalAbsPath::new`].
pub fn normalize_root(local: impl Into<PathBuf>) -> Result<LocalAbsPath, DomainError> {
    LocalAbsPath::new(local)
}

/// A slash-relative-to-sync-root path. Never begins with `/`; uses `/` as
/// separator in the index regardless of host OS; trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalRelPath(String);

impl LocalRelPath {
    /// Constructs a `LocalRelPath` from an already-relative slash-joined
    /// string, trimming any leading slash.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidLocalPath` if the result is empty.
    pub fn new(rel: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = rel.as_ref().trim_start_matches('/').trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidLocalPath(
                "relative path is empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the slash-separated string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first path segment under the root.
    #[must_use]
    pub fn top_level(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl Display for LocalRelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LocalRelPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<LocalRelPath> for String {
    fn from(p: LocalRelPath) -> Self {
        p.0
    }
}

/// `to_relative(abs, root) -> Option<LocalRelPath>`: `Some` only if `abs`
/// lies under `root + "/"`.
#[must_use]
pub fn to_relative(abs: &LocalAbsPath, root: &LocalAbsPath) -> Option<LocalRelPath> {
    let rel = abs.0.strip_prefix(&root.0).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    let slash_joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    LocalRelPath::new(slash_joined).ok()
}

fn normalize_components(path: &Path) -> Result<PathBuf, DomainError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidLocalPath(
                        "path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let cases = ["Photos", "/Photos", "disk:/Photos", "disk:Photos"];
        for c in cases {
            let once = normalize_cloud(c).unwrap();
            let twice = normalize_cloud(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_strips_disk_prefix() {
        let a = normalize_cloud("disk:/Photos/a.jpg").unwrap();
        let b = normalize_cloud("/Photos/a.jpg").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn root_normalizes_to_slash() {
        assert_eq!(normalize_cloud("/").unwrap().as_str(), "/");
        assert_eq!(normalize_cloud("disk:/").unwrap().as_str(), "/");
    }

    #[test]
    fn validity_rejects_control_chars_and_trailing_slash() {
        assert!(!is_valid_cloud(""));
        assert!(!is_valid_cloud("/a\tb"));
        assert!(!is_valid_cloud("/a\n"));
        assert!(!is_valid_cloud("/a/"));
        assert!(is_valid_cloud("/"));
        assert!(is_valid_cloud("/a/b"));
    }

    #[test]
    fn join_cloud_inserts_slash_only_for_non_root_parent() {
        let root = CloudPath::root();
        let joined = join_cloud(&root, "Photos").unwrap();
        assert_eq!(joined.as_str(), "/Photos");

        let nested = join_cloud(&joined, "sub").unwrap();
        assert_eq!(nested.as_str(), "/Photos/sub");
    }

    #[test]
    fn top_level_of_root_is_none() {
        assert_eq!(CloudPath::root().top_level(), None);
        assert_eq!(
            normalize_cloud("/Photos/sub").unwrap().top_level(),
            Some("Photos")
        );
    }

    #[test]
    fn local_abs_path_requires_absolute() {
        assert!(LocalAbsPath::new("relative/path").is_err());
        assert!(LocalAbsPath::new("/abs/path").is_ok());
    }

    #[test]
    fn local_abs_path_rejects_escape() {
        let root = LocalAbsPath::new("/home/user/sync").unwrap();
        assert!(root.join("../escape").is_err());
    }

    #[test]
    fn to_relative_only_some_under_root() {
        let root = normalize_root("/home/user/sync").unwrap();
        let under = LocalAbsPath::new("/home/user/sync/Photos/a.jpg").unwrap();
        let outside = LocalAbsPath::new("/home/user/other/a.jpg").unwrap();

        assert_eq!(
            to_relative(&under, &root).unwrap().as_str(),
            "Photos/a.jpg"
        );
        assert!(to_relative(&outside, &root).is_none());
        assert!(to_relative(&root, &root).is_none());
    }

    #[test]
    fn local_rel_path_trims_leading_slash() {
        let a = LocalRelPath::new("/Photos/a.jpg").unwrap();
        let b = LocalRelPath::new("Photos/a.jpg").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.top_level(), "Photos");
    }
}
