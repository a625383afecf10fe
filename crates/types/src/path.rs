// Path: crates/types/src/path.rs

//! Validated path components and repository-relative paths.
//!
//! A [`PathComponent`] is a single directory-entry name. It is never empty,
//! never `.` or `..`, and never contains `/` or `\0`, so a component is
//! always safe to embed in a serialized tree or a journal record. A
//! [`RepoPath`] is a sequence of components relative to the mount root; the
//! empty path denotes the root itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when validating a path component.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The component was empty.
    #[error("path component must not be empty")]
    Empty,
    /// The component was `.` or `..`.
    #[error("path component must not be `{0}`")]
    Reserved(String),
    /// The component contained a forbidden byte.
    #[error("path component {0:?} contains a forbidden character")]
    ForbiddenByte(String),
}

/// A single, validated name component of a path.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathComponent(String);

impl PathComponent {
    /// Validates and wraps a name component.
    pub fn new(name: impl Into<String>) -> Result<Self, PathError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PathError::Empty);
        }
        if name == "." || name == ".." {
            return Err(PathError::Reserved(name));
        }
        if name.bytes().any(|b| b == b'/' || b == b'\0') {
            return Err(PathError::ForbiddenByte(name));
        }
        Ok(PathComponent(name))
    }

    /// The component as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The component as raw bytes; names compare byte-wise.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// ASCII case-folded equality, used by case-insensitive mounts.
    pub fn eq_ignore_case(&self, other: &PathComponent) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl TryFrom<String> for PathComponent {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PathComponent::new(value)
    }
}

impl From<PathComponent> for String {
    fn from(value: PathComponent) -> Self {
        value.0
    }
}

impl std::fmt::Debug for PathComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PathComponent({:?})", self.0)
    }
}

impl std::fmt::Display for PathComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A repository-relative path: a sequence of components, empty for the root.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RepoPath(Vec<PathComponent>);

impl RepoPath {
    /// The mount root.
    pub fn root() -> Self {
        RepoPath(Vec::new())
    }

    /// Builds a path from components, root-first.
    pub fn from_components(components: impl IntoIterator<Item = PathComponent>) -> Self {
        RepoPath(components.into_iter().collect())
    }

    /// Parses a `/`-separated relative path. The empty string is the root.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let components = s
            .split('/')
            .map(PathComponent::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RepoPath(components))
    }

    /// True for the mount root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when this path has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns this path extended by one component.
    pub fn join(&self, component: PathComponent) -> RepoPath {
        let mut components = self.0.clone();
        components.push(component);
        RepoPath(components)
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<RepoPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(RepoPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The final component, or `None` for the root.
    pub fn basename(&self) -> Option<&PathComponent> {
        self.0.last()
    }

    /// Iterates over the components from the root downward.
    pub fn components(&self) -> impl Iterator<Item = &PathComponent> {
        self.0.iter()
    }
}

impl std::fmt::Debug for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RepoPath({})", self)
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(component.as_str())?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_components() {
        assert_eq!(PathComponent::new(""), Err(PathError::Empty));
        assert!(matches!(
            PathComponent::new("."),
            Err(PathError::Reserved(_))
        ));
        assert!(matches!(
            PathComponent::new(".."),
            Err(PathError::Reserved(_))
        ));
        assert!(matches!(
            PathComponent::new("a/b"),
            Err(PathError::ForbiddenByte(_))
        ));
        assert!(matches!(
            PathComponent::new("a\0b"),
            Err(PathError::ForbiddenByte(_))
        ));
    }

    #[test]
    fn parse_and_display_round_trip() {
        let p = RepoPath::parse("src/lib.rs").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.to_string(), "src/lib.rs");
        assert_eq!(p.basename().unwrap().as_str(), "lib.rs");
        assert_eq!(p.parent().unwrap().to_string(), "src");
    }

    #[test]
    fn root_path() {
        let root = RepoPath::parse("").unwrap();
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
        assert_eq!(root.to_string(), "");
    }

    #[test]
    fn join_extends() {
        let p = RepoPath::root().join(PathComponent::new("a").unwrap());
        assert_eq!(p.to_string(), "a");
        assert!(p.parent().unwrap().is_root());
    }

    #[test]
    fn case_folded_equality() {
        let a = PathComponent::new("README").unwrap();
        let b = PathComponent::new("readme").unwrap();
        assert_ne!(a, b);
        assert!(a.eq_ignore_case(&b));
    }
}
