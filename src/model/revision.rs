//! Revision numbers, the only way history is addressed.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DogmaError;

/// A revision number of a commit.
///
/// A revision number is an integer which refers to a specific point of
/// repository history. When a repository receives its first commit, that
/// commit gets revision 1; every later commit gets the previous revision
/// plus one, i.e. 1, 2, 3, ...
///
/// A revision number can also be represented as a non-positive integer,
/// called a 'relative revision'. `0` and `-1` both refer to the latest
/// commit ('HEAD'); a smaller number refers to an older commit, e.g. `-2`
/// is the commit before HEAD. Relative revisions are resolved against a
/// repository head before anything is persisted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Revision(i64);

impl Revision {
    /// Revision `-1`, also known as `HEAD`.
    pub const HEAD: Revision = Revision(-1);
    /// Revision `1`, the first commit of a repository.
    pub const INIT: Revision = Revision(1);

    /// Create a new instance with the specified revision number.
    pub const fn from(i: i64) -> Self {
        Revision(i)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Whether this revision must be resolved against a head before use.
    pub fn is_relative(&self) -> bool {
        self.0 <= 0
    }

    /// Resolve this revision against the given head revision.
    ///
    /// `head` is the absolute number of the newest commit; `0` means the
    /// repository has no commits yet, in which case the resolved HEAD is the
    /// empty-tree state `0`. Fails with *revision-not-found* when the result
    /// lies outside the repository history.
    pub fn normalize(&self, head: i64) -> Result<Revision, DogmaError> {
        let abs = if self.0 > 0 {
            self.0
        } else if self.0 == 0 {
            head
        } else {
            head + self.0 + 1
        };
        if abs < 0 || abs > head {
            return Err(DogmaError::RevisionNotFound(format!(
                "revision {} (head: {head})",
                self.0
            )));
        }
        Ok(Revision(abs))
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a decimal integer or the literal `head` (case-insensitive).
impl FromStr for Revision {
    type Err = DogmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("head") {
            return Ok(Revision::HEAD);
        }
        s.parse::<i64>()
            .map(Revision)
            .map_err(|_| DogmaError::InvalidArgument(format!("invalid revision literal: `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Positive revisions are absolute, the rest relative.
    #[test]
    fn test_relativity() {
        assert!(!Revision::from(1).is_relative());
        assert!(Revision::from(0).is_relative());
        assert!(Revision::HEAD.is_relative());
    }

    /// `head`, decimal and negative literals all parse.
    #[test]
    fn test_from_str() {
        assert_eq!("head".parse::<Revision>().unwrap(), Revision::HEAD);
        assert_eq!("HEAD".parse::<Revision>().unwrap(), Revision::HEAD);
        assert_eq!("5".parse::<Revision>().unwrap(), Revision::from(5));
        assert_eq!("-2".parse::<Revision>().unwrap(), Revision::from(-2));
        assert!("1.5".parse::<Revision>().is_err());
        assert!("".parse::<Revision>().is_err());
    }

    /// Relative revisions resolve as HEAD offsets; `0` aliases HEAD.
    #[test]
    fn test_normalize() {
        let head = 5;
        assert_eq!(Revision::from(3).normalize(head).unwrap(), Revision::from(3));
        assert_eq!(Revision::from(0).normalize(head).unwrap(), Revision::from(5));
        assert_eq!(Revision::from(-1).normalize(head).unwrap(), Revision::from(5));
        assert_eq!(Revision::from(-2).normalize(head).unwrap(), Revision::from(4));
        assert_eq!(Revision::from(-5).normalize(head).unwrap(), Revision::from(1));
        assert!(Revision::from(-6).normalize(head).is_err());
        assert!(Revision::from(6).normalize(head).is_err());
    }

    /// An empty repository resolves HEAD to the empty-tree state 0.
    #[test]
    fn test_normalize_empty_repository() {
        assert_eq!(Revision::HEAD.normalize(0).unwrap(), Revision::from(0));
        assert_eq!(Revision::from(0).normalize(0).unwrap(), Revision::from(0));
        assert!(Revision::from(1).normalize(0).is_err());
        assert!(Revision::from(-2).normalize(0).is_err());
    }

    /// Revisions serialize as bare integers.
    #[test]
    fn test_serde_transparent() {
        assert_eq!(serde_json::to_string(&Revision::from(7)).unwrap(), "7");
        let rev: Revision = serde_json::from_str("-1").unwrap();
        assert_eq!(rev, Revision::HEAD);
    }
}
