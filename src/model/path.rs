//! File paths and glob patterns over them.
//!
//! Paths are absolute (`/`-rooted), case-sensitive, with segments limited to
//! `[A-Za-z0-9_.+-]`. A pattern is a comma-separated list of globs where `*`
//! matches within a segment, `**` across segments and `?` a single character;
//! patterns anchor at the root.

use std::fmt::Display;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::errors::DogmaError;

fn valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}

/// Validate an absolute file path and return it unchanged.
///
/// Rejects empty segments, a trailing slash and characters outside the
/// segment alphabet.
pub fn validate_file_path(path: &str) -> Result<&str, DogmaError> {
    let invalid = |why: &str| DogmaError::InvalidArgument(format!("invalid path `{path}`: {why}"));
    if !path.starts_with('/') {
        return Err(invalid("must start with /"));
    }
    if path.ends_with('/') {
        return Err(invalid("file path must not end with /"));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !segment.chars().all(valid_segment_char) {
            return Err(invalid("segment contains a disallowed character"));
        }
    }
    Ok(path)
}

/// Ensure a leading slash, leaving already-absolute paths untouched.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// A compiled glob over `/`-separated paths.
///
/// Holds the original pattern text for display and fingerprinting plus the
/// compiled matcher. Equality and hashing go by the pattern text.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    matcher: GlobSet,
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
impl Eq for PathPattern {}

impl std::hash::Hash for PathPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl PathPattern {
    /// Compile a pattern. Comma-separated alternatives each become one glob;
    /// an alternative without a leading `/` is anchored as `/**/<glob>`.
    pub fn new(pattern: &str) -> Result<PathPattern, DogmaError> {
        if pattern.trim().is_empty() {
            return Err(DogmaError::InvalidArgument(
                "empty path pattern".to_string(),
            ));
        }
        let mut builder = GlobSetBuilder::new();
        for alternative in pattern.split(',') {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                return Err(DogmaError::InvalidArgument(format!(
                    "empty alternative in path pattern `{pattern}`"
                )));
            }
            let anchored = if alternative.starts_with('/') {
                alternative.to_owned()
            } else {
                format!("/**/{alternative}")
            };
            let glob = GlobBuilder::new(&anchored)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    DogmaError::InvalidArgument(format!("invalid path pattern `{pattern}`: {e}"))
                })?;
            builder.add(glob);
        }
        let matcher = builder.build().map_err(|e| {
            DogmaError::InvalidArgument(format!("invalid path pattern `{pattern}`: {e}"))
        })?;
        Ok(PathPattern {
            pattern: pattern.to_owned(),
            matcher,
        })
    }

    /// The pattern matching every file of a repository.
    pub fn all() -> PathPattern {
        PathPattern::new("/**").expect("the catch-all pattern always compiles")
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Well-formed absolute paths pass validation.
    #[test]
    fn test_valid_paths() {
        assert!(validate_file_path("/a.json").is_ok());
        assert!(validate_file_path("/dir/sub-dir/file_1.2+x.txt").is_ok());
    }

    /// Relative paths, empty segments and odd characters are rejected.
    #[test]
    fn test_invalid_paths() {
        assert!(validate_file_path("a.json").is_err());
        assert!(validate_file_path("/a//b").is_err());
        assert!(validate_file_path("/a/").is_err());
        assert!(validate_file_path("/a b").is_err());
        assert!(validate_file_path("/a/\u{e9}").is_err());
    }

    /// `*` stays within one segment, `**` crosses segments.
    #[test]
    fn test_star_scoping() {
        let single = PathPattern::new("/*.json").unwrap();
        assert!(single.matches("/a.json"));
        assert!(!single.matches("/dir/a.json"));

        let deep = PathPattern::new("/**").unwrap();
        assert!(deep.matches("/a.json"));
        assert!(deep.matches("/dir/sub/a.json"));
    }

    /// `?` matches exactly one character within a segment.
    #[test]
    fn test_question_mark() {
        let p = PathPattern::new("/file-?.txt").unwrap();
        assert!(p.matches("/file-1.txt"));
        assert!(!p.matches("/file-10.txt"));
        assert!(!p.matches("/file-.txt"));
    }

    /// Comma-separated alternatives match independently.
    #[test]
    fn test_alternatives() {
        let p = PathPattern::new("/a.json, /b/**").unwrap();
        assert!(p.matches("/a.json"));
        assert!(p.matches("/b/deep/c.txt"));
        assert!(!p.matches("/c.json"));
    }

    /// Unanchored alternatives match at any depth.
    #[test]
    fn test_unanchored_alternative() {
        let p = PathPattern::new("*.json").unwrap();
        assert!(p.matches("/dir/a.json"));
        assert!(!p.matches("/dir/a.txt"));
    }

    /// Empty patterns are invalid arguments.
    #[test]
    fn test_empty_pattern() {
        assert!(PathPattern::new("").is_err());
        assert!(PathPattern::new("/a.json,,").is_err());
    }
}
