//! Unified-diff rendering and application for text entries.
//!
//! Rendering delegates to the Myers implementation in `similar`; application
//! is a small hunk interpreter that verifies every context and deletion line
//! against the target text, so a patch produced against different content
//! fails as a conflict instead of corrupting the file.

use similar::TextDiff;

use crate::errors::DogmaError;
use crate::internal::repo::content::normalize_text;

/// Render a unified diff between two texts, with the conventional three
/// context lines and `a/`-`b/` style headers.
pub fn render_unified(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a{path}"), &format!("b{path}"))
        .to_string()
}

struct Hunk {
    old_start: usize,
    old_count: usize,
    lines: Vec<(char, String)>,
}

fn conflict(path: &str, why: impl std::fmt::Display) -> DogmaError {
    DogmaError::ChangeConflict(format!("text patch does not apply to `{path}`: {why}"))
}

fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    // "@@ -l[,s] +l[,s] @@"
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, _) = rest.split_once(" +")?;
    let (start, count) = match old_part.split_once(',') {
        Some((s, c)) => (s.parse().ok()?, c.parse().ok()?),
        None => (old_part.parse().ok()?, 1),
    };
    Some((start, count))
}

fn parse_patch(path: &str, patch: &str) -> Result<Vec<Hunk>, DogmaError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in patch.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with('\\') {
            continue;
        }
        if line.starts_with("@@") {
            let (old_start, old_count) = parse_hunk_header(line)
                .ok_or_else(|| DogmaError::InvalidPush(format!("bad hunk header `{line}`")))?;
            hunks.push(Hunk {
                old_start,
                old_count,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            if line.is_empty() {
                continue;
            }
            return Err(DogmaError::InvalidPush(format!(
                "patch line outside any hunk: `{line}`"
            )));
        };
        let mut chars = line.chars();
        match chars.next() {
            Some(tag @ (' ' | '-' | '+')) => hunk.lines.push((tag, chars.collect())),
            // An empty line inside a hunk is a context line of an empty line.
            None => hunk.lines.push((' ', String::new())),
            Some(other) => {
                return Err(DogmaError::InvalidPush(format!(
                    "unknown patch line tag `{other}` in patch for `{path}`"
                )));
            }
        }
    }
    if hunks.is_empty() {
        return Err(DogmaError::InvalidPush(format!(
            "patch for `{path}` contains no hunks"
        )));
    }
    Ok(hunks)
}

/// Validate a unified diff without a target, as the push validation phase
/// does before any content is loaded.
pub fn validate_patch(path: &str, patch: &str) -> Result<(), DogmaError> {
    parse_patch(path, patch).map(|_| ())
}

/// Apply a unified diff to `old`, verifying context and deletions.
pub fn apply_unified(path: &str, old: &str, patch: &str) -> Result<String, DogmaError> {
    let hunks = parse_patch(path, patch)?;
    let old_lines: Vec<&str> = old.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0usize; // next old line to copy, 0-based

    for hunk in &hunks {
        // For a zero-length old range the header names the line *before*
        // the insertion point; otherwise it is the 1-based first line.
        let target = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if target < cursor {
            return Err(conflict(path, "hunks overlap or are out of order"));
        }
        if target > old_lines.len() {
            return Err(conflict(path, "hunk starts past the end of the file"));
        }
        result.extend(old_lines[cursor..target].iter().map(|s| s.to_string()));
        cursor = target;

        for (tag, text) in &hunk.lines {
            match tag {
                ' ' | '-' => {
                    let actual = old_lines.get(cursor).ok_or_else(|| {
                        conflict(path, "hunk runs past the end of the file")
                    })?;
                    if actual != text {
                        return Err(conflict(
                            path,
                            format!("expected `{text}` at line {}, found `{actual}`", cursor + 1),
                        ));
                    }
                    if *tag == ' ' {
                        result.push(text.clone());
                    }
                    cursor += 1;
                }
                '+' => result.push(text.clone()),
                _ => unreachable!("parse_patch only emits ' ', '-' and '+'"),
            }
        }
    }
    result.extend(old_lines[cursor..].iter().map(|s| s.to_string()));
    Ok(normalize_text(&result.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A rendered diff applies back onto the original, reproducing the new
    /// text.
    #[test]
    fn test_render_apply_round_trip() {
        let old = "one\ntwo\nthree\nfour\n";
        let new = "one\n2\nthree\nfour\nfive\n";
        let patch = render_unified("/f.txt", old, new);
        assert!(patch.contains("@@"));
        assert_eq!(apply_unified("/f.txt", old, &patch).unwrap(), new);
    }

    /// Multiple hunks in one patch apply in order.
    #[test]
    fn test_multiple_hunks() {
        let old: String = (1..=30).map(|i| format!("line{i}\n")).collect();
        let new = old.replace("line2\n", "LINE2\n").replace("line28\n", "LINE28\n");
        let patch = render_unified("/f.txt", &old, &new);
        assert_eq!(apply_unified("/f.txt", &old, &patch).unwrap(), new);
    }

    /// A patch made against different content fails as a conflict.
    #[test]
    fn test_context_mismatch_is_conflict() {
        let patch = render_unified("/f.txt", "alpha\nbeta\n", "alpha\nBETA\n");
        let err = apply_unified("/f.txt", "alpha\nchanged\n", &patch).unwrap_err();
        assert_eq!(err.kind(), "change-conflict");
    }

    /// Insertion into an empty file works through the zero-length old range.
    #[test]
    fn test_insert_into_empty() {
        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -0,0 +1,2 @@\n+first\n+second\n";
        assert_eq!(apply_unified("/f.txt", "", patch).unwrap(), "first\nsecond\n");
    }

    /// Deleting every line leaves the canonical empty-with-newline text.
    #[test]
    fn test_delete_all() {
        let patch = render_unified("/f.txt", "gone\n", "");
        assert_eq!(apply_unified("/f.txt", "gone\n", &patch).unwrap(), "\n");
    }

    /// Garbage is rejected during validation, before content is loaded.
    #[test]
    fn test_validate_rejects_garbage() {
        assert_eq!(
            validate_patch("/f.txt", "not a patch").unwrap_err().kind(),
            "invalid-push"
        );
        assert!(validate_patch("/f.txt", "@@ -1 +1 @@\n-a\n+b").is_ok());
    }
}
