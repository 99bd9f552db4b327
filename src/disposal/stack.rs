//! Stacked (multi-part) video paths.
//!
//! A stack is written `stack://<part> , <part>` with literal commas inside a
//! part doubled.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::{MfcError, Result};

pub const STACK_PREFIX: &str = "stack://";

const PART_SEPARATOR: &str = " , ";

/// Trailing volume markers such as `.cd1`, ` - part 2`, `_disc3`.
static STACK_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)[ _.\-]*(cd|dvd|part|pt|dis[ck])[ _.\-]*[0-9a-d]?$").ok()
});

#[must_use]
pub fn is_stacked(raw: &str) -> bool {
    raw.starts_with(STACK_PREFIX)
}

/// Expand a video path into its constituent file paths.
///
/// Plain paths come back as a single part.
pub fn expand(raw: &str) -> Result<Vec<String>> {
    let Some(body) = raw.strip_prefix(STACK_PREFIX) else {
        return Ok(vec![raw.to_string()]);
    };
    let parts: Vec<String> = body
        .split(PART_SEPARATOR)
        .map(|part| part.trim().replace(",,", ","))
        .collect();
    if parts.iter().any(String::is_empty) {
        return Err(MfcError::InvalidPath {
            path: raw.to_string(),
            details: "empty stack member".to_string(),
        });
    }
    Ok(parts)
}

/// Base name shared by a video's parts and its sidecar files.
///
/// For a single file this is the file stem. For a stack it is the common
/// prefix of the part stems with any trailing volume marker removed.
#[must_use]
pub fn base_name(parts: &[String]) -> String {
    let stems: Vec<String> = parts
        .iter()
        .map(|p| {
            Path::new(p)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();

    let Some((first, rest)) = stems.split_first() else {
        return String::new();
    };
    if rest.is_empty() {
        return first.clone();
    }

    let mut prefix = first.as_str();
    for stem in rest {
        let common = prefix
            .char_indices()
            .zip(stem.chars())
            .find(|((_, a), b)| a != b)
            .map_or(prefix.len().min(stem.len()), |((i, _), _)| i);
        prefix = &prefix[..common];
    }

    let stripped = match STACK_MARKER.as_ref() {
        Some(marker) => marker.replace(prefix, "").into_owned(),
        None => prefix.to_string(),
    };
    let trimmed = stripped.trim_end_matches([' ', '_', '.', '-']);
    if trimmed.is_empty() {
        prefix.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_one_part() {
        assert_eq!(expand("/m/X/X.mkv").unwrap(), vec!["/m/X/X.mkv"]);
        assert!(!is_stacked("/m/X/X.mkv"));
    }

    #[test]
    fn splits_stack_members() {
        let parts = expand("stack:///m/A/A.part1.mkv , /m/A/A.part2.mkv").unwrap();
        assert_eq!(parts, vec!["/m/A/A.part1.mkv", "/m/A/A.part2.mkv"]);
    }

    #[test]
    fn unescapes_doubled_commas() {
        let parts = expand("stack:///m/Hello,, World cd1.avi , /m/Hello,, World cd2.avi").unwrap();
        assert_eq!(parts[0], "/m/Hello, World cd1.avi");
        assert_eq!(parts[1], "/m/Hello, World cd2.avi");
    }

    #[test]
    fn rejects_empty_members() {
        let err = expand("stack:// , /m/a.avi").unwrap_err();
        assert_eq!(err.code(), "MFC-2004");
    }

    #[test]
    fn base_names() {
        let single = vec!["/m/X/X.mkv".to_string()];
        assert_eq!(base_name(&single), "X");

        let parts = vec!["/m/A/A.part1.mkv".to_string(), "/m/A/A.part2.mkv".to_string()];
        assert_eq!(base_name(&parts), "A");

        let cds = vec!["/m/Film - CD1.avi".to_string(), "/m/Film - CD2.avi".to_string()];
        assert_eq!(base_name(&cds), "Film");

        let discs = vec!["/m/Epic_disc1.mkv".to_string(), "/m/Epic_disc2.mkv".to_string()];
        assert_eq!(base_name(&discs), "Epic");
    }

    #[test]
    fn unrelated_stack_keeps_common_prefix() {
        let parts = vec!["/m/Alpha.mkv".to_string(), "/m/Alps.mkv".to_string()];
        assert_eq!(base_name(&parts), "Alp");
    }
}
