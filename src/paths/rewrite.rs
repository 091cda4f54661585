//! In-place rewriting of paths embedded in free text.
//!
//! Shell commands, titles, and multi-line tool output mention paths inline.
//! A match only counts when the path is followed by `/`, whitespace, a quote,
//! or the end of the text, so a sibling such as `/proj2` survives a
//! `/proj` rewrite untouched.

use std::borrow::Cow;

use regex::{Captures, NoExpand, Regex};
use tracing::warn;

use super::translate::normalize;

/// Characters accepted directly after a matched path.
const BOUNDARY: &str = r#"(?P<tail>[/\s"'`]|$)"#;

/// Replace every boundary-terminated occurrence of `from` in `text` with `to`.
///
/// `from` is matched literally. Returns `text` unchanged when `from` is empty
/// or equal to `to`.
#[must_use]
pub fn rewrite_in_string(text: &str, from: &str, to: &str) -> String {
    rewrite_cow(text, from, to).into_owned()
}

fn rewrite_cow<'t>(text: &'t str, from: &str, to: &str) -> Cow<'t, str> {
    if from.is_empty() || from == to || !text.contains(from) {
        return Cow::Borrowed(text);
    }

    let pattern = format!("{}{BOUNDARY}", regex::escape(from));
    let Some(re) = compile(&pattern) else {
        return Cow::Borrowed(text);
    };

    re.replace_all(text, |caps: &Captures<'_>| {
        let tail = caps.name("tail").map_or("", |m| m.as_str());
        format!("{to}{tail}")
    })
}

/// Rewrite tool output from the mount namespace back to the project namespace.
///
/// Absolute mount paths are rewritten first. Then relative spellings of the
/// mount such as `../../agentfs-mounts/<id>/src` collapse to `./src`; the
/// marker is the last two components of `mount_root`.
#[must_use]
pub fn rewrite_relative_output(text: &str, mount_root: &str, project_root: &str) -> String {
    let absolute = rewrite_cow(text, mount_root, project_root);

    let Some(marker) = marker_suffix(mount_root) else {
        return absolute.into_owned();
    };
    if !absolute.contains(marker.as_str()) {
        return absolute.into_owned();
    }

    let pattern = format!(r"(?:(?:\.\./)+|\./){}/", regex::escape(&marker));
    let Some(re) = compile(&pattern) else {
        return absolute.into_owned();
    };
    re.replace_all(&absolute, NoExpand("./")).into_owned()
}

/// Last two components of the normalized mount root, e.g. `mounts/<id>`.
#[must_use]
pub fn marker_suffix(mount_root: &str) -> Option<String> {
    let normalized = normalize(mount_root);
    let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    let start = parts.len().saturating_sub(2);
    Some(parts[start..].join("/"))
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(%err, "path rewrite pattern rejected, leaving text unchanged");
            None
        }
    }
}
