//! Shared text normalization for scene names and on-disk names

use once_cell::sync::Lazy;
use regex::Regex;

static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[- /]+").expect("valid regex"));
static DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.+").expect("valid regex"));
static COMPARE_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[. \-_]+").expect("valid regex"));

/// Turn a show name into its scene form, e.g. "Show: The Return!" becomes
/// "Show.The.Return".
///
/// Apostrophes are kept for anime, where they are often part of the title.
pub fn sanitize_scene_name(name: &str, anime: bool) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, ',' | ':' | '(' | ')' | '!' | '?' | '\u{2019}'))
        .filter(|c| anime || *c != '\'')
        .collect();
    cleaned = cleaned.replace('&', "and");

    let dotted = SEPARATOR_RUN.replace_all(&cleaned, ".");
    let collapsed = DOT_RUN.replace_all(&dotted, ".");
    collapsed.trim_end_matches('.').to_string()
}

/// Comparison form of a scene name: sanitized, lowercase, single spaces
pub fn full_sanitize_scene_name(name: &str) -> String {
    let sanitized = sanitize_scene_name(name, true);
    COMPARE_SEPARATORS
        .replace_all(&sanitized, " ")
        .trim()
        .to_lowercase()
}

/// Folder or file name safe for the local filesystem
pub fn sanitize_path_component(name: &str) -> String {
    let options = sanitize_filename::Options {
        replacement: "",
        ..Default::default()
    };
    sanitize_filename::sanitize_with_options(name.trim(), options)
        .trim()
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_scene_name() {
        assert_eq!(sanitize_scene_name("Show: The Return!", false), "Show.The.Return");
        assert_eq!(sanitize_scene_name("Law & Order", false), "Law.and.Order");
        assert_eq!(sanitize_scene_name("Grey's Anatomy", false), "Greys.Anatomy");
        assert_eq!(sanitize_scene_name("Grey's Anatomy", true), "Grey's.Anatomy");
        assert_eq!(sanitize_scene_name("Mr. Robot", false), "Mr.Robot");
        assert_eq!(sanitize_scene_name("", false), "");
    }

    #[test]
    fn test_full_sanitize_scene_name() {
        assert_eq!(full_sanitize_scene_name("Show: The Return!"), "show the return");
        assert_eq!(full_sanitize_scene_name("show.the-return"), "show the return");
        assert_eq!(full_sanitize_scene_name("  Mr. Robot "), "mr robot");
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("What/If?"), "WhatIf");
        assert_eq!(sanitize_path_component("Show Name. "), "Show Name");
    }
}
