//! Filename parser for scene-style episode names
//!
//! Parses filenames like:
//! - "Chicago Fire S14E08 1080p WEB h264-ETHEL"
//! - "chicago.fire.14x08.720p.mkv"
//! - "Chicago Fire Season 14 Episode 8"

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static SXXEXX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(.*?)\s*\bS(\d{1,2})\s*E(\d{1,3})").expect("valid regex"));
static NXNN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(.*?)\s*\b(\d{1,2})x(\d{2,3})\b").expect("valid regex"));
static VERBOSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(.*?)\s*Season\s*(\d+).*?Episode\s*(\d+)").expect("valid regex")
});
static TRAILING_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(?(19\d{2}|20\d{2})\)?\s*$").expect("valid regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Parsed episode information from a filename
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEpisode {
    pub show_name: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub original_title: String,
}

impl ParsedEpisode {
    /// `(season, episode)` when both were found
    pub fn numbering(&self) -> Option<(i32, i32)> {
        Some((self.season?, self.episode?))
    }
}

/// Parse a filename to extract episode information
pub fn parse_episode(filename: &str) -> ParsedEpisode {
    let mut result = ParsedEpisode {
        original_title: filename.to_string(),
        ..Default::default()
    };

    let cleaned = filename.replace(['.', '_'], " ");

    let caps = SXXEXX
        .captures(&cleaned)
        .or_else(|| NXNN.captures(&cleaned))
        .or_else(|| VERBOSE.captures(&cleaned));

    if let Some(caps) = caps {
        let name = caps.get(1).map(|m| clean_show_name(m.as_str()));
        result.show_name = name.filter(|n| !n.is_empty());
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
    }

    debug!(
        filename = filename,
        show = ?result.show_name,
        season = ?result.season,
        episode = ?result.episode,
        "Parsed filename"
    );

    result
}

/// Clean up the show name
fn clean_show_name(name: &str) -> String {
    let cleaned = name.trim().trim_end_matches('-').trim();
    let cleaned = TRAILING_YEAR.replace(cleaned, "");
    SPACES.replace_all(&cleaned, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sxxexx() {
        let result = parse_episode("Chicago Fire S14E08 1080p WEB h264-ETHEL");
        assert_eq!(result.show_name.as_deref(), Some("Chicago Fire"));
        assert_eq!(result.numbering(), Some((14, 8)));
    }

    #[test]
    fn test_parse_nxnn() {
        let result = parse_episode("chicago.fire.14x08.720p.mkv");
        assert_eq!(result.show_name.as_deref(), Some("chicago fire"));
        assert_eq!(result.numbering(), Some((14, 8)));
    }

    #[test]
    fn test_parse_verbose_and_renamed() {
        let result = parse_episode("Chicago Fire Season 14 Episode 8");
        assert_eq!(result.numbering(), Some((14, 8)));

        let result = parse_episode("Doctor Who (2005) - S01E02 - The End of the World.mkv");
        assert_eq!(result.show_name.as_deref(), Some("Doctor Who"));
        assert_eq!(result.numbering(), Some((1, 2)));
    }

    #[test]
    fn test_no_numbering() {
        let result = parse_episode("holiday video.mkv");
        assert_eq!(result.numbering(), None);
        assert_eq!(result.show_name, None);
    }
}
