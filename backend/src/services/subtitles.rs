//! Subtitle lookup for downloaded episodes

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::library::Show;

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "vtt"];

#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    /// Fill in subtitle languages for the show's downloaded episodes.
    /// Returns the number of episodes whose subtitle list changed.
    async fn download_subtitles(&self, show: &mut Show) -> Result<usize>;
}

/// Languages of sidecar files next to `video`, e.g. `Name.en.srt`
pub fn sidecar_languages(video: &Path) -> Vec<String> {
    let (Some(dir), Some(stem)) = (
        video.parent(),
        video.file_stem().and_then(|s| s.to_str()),
    ) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let prefix = format!("{}.", stem);
    let mut languages = BTreeSet::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let Some(rest) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
            continue;
        };
        let Some((lang, ext)) = rest.rsplit_once('.') else {
            continue;
        };
        if SUBTITLE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
            && (2..=3).contains(&lang.len())
            && lang.chars().all(|c| c.is_ascii_alphabetic())
        {
            languages.insert(lang.to_lowercase());
        }
    }
    languages.into_iter().collect()
}

/// Provider that records subtitles already sitting next to episode files
#[derive(Debug, Default)]
pub struct SidecarSubtitleScanner;

#[async_trait]
impl SubtitleProvider for SidecarSubtitleScanner {
    async fn download_subtitles(&self, show: &mut Show) -> Result<usize> {
        let mut changed = 0;
        for episode in show.episodes.values_mut() {
            let Some(location) = &episode.location else {
                continue;
            };
            let languages = sidecar_languages(location);
            if languages != episode.subtitles {
                debug!(show = %show.key, season = episode.season, episode = episode.episode, ?languages, "Subtitles changed");
                episode.subtitles = languages;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
