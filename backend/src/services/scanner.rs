//! Show directory scanner and episode renamer
//!
//! Walks a show's folder, matches video files to episodes by their
//! `SxxEyy`/`NxNN` markers and keeps episode locations in sync with disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::filename_parser;
use super::text_utils::sanitize_path_component;
use crate::library::{EpisodeStatus, Show};

/// Video file extensions we recognize
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts",
];

/// Outcome of one directory scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Video files with episode numbering found on disk
    pub found: usize,
    /// Files attached to a known episode
    pub matched: usize,
    /// Episodes whose file disappeared
    pub vanished: usize,
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Video files under `dir` that carry episode numbering, sorted by path
pub fn discover_episode_files(dir: &Path) -> Vec<(PathBuf, (i32, i32))> {
    let mut files: Vec<(PathBuf, (i32, i32))> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .filter_map(|entry| {
            let filename = entry.file_name().to_str()?;
            let numbering = filename_parser::parse_episode(filename).numbering()?;
            Some((entry.into_path(), numbering))
        })
        .collect();
    files.sort();
    files
}

/// Sync episode locations of `show` with its directory.
///
/// Returns `None` when the show directory doesn't exist; nothing is changed
/// in that case so an unmounted drive doesn't wipe locations.
pub fn scan_show_directory(show: &mut Show) -> Option<ScanResult> {
    if !show.location.is_dir() {
        warn!(show = %show.key, location = %show.location.display(), "Show directory missing, skipping scan");
        return None;
    }

    let mut result = ScanResult::default();

    for episode in show.episodes.values_mut() {
        if let Some(location) = &episode.location
            && !location.exists()
        {
            debug!(show = %show.key, season = episode.season, episode = episode.episode, "Episode file vanished");
            episode.location = None;
            episode.subtitles.clear();
            if episode.status == EpisodeStatus::Downloaded {
                episode.status = EpisodeStatus::Archived;
            }
            result.vanished += 1;
        }
    }

    for (path, numbering) in discover_episode_files(&show.location) {
        result.found += 1;
        let Some(episode) = show.episodes.get_mut(&numbering) else {
            debug!(show = %show.key, path = %path.display(), "File doesn't match a known episode");
            continue;
        };
        result.matched += 1;
        episode.status = EpisodeStatus::Downloaded;
        episode.location = Some(path);
    }

    info!(
        show = %show.key,
        found = result.found,
        matched = result.matched,
        vanished = result.vanished,
        "Show directory scanned"
    );
    Some(result)
}

/// File stem for an episode: `Show Name - S01E02 - Title`
pub fn episode_file_stem(show_name: &str, season: i32, episode: i32, title: &str) -> String {
    let stem = if title.trim().is_empty() {
        format!("{} - S{:02}E{:02}", show_name, season, episode)
    } else {
        format!("{} - S{:02}E{:02} - {}", show_name, season, episode, title.trim())
    };
    sanitize_path_component(&stem)
}

/// Rename episode files (and their sidecar files) to the standard pattern.
///
/// Returns how many episodes were renamed. Episodes whose target name is
/// taken are skipped.
pub fn rename_episode_files(show: &mut Show) -> Result<usize> {
    let mut renamed = 0;
    let show_name = show.name.clone();

    for episode in show.episodes.values_mut() {
        let Some(current) = episode.location.clone() else {
            continue;
        };
        if !current.is_file() {
            continue;
        }
        let (Some(dir), Some(old_stem)) = (
            current.parent(),
            current.file_stem().and_then(|s| s.to_str()),
        ) else {
            continue;
        };

        let new_stem = episode_file_stem(&show_name, episode.season, episode.episode, &episode.name);
        if new_stem == old_stem {
            continue;
        }

        let extension = current.extension().and_then(|e| e.to_str()).unwrap_or("mkv");
        let target = dir.join(format!("{}.{}", new_stem, extension));
        if target.exists() {
            warn!(show = %show.key, target = %target.display(), "Rename target exists, skipping");
            continue;
        }

        std::fs::rename(&current, &target).with_context(|| {
            format!("Failed to rename {} to {}", current.display(), target.display())
        })?;
        rename_sidecars(dir, old_stem, &new_stem)?;

        debug!(show = %show.key, from = %current.display(), to = %target.display(), "Renamed episode file");
        episode.location = Some(target);
        renamed += 1;
    }

    info!(show = %show.key, renamed, "Episode files renamed");
    Ok(renamed)
}

/// Files named `<old_stem>.<suffix>` become `<new_stem>.<suffix>`
fn rename_sidecars(dir: &Path, old_stem: &str, new_stem: &str) -> Result<()> {
    let prefix = format!("{}.", old_stem);
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(suffix) = name.strip_prefix(&prefix) else {
            continue;
        };
        let target = dir.join(format!("{}.{}", new_stem, suffix));
        if !target.exists() {
            std::fs::rename(&path, &target)
                .with_context(|| format!("Failed to rename {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Episode, Indexer, ShowKey};

    fn show_in(dir: &Path) -> Show {
        let mut show = Show::new(ShowKey::new(Indexer::TvMaze, 1), "Doctor Who", dir);
        for number in 1..=2 {
            show.episodes.insert(
                (1, number),
                Episode {
                    season: 1,
                    episode: number,
                    name: format!("Part {}", number),
                    airdate: None,
                    status: EpisodeStatus::Wanted,
                    location: None,
                    subtitles: Vec::new(),
                },
            );
        }
        show
    }

    #[test]
    fn test_scan_attaches_files_and_clears_vanished() {
        let temp = tempfile::tempdir().unwrap();
        let season_dir = temp.path().join("Season 01");
        std::fs::create_dir_all(&season_dir).unwrap();
        std::fs::write(season_dir.join("doctor.who.s01e01.720p.mkv"), b"video").unwrap();
        std::fs::write(season_dir.join("doctor.who.s01e01.nfo"), b"meta").unwrap();
        std::fs::write(season_dir.join("doctor.who.s01e09.mkv"), b"video").unwrap();

        let mut show = show_in(temp.path());
        show.episodes.get_mut(&(1, 2)).unwrap().location = Some(temp.path().join("gone.mkv"));
        show.episodes.get_mut(&(1, 2)).unwrap().status = EpisodeStatus::Downloaded;

        let result = scan_show_directory(&mut show).unwrap();
        assert_eq!(
            result,
            ScanResult {
                found: 2,
                matched: 1,
                vanished: 1
            }
        );
        assert_eq!(show.episodes[&(1, 1)].status, EpisodeStatus::Downloaded);
        assert_eq!(show.episodes[&(1, 2)].status, EpisodeStatus::Archived);
        assert_eq!(show.episodes[&(1, 2)].location, None);
    }

    #[test]
    fn test_scan_missing_directory_changes_nothing() {
        let mut show = show_in(Path::new("/definitely/not/here"));
        show.episodes.get_mut(&(1, 1)).unwrap().location = Some("/definitely/not/here/x.mkv".into());
        assert!(scan_show_directory(&mut show).is_none());
        assert!(show.episodes[&(1, 1)].location.is_some());
    }

    #[test]
    fn test_rename_episode_files_with_sidecars() {
        let temp = tempfile::tempdir().unwrap();
        let original = temp.path().join("dw.s01e01.mkv");
        std::fs::write(&original, b"video").unwrap();
        std::fs::write(temp.path().join("dw.s01e01.en.srt"), b"subs").unwrap();

        let mut show = show_in(temp.path());
        show.episodes.get_mut(&(1, 1)).unwrap().location = Some(original.clone());

        assert_eq!(rename_episode_files(&mut show).unwrap(), 1);
        let expected = temp.path().join("Doctor Who - S01E01 - Part 1.mkv");
        assert_eq!(show.episodes[&(1, 1)].location.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
        assert!(temp.path().join("Doctor Who - S01E01 - Part 1.en.srt").exists());
        assert!(!original.exists());

        // Already in the standard form
        assert_eq!(rename_episode_files(&mut show).unwrap(), 0);
    }

    #[test]
    fn test_episode_file_stem() {
        assert_eq!(episode_file_stem("Show", 1, 2, ""), "Show - S01E02");
        assert_eq!(episode_file_stem("What?", 10, 3, "Who/Why"), "What - S10E03 - WhoWhy");
    }
}
