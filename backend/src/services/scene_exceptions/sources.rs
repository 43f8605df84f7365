//! Remote scene exception sources
//!
//! Each source returns aliases keyed by show. Errors are returned to the
//! caller, which decides what a failed source means for the refresh pass.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::library::{ALL_SEASONS, ExceptionTarget, Indexer, ShowKey};
use crate::services::text_utils::full_sanitize_scene_name;

/// `(alias, season)` pairs per show
pub type FetchedExceptions = HashMap<ShowKey, Vec<(String, i32)>>;

#[async_trait]
pub trait ExceptionSource: Send + Sync {
    /// Stable name, also the key of the source's refresh record
    fn name(&self) -> &str;

    /// Fetch aliases. `targets` are the shows currently in the library.
    async fn fetch(&self, targets: &[ExceptionTarget]) -> Result<FetchedExceptions>;
}

fn push_alias(out: &mut FetchedExceptions, key: ShowKey, alias: &str, season: i32) {
    let alias = alias.trim();
    if alias.is_empty() {
        return;
    }
    let aliases = out.entry(key).or_default();
    if !aliases.iter().any(|(a, s)| a == alias && *s == season) {
        aliases.push((alias.to_string(), season));
    }
}

async fn get_text(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("{} returned status {}", url, response.status());
    }

    response
        .text()
        .await
        .with_context(|| format!("Failed to read body of {}", url))
}

// ---------------------------------------------------------------------------
// Custom exception lists
// ---------------------------------------------------------------------------

/// One JSON list per indexer: `{"<indexer_id>": {"<season>": ["alias", ...]}}`
pub struct CustomExceptionSource {
    client: Client,
    urls: Vec<(Indexer, String)>,
}

impl CustomExceptionSource {
    pub const NAME: &'static str = "custom_exceptions";

    pub fn new(client: Client, urls: Vec<(Indexer, String)>) -> Self {
        Self { client, urls }
    }
}

/// Parse one custom exception list
pub fn parse_custom_exceptions(indexer: Indexer, body: &str) -> Result<FetchedExceptions> {
    let raw: HashMap<String, HashMap<String, Vec<String>>> =
        serde_json::from_str(body).context("Invalid custom exception list")?;

    let mut out = FetchedExceptions::new();
    for (id, seasons) in raw {
        let Ok(indexer_id) = id.parse::<u32>() else {
            debug!(id = %id, "Skipping custom exception with non-numeric id");
            continue;
        };
        let key = ShowKey::new(indexer, indexer_id);
        for (season, aliases) in seasons {
            let season = season.parse::<i32>().unwrap_or(ALL_SEASONS);
            for alias in aliases {
                push_alias(&mut out, key, &alias, season);
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl ExceptionSource for CustomExceptionSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, _targets: &[ExceptionTarget]) -> Result<FetchedExceptions> {
        let mut out = FetchedExceptions::new();
        for (indexer, url) in &self.urls {
            info!(indexer = %indexer, url = %url, "Fetching custom scene exceptions");
            let body = get_text(&self.client, url).await?;
            out.extend(parse_custom_exceptions(*indexer, &body)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// XEM
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct XemResponse {
    result: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: HashMap<String, Vec<serde_json::Value>>,
}

/// Cross-indexer episode mapping service; one call per supported indexer
pub struct XemSource {
    client: Client,
    base_url: String,
}

impl XemSource {
    pub const NAME: &'static str = "xem";

    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Parse an XEM `allNames` response.
///
/// Entries are either a plain name (all seasons) or `{"name": season}`.
pub fn parse_xem_names(indexer: Indexer, body: &str) -> Result<FetchedExceptions> {
    let response: XemResponse = serde_json::from_str(body).context("Invalid XEM response")?;
    if response.result != "success" {
        anyhow::bail!(
            "XEM returned '{}': {}",
            response.result,
            response.message.unwrap_or_default()
        );
    }

    let mut out = FetchedExceptions::new();
    for (id, names) in response.data {
        let Ok(indexer_id) = id.parse::<u32>() else {
            continue;
        };
        let key = ShowKey::new(indexer, indexer_id);
        for entry in names {
            match entry {
                serde_json::Value::String(name) => push_alias(&mut out, key, &name, ALL_SEASONS),
                serde_json::Value::Object(map) => {
                    for (name, season) in map {
                        let season = season
                            .as_i64()
                            .and_then(|s| i32::try_from(s).ok())
                            .unwrap_or(ALL_SEASONS);
                        push_alias(&mut out, key, &name, season);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl ExceptionSource for XemSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, _targets: &[ExceptionTarget]) -> Result<FetchedExceptions> {
        let mut out = FetchedExceptions::new();
        for indexer in Indexer::ALL {
            let Some(origin) = indexer.xem_origin() else {
                continue;
            };
            let url = Url::parse_with_params(
                &format!("{}/map/allNames", self.base_url),
                &[("origin", origin), ("seasonNumbers", "1")],
            )
            .with_context(|| format!("Invalid XEM url {}", self.base_url))?;
            info!(indexer = %indexer, "Fetching XEM scene exceptions");
            let body = get_text(&self.client, url.as_str()).await?;
            out.extend(parse_xem_names(indexer, &body)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// AniDB
// ---------------------------------------------------------------------------

/// One `<anime>` entry of the AniDB title dump
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimeTitles {
    pub aid: u32,
    /// `(lang, type, title)`
    pub titles: Vec<(String, String, String)>,
}

const ANIDB_LANGS: [&str; 2] = ["x-jat", "en"];
const ANIDB_TYPES: [&str; 3] = ["main", "official", "syn"];

impl AnimeTitles {
    fn usable_titles(&self) -> impl Iterator<Item = &str> {
        self.titles
            .iter()
            .filter(|(lang, kind, _)| {
                ANIDB_LANGS.contains(&lang.as_str()) && ANIDB_TYPES.contains(&kind.as_str())
            })
            .map(|(_, _, title)| title.as_str())
    }
}

/// Parse the AniDB anime title dump
pub fn parse_anidb_titles(xml: &str) -> Result<Vec<AnimeTitles>> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut anime = Vec::new();
    let mut current: Option<AnimeTitles> = None;
    let mut title_attrs: Option<(String, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"anime" => {
                    let aid = e
                        .try_get_attribute("aid")?
                        .map(|a| a.unescape_value().map(|v| v.to_string()))
                        .transpose()?
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or_default();
                    current = Some(AnimeTitles {
                        aid,
                        titles: Vec::new(),
                    });
                }
                b"title" => {
                    let lang = e
                        .try_get_attribute("xml:lang")?
                        .map(|a| a.unescape_value().map(|v| v.to_string()))
                        .transpose()?
                        .unwrap_or_default();
                    let kind = e
                        .try_get_attribute("type")?
                        .map(|a| a.unescape_value().map(|v| v.to_string()))
                        .transpose()?
                        .unwrap_or_default();
                    title_attrs = Some((lang, kind));
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if let (Some(entry), Some((lang, kind))) = (current.as_mut(), title_attrs.as_ref()) {
                    let text = e.unescape()?.to_string();
                    entry.titles.push((lang.clone(), kind.clone(), text));
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"anime" => {
                    if let Some(entry) = current.take() {
                        anime.push(entry);
                    }
                }
                b"title" => title_attrs = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e).context("Invalid AniDB title dump"),
            _ => {}
        }
    }

    Ok(anime)
}

/// Aliases for every anime target whose name matches an AniDB title
pub fn match_anime_titles(targets: &[ExceptionTarget], anime: &[AnimeTitles]) -> FetchedExceptions {
    let wanted: HashMap<String, &ExceptionTarget> = targets
        .iter()
        .filter(|t| t.anime)
        .map(|t| (full_sanitize_scene_name(&t.name), t))
        .collect();

    let mut out = FetchedExceptions::new();
    if wanted.is_empty() {
        return out;
    }

    for entry in anime {
        let Some(target) = entry
            .usable_titles()
            .find_map(|title| wanted.get(&full_sanitize_scene_name(title)))
        else {
            continue;
        };
        for title in entry.usable_titles() {
            if title != target.name {
                push_alias(&mut out, target.key, title, ALL_SEASONS);
            }
        }
    }
    out
}

/// Anime title aliases from the AniDB title dump
pub struct AniDbSource {
    client: Client,
    titles_url: String,
}

impl AniDbSource {
    pub const NAME: &'static str = "anidb";

    pub fn new(client: Client, titles_url: impl Into<String>) -> Self {
        Self {
            client,
            titles_url: titles_url.into(),
        }
    }
}

#[async_trait]
impl ExceptionSource for AniDbSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, targets: &[ExceptionTarget]) -> Result<FetchedExceptions> {
        if !targets.iter().any(|t| t.anime) {
            debug!("No anime shows in library, skipping AniDB");
            return Ok(FetchedExceptions::new());
        }

        info!(url = %self.titles_url, "Fetching AniDB titles");
        let body = get_text(&self.client, &self.titles_url).await?;
        let anime = parse_anidb_titles(&body)?;
        let matched = match_anime_titles(targets, &anime);
        debug!(
            titles = anime.len(),
            matched = matched.len(),
            "AniDB titles matched to library"
        );
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_custom_exceptions() {
        let body = r#"{"81189": {"-1": ["Breaking Bad US"], "2": ["BB S2", " "]}, "abc": {}}"#;
        let parsed = parse_custom_exceptions(Indexer::Tvdb, body).unwrap();

        let mut aliases = parsed[&ShowKey::new(Indexer::Tvdb, 81189)].clone();
        aliases.sort();
        assert_eq!(
            aliases,
            vec![("BB S2".to_string(), 2), ("Breaking Bad US".to_string(), -1)]
        );
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_parse_xem_names() {
        let body = r#"{
            "result": "success",
            "data": {"79824": ["Naruto Shippuuden", {"Naruto Shippuden S2": 2}]},
            "message": ""
        }"#;
        let parsed = parse_xem_names(Indexer::Tvdb, body).unwrap();
        assert_eq!(
            parsed[&ShowKey::new(Indexer::Tvdb, 79824)],
            vec![
                ("Naruto Shippuuden".to_string(), -1),
                ("Naruto Shippuden S2".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_parse_xem_failure() {
        let body = r#"{"result": "failure", "data": {}, "message": "no show"}"#;
        assert!(parse_xem_names(Indexer::Tvdb, body).is_err());
    }

    #[test]
    fn test_anidb_titles_matched_to_anime_targets() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<animetitles>
  <anime aid="1">
    <title xml:lang="x-jat" type="main">Shingeki no Kyojin</title>
    <title xml:lang="en" type="official">Attack on Titan</title>
    <title xml:lang="ja" type="official">進撃の巨人</title>
    <title xml:lang="en" type="short">AoT</title>
  </anime>
  <anime aid="2">
    <title xml:lang="x-jat" type="main">Some Other Show</title>
  </anime>
</animetitles>"#;
        let anime = parse_anidb_titles(xml).unwrap();
        assert_eq!(anime.len(), 2);
        assert_eq!(anime[0].aid, 1);
        assert_eq!(anime[0].titles.len(), 4);

        let key = ShowKey::new(Indexer::Tvdb, 267440);
        let targets = vec![
            ExceptionTarget {
                key,
                name: "Attack on Titan".to_string(),
                anime: true,
            },
            ExceptionTarget {
                key: ShowKey::new(Indexer::Tvdb, 1),
                name: "Some Other Show".to_string(),
                anime: false,
            },
        ];

        let matched = match_anime_titles(&targets, &anime);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[&key], vec![("Shingeki no Kyojin".to_string(), -1)]);
    }
}
