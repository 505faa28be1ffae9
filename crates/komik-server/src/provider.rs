//! Content source seam.
//!
//! Scraping adapters live outside this crate; they implement [`ComicSource`]
//! and hand back already-normalized models. [`MemorySource`] serves a fixed
//! catalogue, either built in or loaded from a JSON fixture file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Items per listing page.
pub const PAGE_SIZE: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{kind} '{slug}' not found")]
    NotFound { kind: &'static str, slug: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream provider failed: {0}")]
    Upstream(String),
}

impl SourceError {
    pub fn not_found(kind: &'static str, slug: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            slug: slug.into(),
        }
    }
}

/// Listing order for the latest-updates feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Latest,
    Rating,
    Title,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comic {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub cover: Option<String>,
    /// manga, manhwa or manhua
    pub kind: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub latest_chapter: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRef {
    pub slug: String,
    pub title: String,
    pub number: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicDetail {
    #[serde(flatten)]
    pub comic: Comic,
    pub synopsis: String,
    pub chapters: Vec<ChapterRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub slug: String,
    pub comic_slug: String,
    pub title: String,
    pub number: f32,
    pub images: Vec<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
    pub has_next: bool,
}

impl<T: Clone> Page<T> {
    /// Cut page `page` (1-based) out of `all`.
    pub fn slice(all: &[T], page: u32) -> Self {
        let page = page.max(1);
        let total_pages = all.len().div_ceil(PAGE_SIZE).max(1) as u32;
        let start = (page as usize - 1).saturating_mul(PAGE_SIZE);
        let items = all.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        Self {
            items,
            page,
            total_pages,
            has_next: page < total_pages,
        }
    }
}

#[async_trait]
pub trait ComicSource: Send + Sync {
    fn name(&self) -> &str;

    async fn latest(&self, page: u32, sort: SortBy) -> Result<Page<Comic>, SourceError>;

    async fn detail(&self, slug: &str) -> Result<ComicDetail, SourceError>;

    async fn chapter(&self, slug: &str) -> Result<Chapter, SourceError>;

    async fn search(&self, query: &str, page: u32) -> Result<Page<Comic>, SourceError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterRecord {
    slug: String,
    title: String,
    number: f32,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComicRecord {
    #[serde(flatten)]
    comic: Comic,
    #[serde(default)]
    synopsis: String,
    /// Ascending by number.
    #[serde(default)]
    chapters: Vec<ChapterRecord>,
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    comics: Vec<ComicRecord>,
}

/// In-memory catalogue.
pub struct MemorySource {
    comics: Vec<ComicRecord>,
    latency: Duration,
}

impl MemorySource {
    fn from_catalogue(catalogue: Catalogue) -> Self {
        let mut comics = catalogue.comics;
        for record in &mut comics {
            record
                .chapters
                .sort_by(|a, b| a.number.total_cmp(&b.number));
            if record.comic.latest_chapter.is_none() {
                record.comic.latest_chapter = record.chapters.last().map(|c| c.title.clone());
            }
        }
        Self {
            comics,
            latency: Duration::ZERO,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let catalogue: Catalogue = serde_json::from_str(json)
            .map_err(|e| SourceError::InvalidInput(format!("fixture: {e}")))?;
        Ok(Self::from_catalogue(catalogue))
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Upstream(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Built-in catalogue used when no fixture file is configured.
    pub fn sample() -> Self {
        let catalogue: Catalogue = serde_json::from_str(SAMPLE_CATALOGUE)
            .unwrap_or(Catalogue { comics: Vec::new() });
        Self::from_catalogue(catalogue)
    }

    /// Delay every call, to stand in for a slow upstream.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn len(&self) -> usize {
        self.comics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comics.is_empty()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn sorted(&self, sort: SortBy) -> Vec<Comic> {
        let mut comics: Vec<Comic> = self.comics.iter().map(|r| r.comic.clone()).collect();
        match sort {
            SortBy::Latest => comics.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            SortBy::Rating => comics.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
            SortBy::Title => {
                comics.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            }
        }
        comics
    }
}

#[async_trait]
impl ComicSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn latest(&self, page: u32, sort: SortBy) -> Result<Page<Comic>, SourceError> {
        self.simulate_latency().await;
        Ok(Page::slice(&self.sorted(sort), page))
    }

    async fn detail(&self, slug: &str) -> Result<ComicDetail, SourceError> {
        self.simulate_latency().await;
        let record = self
            .comics
            .iter()
            .find(|r| r.comic.slug == slug)
            .ok_or_else(|| SourceError::not_found("comic", slug))?;

        Ok(ComicDetail {
            comic: record.comic.clone(),
            synopsis: record.synopsis.clone(),
            chapters: record
                .chapters
                .iter()
                .rev()
                .map(|c| ChapterRef {
                    slug: c.slug.clone(),
                    title: c.title.clone(),
                    number: c.number,
                })
                .collect(),
        })
    }

    async fn chapter(&self, slug: &str) -> Result<Chapter, SourceError> {
        self.simulate_latency().await;
        for record in &self.comics {
            if let Some(idx) = record.chapters.iter().position(|c| c.slug == slug) {
                let current = &record.chapters[idx];
                let prev = idx
                    .checked_sub(1)
                    .and_then(|i| record.chapters.get(i))
                    .map(|c| c.slug.clone());
                let next = record.chapters.get(idx + 1).map(|c| c.slug.clone());
                return Ok(Chapter {
                    slug: current.slug.clone(),
                    comic_slug: record.comic.slug.clone(),
                    title: current.title.clone(),
                    number: current.number,
                    images: current.images.clone(),
                    prev,
                    next,
                });
            }
        }
        Err(SourceError::not_found("chapter", slug))
    }

    async fn search(&self, query: &str, page: u32) -> Result<Page<Comic>, SourceError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(SourceError::InvalidInput("query must not be empty".into()));
        }
        self.simulate_latency().await;

        let matches: Vec<Comic> = self
            .sorted(SortBy::Title)
            .into_iter()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.genres.iter().any(|g| g.to_lowercase() == needle)
            })
            .collect();
        Ok(Page::slice(&matches, page))
    }
}

const SAMPLE_CATALOGUE: &str = r#"{
  "comics": [
    {
      "slug": "one-piece",
      "title": "One Piece",
      "kind": "manga",
      "rating": 9.1,
      "genres": ["action", "adventure"],
      "updatedAt": "2026-10-12T08:00:00Z",
      "synopsis": "A rubber pirate sets out to find the One Piece.",
      "chapters": [
        {"slug": "one-piece-chapter-1128", "title": "Chapter 1128", "number": 1128, "images": ["https://img.example/op/1128/1.jpg", "https://img.example/op/1128/2.jpg"]},
        {"slug": "one-piece-chapter-1129", "title": "Chapter 1129", "number": 1129, "images": ["https://img.example/op/1129/1.jpg"]}
      ]
    },
    {
      "slug": "solo-leveling",
      "title": "Solo Leveling",
      "kind": "manhwa",
      "rating": 8.8,
      "genres": ["action", "fantasy"],
      "updatedAt": "2026-09-30T12:00:00Z",
      "synopsis": "The weakest hunter gains the power to level up.",
      "chapters": [
        {"slug": "solo-leveling-chapter-200", "title": "Chapter 200", "number": 200, "images": ["https://img.example/sl/200/1.jpg"]}
      ]
    },
    {
      "slug": "blue-lock",
      "title": "Blue Lock",
      "kind": "manga",
      "rating": 8.4,
      "genres": ["sports"],
      "updatedAt": "2026-10-10T03:30:00Z",
      "synopsis": "Three hundred strikers compete for one spot.",
      "chapters": [
        {"slug": "blue-lock-chapter-310", "title": "Chapter 310", "number": 310, "images": []},
        {"slug": "blue-lock-chapter-311", "title": "Chapter 311", "number": 311, "images": []}
      ]
    }
  ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_catalogue_parses() {
        let source = MemorySource::sample();
        assert_eq!(source.len(), 3);
    }

    #[tokio::test]
    async fn test_latest_sorting() {
        let source = MemorySource::sample();
        let latest = source.latest(1, SortBy::Latest).await.unwrap();
        assert_eq!(latest.items[0].slug, "one-piece");
        assert_eq!(latest.items[0].latest_chapter.as_deref(), Some("Chapter 1129"));

        let by_title = source.latest(1, SortBy::Title).await.unwrap();
        assert_eq!(by_title.items[0].slug, "blue-lock");

        let by_rating = source.latest(1, SortBy::Rating).await.unwrap();
        assert_eq!(by_rating.items[2].slug, "blue-lock");
        assert!(!by_rating.has_next);
    }

    #[tokio::test]
    async fn test_chapter_navigation() {
        let source = MemorySource::sample();
        let chapter = source.chapter("one-piece-chapter-1128").await.unwrap();
        assert_eq!(chapter.comic_slug, "one-piece");
        assert_eq!(chapter.prev, None);
        assert_eq!(chapter.next.as_deref(), Some("one-piece-chapter-1129"));

        let err = source.chapter("missing").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { kind: "chapter", .. }));
    }

    #[tokio::test]
    async fn test_search_matches_title_and_genre() {
        let source = MemorySource::sample();
        assert_eq!(source.search("lock", 1).await.unwrap().items.len(), 1);
        assert_eq!(source.search("action", 1).await.unwrap().items.len(), 2);
        assert!(source.search("  ", 1).await.is_err());
    }

    #[test]
    fn test_page_slice() {
        let all: Vec<u32> = (0..45).collect();
        let third = Page::slice(&all, 3);
        assert_eq!(third.items, vec![40, 41, 42, 43, 44]);
        assert_eq!(third.total_pages, 3);
        assert!(!third.has_next);
        assert!(Page::slice(&all, 9).items.is_empty());
    }
}
