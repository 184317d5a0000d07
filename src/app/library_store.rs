use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::app::book_store::{read_json, write_json_atomic};

const RECENT_BOOKS_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentSettings {
    pub content_filter_enabled: bool,
    pub max_books_per_day: u32,
    pub allow_sharing: bool,
    pub require_approval: bool,
}

impl Default for ParentSettings {
    fn default() -> Self {
        Self {
            content_filter_enabled: true,
            max_books_per_day: 10,
            allow_sharing: true,
            require_approval: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub read_count: u32,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    pub book_id: String,
    pub duration_seconds: u64,
    pub completed: bool,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingStats {
    pub total_books_read: usize,
    pub total_reading_time: u64,
    pub favorite_books: Vec<String>,
    /// Book ids, most recently read first.
    pub recent_books: Vec<String>,
}

/// Everything one user keeps: favorites, read history, parent settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLibrary {
    #[serde(default)]
    pub entries: BTreeMap<String, LibraryEntry>,
    #[serde(default)]
    pub sessions: Vec<ReadingSession>,
    #[serde(default)]
    pub parent_settings: Option<ParentSettings>,
}

impl UserLibrary {
    fn entry(&mut self, book_id: &str, now: DateTime<Utc>) -> &mut LibraryEntry {
        self.entries
            .entry(book_id.to_owned())
            .or_insert_with(|| LibraryEntry {
                is_favorite: false,
                read_count: 0,
                last_read_at: None,
                added_at: now,
            })
    }

    /// Flips the favorite flag and returns the new value.
    pub fn toggle_favorite(&mut self, book_id: &str, now: DateTime<Utc>) -> bool {
        let entry = self.entry(book_id, now);
        entry.is_favorite = !entry.is_favorite;
        entry.is_favorite
    }

    pub fn favorites(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_favorite)
            .map(|(book_id, _)| book_id.clone())
            .collect()
    }

    pub fn record_reading(
        &mut self,
        book_id: &str,
        duration_seconds: u64,
        completed: bool,
        now: DateTime<Utc>,
    ) {
        let entry = self.entry(book_id, now);
        entry.read_count += 1;
        entry.last_read_at = Some(now);
        self.sessions.push(ReadingSession {
            book_id: book_id.to_owned(),
            duration_seconds,
            completed,
            read_at: now,
        });
    }

    pub fn stats(&self) -> ReadingStats {
        let distinct: HashSet<&str> = self.sessions.iter().map(|s| s.book_id.as_str()).collect();

        let mut recent: Vec<(&String, DateTime<Utc>)> = self
            .entries
            .iter()
            .filter_map(|(book_id, entry)| entry.last_read_at.map(|at| (book_id, at)))
            .collect();
        recent.sort_by(|a, b| b.1.cmp(&a.1));

        ReadingStats {
            total_books_read: distinct.len(),
            total_reading_time: self.sessions.iter().map(|s| s.duration_seconds).sum(),
            favorite_books: self.favorites(),
            recent_books: recent
                .into_iter()
                .take(RECENT_BOOKS_LIMIT)
                .map(|(book_id, _)| book_id.clone())
                .collect(),
        }
    }

    pub fn effective_parent_settings(&self) -> ParentSettings {
        self.parent_settings.clone().unwrap_or_default()
    }
}

/// Per-user library persistence. Load-modify-save; last write wins.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn load(&self, user_id: &str) -> anyhow::Result<UserLibrary>;
    async fn save(&self, user_id: &str, library: &UserLibrary) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsLibraryStore {
    base_dir: PathBuf,
}

impl LocalFsLibraryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// User ids come from the identity provider and may hold any character,
    /// so the directory name is their URL-safe base64 form.
    fn library_json_path(&self, user_id: &str) -> PathBuf {
        let dir = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(user_id.as_bytes());
        self.base_dir.join("users").join(dir).join("library.json")
    }
}

#[async_trait]
impl LibraryStore for LocalFsLibraryStore {
    async fn load(&self, user_id: &str) -> anyhow::Result<UserLibrary> {
        let path = self.library_json_path(user_id);
        let library = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Ok(library.unwrap_or_default())
    }

    async fn save(&self, user_id: &str, library: &UserLibrary) -> anyhow::Result<()> {
        let path = self.library_json_path(user_id);
        write_json_atomic(&path, library)
            .await
            .context("write library.json")
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLibraryStore {
    libraries: RwLock<HashMap<String, UserLibrary>>,
}

impl InMemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn load(&self, user_id: &str) -> anyhow::Result<UserLibrary> {
        Ok(self
            .libraries
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, user_id: &str, library: &UserLibrary) -> anyhow::Result<()> {
        self.libraries
            .write()
            .await
            .insert(user_id.to_owned(), library.clone());
        Ok(())
    }
}
