use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

use crate::app::model::{Book, is_valid_book_id};

/// Durable owner of Book records. Writes replace the whole record; the
/// last write wins.
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get(&self, book_id: &str) -> anyhow::Result<Option<Book>>;
    async fn put(&self, book: &Book) -> anyhow::Result<()>;
    /// Books owned by `owner_id`, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Book>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    LocalFs,
    InMemory,
}

impl StoreBackend {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("STORYBOOK_STORE").unwrap_or_else(|_| "fs".to_string());
        Self::parse(&raw).with_context(|| {
            format!("invalid STORYBOOK_STORE={raw:?}. expected one of: fs, memory")
        })
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "fs" | "local" => Ok(Self::LocalFs),
            "memory" | "inmemory" => Ok(Self::InMemory),
            other => anyhow::bail!("unsupported store backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalFsBookStore {
    base_dir: PathBuf,
}

impl LocalFsBookStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    fn book_json_path(&self, book_id: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_book_id(book_id) {
            anyhow::bail!("invalid book id: {book_id:?}");
        }
        Ok(self.books_dir().join(book_id).join("book.json"))
    }
}

#[async_trait]
impl BookStore for LocalFsBookStore {
    async fn get(&self, book_id: &str) -> anyhow::Result<Option<Book>> {
        let path = self.book_json_path(book_id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put(&self, book: &Book) -> anyhow::Result<()> {
        let path = self.book_json_path(&book.id)?;
        write_json_atomic(&path, book)
            .await
            .context("write book.json")
    }

    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Book>> {
        let books_dir = self.books_dir();
        let mut entries = match fs::read_dir(&books_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", books_dir.display()));
            }
        };

        let mut books = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("read dir entry")? {
            let path = entry.path().join("book.json");
            let book: Option<Book> = match read_json(&path).await {
                Ok(book) => book,
                Err(err) => {
                    tracing::warn!(path = %path.display(), ?err, "skipping unreadable book");
                    continue;
                }
            };
            if let Some(book) = book
                && book.owner_id.as_deref() == Some(owner_id)
            {
                books.push(book);
            }
        }

        sort_newest_first(&mut books);
        Ok(books)
    }
}

/// Process-local store; contents vanish on restart.
#[derive(Debug, Default)]
pub struct InMemoryBookStore {
    books: RwLock<HashMap<String, Book>>,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn get(&self, book_id: &str) -> anyhow::Result<Option<Book>> {
        Ok(self.books.read().await.get(book_id).cloned())
    }

    async fn put(&self, book: &Book) -> anyhow::Result<()> {
        self.books
            .write()
            .await
            .insert(book.id.clone(), book.clone());
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Book>> {
        let mut books: Vec<Book> = self
            .books
            .read()
            .await
            .values()
            .filter(|book| book.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        sort_newest_first(&mut books);
        Ok(books)
    }
}

fn sort_newest_first(books: &mut [Book]) {
    books.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
