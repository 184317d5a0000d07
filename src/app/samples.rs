use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;

use crate::app::book_store::read_json;
use crate::app::model::Book;

/// Read-only showcase books bundled with a deployment.
#[derive(Debug, Clone, Default)]
pub struct SampleBooks {
    books: Vec<Book>,
    by_id: HashMap<String, usize>,
}

impl SampleBooks {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads `<dir>/index.json`, a JSON array of books. A missing file yields
    /// an empty catalog; a malformed one is an error.
    pub async fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join("index.json");
        let books: Option<Vec<Book>> = read_json(&path)
            .await
            .with_context(|| format!("load sample books: {}", path.display()))?;
        let Some(books) = books else {
            tracing::warn!(path = %path.display(), "sample book index not found; no samples");
            return Ok(Self::empty());
        };
        let samples = Self::from_books(books);
        tracing::info!(count = samples.books.len(), "sample books loaded");
        Ok(samples)
    }

    pub fn from_books(books: Vec<Book>) -> Self {
        let mut samples = Self::empty();
        for mut book in books {
            book.is_sample = true;
            if let Some(&index) = samples.by_id.get(&book.id) {
                samples.books[index] = book;
            } else {
                samples.by_id.insert(book.id.clone(), samples.books.len());
                samples.books.push(book);
            }
        }
        samples
    }

    pub fn get(&self, book_id: &str) -> Option<&Book> {
        self.by_id.get(book_id).map(|&index| &self.books[index])
    }

    pub fn all(&self) -> &[Book] {
        &self.books
    }
}
