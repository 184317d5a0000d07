use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storybook::app::book_store::{BookStore, InMemoryBookStore};
use storybook::app::generator::{BookGenerator, GenerationSettings, RetryPolicy};
use storybook::app::model::{Book, GenerateBookRequest};
use storybook::app::queue::InProcessQueue;
use storybook::image_client::{ImageClient, ImageRequest};
use storybook::story_client::{StoryClientError, StoryRequest, StoryTextClient};

/// Answers story calls from a fixed script, recording the model of each call.
pub struct ScriptedStoryClient {
    script: Mutex<VecDeque<Result<String, StoryClientError>>>,
    models: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedStoryClient {
    pub fn new(script: Vec<Result<String, StoryClientError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn models_called(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoryTextClient for ScriptedStoryClient {
    async fn complete(&self, request: &StoryRequest) -> Result<String, StoryClientError> {
        self.models.lock().unwrap().push(request.model.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StoryClientError::Transport("script exhausted".to_owned())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBehavior {
    Succeed,
    /// Returns `None` on this 1-based call (the cover is call 1).
    FailOnCall(usize),
    /// Panics on this 1-based call.
    PanicOnCall(usize),
}

pub struct ScriptedImageClient {
    behavior: ImageBehavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedImageClient {
    pub fn new(behavior: ImageBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageClient for ScriptedImageClient {
    async fn generate(&self, request: &ImageRequest) -> Option<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.behavior {
            ImageBehavior::FailOnCall(n) if n == call => None,
            ImageBehavior::PanicOnCall(n) if n == call => panic!("image client exploded"),
            _ => Some(format!("aW1n{call}")),
        }
    }
}

/// Records `(status, progress)` of every write so tests can inspect history.
#[derive(Default)]
pub struct RecordingBookStore {
    inner: InMemoryBookStore,
    writes: Mutex<Vec<Book>>,
}

#[allow(dead_code)]
impl RecordingBookStore {
    pub fn writes(&self) -> Vec<Book> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookStore for RecordingBookStore {
    async fn get(&self, book_id: &str) -> anyhow::Result<Option<Book>> {
        self.inner.get(book_id).await
    }

    async fn put(&self, book: &Book) -> anyhow::Result<()> {
        self.writes.lock().unwrap().push(book.clone());
        self.inner.put(book).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Book>> {
        self.inner.list_by_owner(owner_id).await
    }
}

pub fn story_json(title: &str, pages: usize) -> String {
    let pages: Vec<serde_json::Value> = (1..=pages)
        .map(|n| {
            serde_json::json!({
                "pageNumber": n,
                "text": format!("Page {n} text."),
                "imageDescription": format!("scene {n}"),
            })
        })
        .collect();
    serde_json::json!({
        "title": title,
        "characters": { "main": "a small blue robot", "others": ["a grey owl"] },
        "pages": pages,
    })
    .to_string()
}

pub fn rate_limited() -> StoryClientError {
    StoryClientError::Status {
        status: 429,
        message: "too many requests".to_owned(),
    }
}

pub fn request(idea: &str, pages: i64) -> GenerateBookRequest {
    GenerateBookRequest {
        story_idea: idea.to_owned(),
        age_range: "2nd".to_owned(),
        illustration_style: "watercolor".to_owned(),
        page_count_hint: Some(pages),
        ..GenerateBookRequest::default()
    }
}

pub fn settings(models: &[&str]) -> GenerationSettings {
    GenerationSettings::new(
        models.iter().map(|m| (*m).to_owned()).collect(),
        "stub-image",
    )
    .with_retry(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::ZERO,
    })
}

pub fn generator(
    store: Arc<dyn BookStore>,
    story: Arc<dyn StoryTextClient>,
    image: Arc<dyn ImageClient>,
    models: &[&str],
) -> Arc<BookGenerator> {
    Arc::new(BookGenerator::new(
        store,
        story,
        image,
        InProcessQueue::new(2),
        settings(models),
    ))
}

/// Polls until the book leaves `generating`.
#[allow(dead_code)]
pub async fn wait_for_terminal(store: &dyn BookStore, book_id: &str) -> anyhow::Result<Book> {
    for _ in 0..500 {
        if let Some(book) = store.get(book_id).await?
            && book.status.is_terminal()
        {
            return Ok(book);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("book {book_id} did not finish in time")
}
