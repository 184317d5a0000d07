use std::sync::Arc;
use std::time::Duration;

use crate::app::book_store::BookStore;
use crate::app::model::{
    Book, BookPage, BookStatus, GenerateBookRequest, ImagePrompt, PromptTarget, Prompts,
    StartedGeneration, TitlePage, new_book_id,
};
use crate::app::queue::InProcessQueue;
use crate::config::ProviderConfig;
use crate::image_client::{ImageClient, ImageRequest, image_data_url};
use crate::story::{
    STORY_SYSTEM_PROMPT, build_cover_prompt, build_page_image_prompt, build_story_prompt,
    character_preamble, parse_story_outline,
};
use crate::story_client::{StoryClientError, StoryRequest, StoryTextClient};

/// Progress once the story outline is stored.
pub const STORY_PROGRESS: u32 = 10;
/// Progress once the cover attempt is resolved, whatever its outcome.
pub const COVER_PROGRESS: u32 = 20;
/// Ceiling for page progress; only completion reports 100.
pub const PAGE_PROGRESS_CAP: u32 = 95;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("story service is busy, try again later: {0}")]
    UpstreamRateLimited(String),
    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),
    #[error("could not parse generated story: {0}")]
    ParseFailure(String),
    #[error("illustration for page {page} failed after {completed} page(s) were generated")]
    PartialGeneration { page: u32, completed: usize },
    #[error("book store error: {0}")]
    Store(String),
    #[error("generation task aborted: {0}")]
    Aborted(String),
}

impl GenerationError {
    fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{err:#}"))
    }
}

/// Backoff for rate-limited story calls: retry `n` sleeps `n * base_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Tried in order; later entries are fallbacks.
    pub story_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub image_model: String,
    pub image_width: u32,
    pub image_height: u32,
    pub image_format: String,
    pub image_steps: u32,
    pub retry: RetryPolicy,
}

impl GenerationSettings {
    pub fn new(story_models: Vec<String>, image_model: impl Into<String>) -> Self {
        Self {
            story_models,
            temperature: 0.8,
            max_tokens: 2000,
            image_model: image_model.into(),
            image_width: 1024,
            image_height: 768,
            image_format: "webp".to_owned(),
            image_steps: 8,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_provider(config: &ProviderConfig) -> Self {
        Self::new(config.story_models(), config.image_model.clone())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Raw story text plus which model produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryText {
    pub text: String,
    pub model: String,
    pub retries: u32,
}

/// Progress after page `index` (0-based) of `total` has been stored.
pub fn page_progress(index: usize, total: usize) -> u32 {
    let step = 80.0 / total.max(1) as f64;
    let progress = (f64::from(COVER_PROGRESS) + (index + 1) as f64 * step).floor() as u32;
    progress.min(PAGE_PROGRESS_CAP)
}

/// Owns a book's write path from creation until it reaches a terminal state.
pub struct BookGenerator {
    book_store: Arc<dyn BookStore>,
    story_client: Arc<dyn StoryTextClient>,
    image_client: Arc<dyn ImageClient>,
    queue: InProcessQueue,
    settings: GenerationSettings,
}

impl BookGenerator {
    pub fn new(
        book_store: Arc<dyn BookStore>,
        story_client: Arc<dyn StoryTextClient>,
        image_client: Arc<dyn ImageClient>,
        queue: InProcessQueue,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            book_store,
            story_client,
            image_client,
            queue,
            settings,
        }
    }

    pub fn book_store(&self) -> &Arc<dyn BookStore> {
        &self.book_store
    }

    /// Validates and stores a `generating` book, then hands the pipeline to
    /// the queue. Returns without waiting for any upstream call.
    pub async fn start_generation(
        self: &Arc<Self>,
        request: GenerateBookRequest,
        owner_id: Option<String>,
    ) -> Result<StartedGeneration, GenerationError> {
        let book = self.create_book(&request, owner_id).await?;
        let book_id = book.id.clone();

        let generator = Arc::clone(self);
        let task_book_id = book_id.clone();
        self.queue.spawn(async move {
            generator.run_pipeline(task_book_id, request).await;
        });

        Ok(StartedGeneration {
            book_id,
            status: BookStatus::Generating,
        })
    }

    pub async fn create_book(
        &self,
        request: &GenerateBookRequest,
        owner_id: Option<String>,
    ) -> Result<Book, GenerationError> {
        request.validate().map_err(GenerationError::Validation)?;

        let book = Book::new_generating(new_book_id(), request, owner_id);
        self.book_store
            .put(&book)
            .await
            .map_err(GenerationError::store)?;
        tracing::info!(
            book_id = %book.id,
            owner_id = ?book.owner_id,
            pages = request.page_count(),
            "book created"
        );
        Ok(book)
    }

    /// Runs the whole pipeline for one book. Never fails: every error, panics
    /// included, ends in an `error` write.
    pub async fn run_pipeline(self: Arc<Self>, book_id: String, request: GenerateBookRequest) {
        let generator = Arc::clone(&self);
        let task_book_id = book_id.clone();
        let joined = tokio::spawn(async move {
            generator.try_run_pipeline(&task_book_id, &request).await
        })
        .await;

        let err = match joined {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(join_err) => GenerationError::Aborted(join_err.to_string()),
        };

        tracing::error!(book_id = %book_id, error = %err, "book generation failed");
        if let Err(mark_err) = self.mark_error(&book_id, &err).await {
            tracing::error!(
                book_id = %book_id,
                error = %format!("{mark_err:#}"),
                "failed to record book error"
            );
        }
    }

    async fn try_run_pipeline(
        &self,
        book_id: &str,
        request: &GenerateBookRequest,
    ) -> Result<(), GenerationError> {
        let mut book = self
            .book_store
            .get(book_id)
            .await
            .map_err(GenerationError::store)?
            .ok_or_else(|| GenerationError::Store(format!("book not found: {book_id}")))?;
        if book.status.is_terminal() {
            tracing::warn!(book_id, status = ?book.status, "book already finished; skipping");
            return Ok(());
        }

        let story_prompt = build_story_prompt(request);
        let story = self.request_story_text(book_id, &story_prompt).await?;
        let outline = parse_story_outline(&story.text).map_err(GenerationError::ParseFailure)?;
        let total = outline.pages.len();

        book.title = outline.title_or_default();
        book.expected_pages = Some(total);
        book.prompts = Some(Prompts {
            story: story_prompt,
            images: Vec::new(),
        });
        self.save_progress(&mut book, STORY_PROGRESS).await?;
        tracing::info!(book_id, title = %book.title, pages = total, model = %story.model, "story ready");

        let mut image_prompts = Vec::with_capacity(total + 1);

        let cover_prompt =
            build_cover_prompt(&book.title, outline.pages.first(), &book.illustration_style);
        match self.image_client.generate(&self.image_request(&cover_prompt)).await {
            Some(image) => {
                book.title_page = Some(TitlePage {
                    image: image_data_url(&self.settings.image_format, &image),
                    title: book.title.clone(),
                });
            }
            None => {
                tracing::warn!(book_id, "cover illustration failed; continuing without title page");
            }
        }
        image_prompts.push(ImagePrompt {
            page_number: PromptTarget::Cover,
            prompt: cover_prompt,
        });
        self.save_progress(&mut book, COVER_PROGRESS).await?;

        let preamble = character_preamble(outline.characters.as_ref(), request.character.as_ref());
        for (index, page) in outline.pages.iter().enumerate() {
            let page_number = (index + 1) as u32;
            let prompt =
                build_page_image_prompt(preamble.as_deref(), page, &book.illustration_style);

            let Some(image) = self.image_client.generate(&self.image_request(&prompt)).await
            else {
                return Err(GenerationError::PartialGeneration {
                    page: page_number,
                    completed: book.pages.len(),
                });
            };

            book.pages.push(BookPage {
                page_number,
                text: page.text.trim().to_owned(),
                image: image_data_url(&self.settings.image_format, &image),
            });
            image_prompts.push(ImagePrompt {
                page_number: PromptTarget::Page(page_number),
                prompt,
            });
            let progress = page_progress(index, total);
            self.save_progress(&mut book, progress).await?;
            tracing::info!(book_id, page = page_number, total, progress, "page illustrated");
        }

        book.status = BookStatus::Completed;
        book.generation_progress = Some(100);
        if let Some(prompts) = book.prompts.as_mut() {
            prompts.images = image_prompts;
        }
        self.book_store
            .put(&book)
            .await
            .map_err(GenerationError::store)?;
        tracing::info!(book_id, pages = book.pages.len(), "book completed");
        Ok(())
    }

    /// Story call with retry on 429 and model fallback.
    ///
    /// Each model gets one call plus up to `retry.max_retries` retries while
    /// it keeps answering 429. Any other failure moves straight on to the
    /// next model.
    pub async fn request_story_text(
        &self,
        book_id: &str,
        prompt: &str,
    ) -> Result<StoryText, GenerationError> {
        let mut last_err: Option<StoryClientError> = None;

        for model in &self.settings.story_models {
            let request = StoryRequest {
                model: model.clone(),
                system: STORY_SYSTEM_PROMPT.to_owned(),
                prompt: prompt.to_owned(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            };

            let mut retries = 0u32;
            loop {
                match self.story_client.complete(&request).await {
                    Ok(text) => {
                        return Ok(StoryText {
                            text,
                            model: model.clone(),
                            retries,
                        });
                    }
                    Err(err) if err.is_rate_limited() && retries < self.settings.retry.max_retries => {
                        retries += 1;
                        let delay = self.settings.retry.delay_for(retries);
                        tracing::warn!(
                            book_id,
                            model = %model,
                            retry = retries,
                            delay_ms = delay.as_millis() as u64,
                            "story endpoint rate limited; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        tracing::warn!(book_id, model = %model, error = %err, "story model failed");
                        last_err = Some(err);
                        break;
                    }
                }
            }
        }

        Err(match last_err {
            Some(err) if err.is_rate_limited() => {
                GenerationError::UpstreamRateLimited(err.to_string())
            }
            Some(err) => GenerationError::UpstreamFailure(err.to_string()),
            None => GenerationError::UpstreamFailure("no story models configured".to_owned()),
        })
    }

    fn image_request(&self, prompt: &str) -> ImageRequest {
        ImageRequest {
            model: self.settings.image_model.clone(),
            prompt: prompt.to_owned(),
            width: self.settings.image_width,
            height: self.settings.image_height,
            format: self.settings.image_format.clone(),
            steps: self.settings.image_steps,
        }
    }

    async fn save_progress(&self, book: &mut Book, percent: u32) -> Result<(), GenerationError> {
        let current = book.generation_progress.unwrap_or(0);
        book.generation_progress = Some(current.max(percent.min(100)));
        self.book_store
            .put(book)
            .await
            .map_err(GenerationError::store)
    }

    async fn mark_error(&self, book_id: &str, err: &GenerationError) -> anyhow::Result<()> {
        let Some(mut book) = self.book_store.get(book_id).await? else {
            return Ok(());
        };
        if book.status.is_terminal() {
            return Ok(());
        }
        book.status = BookStatus::Error;
        book.error_message = Some(err.to_string());
        self.book_store.put(&book).await?;
        Ok(())
    }
}
