use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;

use crate::app::book_store::BookStore;
use crate::app::model::BookStatus;

pub const MAX_NARRATION_CHARS: usize = 4096;
pub const DEFAULT_SPEECH_VOICE: &str = "af_sky";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub input: String,
    pub model: String,
    pub voice: String,
    pub response_format: String,
    pub speed: f32,
    pub streaming: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("book not found")]
    NotFound,
    #[error("book is not ready for narration")]
    NotReady,
    #[error("book has no text to narrate")]
    EmptyText,
    #[error("speech generation failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error("book store error: {0:#}")]
    Store(anyhow::Error),
}

/// Text-to-speech collaborator; returns raw audio bytes.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<Vec<u8>>;
}

pub fn audio_speech_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/audio/speech")
}

/// Maps the narrator voice a book was requested with onto a provider voice.
pub fn voice_for(narrator_voice: &str) -> &'static str {
    match narrator_voice.trim().to_ascii_lowercase().as_str() {
        "default" | "nova" => "af_sky",
        "alloy" | "onyx" => "am_onyx",
        "echo" | "shimmer" => "af_bella",
        "fable" => "am_echo",
        _ => DEFAULT_SPEECH_VOICE,
    }
}

/// All page texts joined with spaces, cut to the provider's input limit.
pub fn narration_text<'a>(pages: impl IntoIterator<Item = &'a str>) -> String {
    let joined = pages
        .into_iter()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.chars().count() <= MAX_NARRATION_CHARS {
        return joined;
    }
    let mut cut: String = joined.chars().take(MAX_NARRATION_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

pub fn audio_data_url(bytes: &[u8]) -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:audio/mpeg;base64,{payload}")
}

#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSpeechClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: audio_speech_endpoint(base_url),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SpeechClient for HttpSpeechClient {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("speech endpoint returned {status}: {body}");
        }

        let bytes = response.bytes().await.context("read speech response")?;
        if bytes.is_empty() {
            anyhow::bail!("speech endpoint returned an empty body");
        }
        Ok(bytes.to_vec())
    }
}

/// Narrates a completed book and stores the audio on it as a data URL.
pub async fn narrate_book(
    store: &dyn BookStore,
    speech: &dyn SpeechClient,
    book_id: &str,
    model: &str,
) -> Result<String, NarrationError> {
    let mut book = store
        .get(book_id)
        .await
        .map_err(NarrationError::Store)?
        .ok_or(NarrationError::NotFound)?;
    if book.status != BookStatus::Completed {
        return Err(NarrationError::NotReady);
    }

    let input = narration_text(book.pages.iter().map(|page| page.text.as_str()));
    if input.is_empty() {
        return Err(NarrationError::EmptyText);
    }

    let request = SpeechRequest {
        input,
        model: model.to_owned(),
        voice: voice_for(&book.narrator_voice).to_owned(),
        response_format: "mp3".to_owned(),
        speed: 1.0,
        streaming: false,
    };
    tracing::info!(
        book_id,
        voice = %request.voice,
        chars = request.input.chars().count(),
        "narrating book"
    );
    let audio = speech
        .synthesize(&request)
        .await
        .map_err(NarrationError::Upstream)?;

    let audio_url = audio_data_url(&audio);
    book.audio_url = Some(audio_url.clone());
    store.put(&book).await.map_err(NarrationError::Store)?;
    Ok(audio_url)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::app::book_store::InMemoryBookStore;
    use crate::app::model::{Book, BookPage, GenerateBookRequest};

    #[derive(Default)]
    struct RecordingSpeech {
        requests: Mutex<Vec<SpeechRequest>>,
    }

    #[async_trait]
    impl SpeechClient for RecordingSpeech {
        async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<Vec<u8>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(b"ID3".to_vec())
        }
    }

    fn completed_book(voice: &str) -> Book {
        let request = GenerateBookRequest {
            story_idea: "idea".to_owned(),
            age_range: "1st".to_owned(),
            illustration_style: "crayon".to_owned(),
            narrator_voice: Some(voice.to_owned()),
            ..GenerateBookRequest::default()
        };
        let mut book = Book::new_generating("book_narrate".to_owned(), &request, None);
        book.status = BookStatus::Completed;
        book.pages = vec![
            BookPage {
                page_number: 1,
                text: " Once upon a time. ".to_owned(),
                image: String::new(),
            },
            BookPage {
                page_number: 2,
                text: "The end.".to_owned(),
                image: String::new(),
            },
        ];
        book
    }

    #[test]
    fn voices_map_with_default_fallback() {
        assert_eq!(voice_for("default"), "af_sky");
        assert_eq!(voice_for("Onyx"), "am_onyx");
        assert_eq!(voice_for("shimmer"), "af_bella");
        assert_eq!(voice_for("fable"), "am_echo");
        assert_eq!(voice_for("mystery"), DEFAULT_SPEECH_VOICE);
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let long = "a".repeat(5000);
        let text = narration_text([long.as_str()]);
        assert_eq!(text.chars().count(), MAX_NARRATION_CHARS);
        assert!(text.ends_with("..."));
        assert_eq!(narration_text([" one ", "", "two"]), "one two");
    }

    #[tokio::test]
    async fn narration_stores_audio_on_book() -> anyhow::Result<()> {
        let store = InMemoryBookStore::new();
        store.put(&completed_book("alloy")).await?;
        let speech = RecordingSpeech::default();

        let url = narrate_book(&store, &speech, "book_narrate", "tts-kokoro").await?;
        assert_eq!(url, "data:audio/mpeg;base64,SUQz");

        let sent = speech.requests.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].input, "Once upon a time. The end.");
        assert_eq!(sent[0].voice, "am_onyx");
        assert_eq!(sent[0].response_format, "mp3");

        let stored = store.get("book_narrate").await?.unwrap();
        assert_eq!(stored.audio_url.as_deref(), Some(url.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn only_completed_books_are_narrated() -> anyhow::Result<()> {
        let store = InMemoryBookStore::new();
        let mut book = completed_book("default");
        book.status = BookStatus::Generating;
        store.put(&book).await?;
        let speech = RecordingSpeech::default();

        let err = narrate_book(&store, &speech, "book_narrate", "tts").await.unwrap_err();
        assert!(matches!(err, NarrationError::NotReady));
        let err = narrate_book(&store, &speech, "book_other", "tts").await.unwrap_err();
        assert!(matches!(err, NarrationError::NotFound));
        assert!(speech.requests.lock().unwrap().is_empty());
        Ok(())
    }
}
