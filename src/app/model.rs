use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_PAGE_COUNT: usize = 8;
pub const MIN_PAGE_COUNT: usize = 5;
pub const MAX_PAGE_COUNT: usize = 12;
pub const DEFAULT_TITLE: &str = "My Story";
pub const DEFAULT_NARRATOR_VOICE: &str = "default";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Generating,
    Completed,
    Error,
}

impl BookStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Generating)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookPage {
    pub page_number: u32,
    pub text: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TitlePage {
    pub image: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Character {
    pub name: String,
    #[serde(rename = "type", default = "default_character_kind")]
    pub kind: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

fn default_character_kind() -> String {
    "animal".to_owned()
}

/// Which illustration an image prompt was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTarget {
    Cover,
    Page(u32),
}

impl Serialize for PromptTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Cover => serializer.serialize_str("cover"),
            Self::Page(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for PromptTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Page(n)),
            Raw::Label(label) if label == "cover" => Ok(Self::Cover),
            Raw::Label(other) => Err(serde::de::Error::custom(format!(
                "unknown prompt target: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrompt {
    pub page_number: PromptTarget,
    pub prompt: String,
}

/// Prompts sent upstream for one generation, kept for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompts {
    pub story: String,
    #[serde(default)]
    pub images: Vec<ImagePrompt>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_page: Option<TitlePage>,
    #[serde(default)]
    pub pages: Vec<BookPage>,
    pub age_range: String,
    pub illustration_style: String,
    #[serde(default = "default_narrator_voice")]
    pub narrator_voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<Character>,
    pub status: BookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Prompts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_sample: bool,
}

fn default_narrator_voice() -> String {
    DEFAULT_NARRATOR_VOICE.to_owned()
}

impl Book {
    /// A fresh book in `generating` state; nothing has been produced yet.
    pub fn new_generating(
        id: String,
        request: &GenerateBookRequest,
        owner_id: Option<String>,
    ) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_owned(),
            title_page: None,
            pages: Vec::new(),
            age_range: request.age_range.trim().to_owned(),
            illustration_style: request.illustration_style.trim().to_owned(),
            narrator_voice: request
                .narrator_voice
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(DEFAULT_NARRATOR_VOICE)
                .to_owned(),
            character: request.character.clone(),
            status: BookStatus::Generating,
            expected_pages: None,
            generation_progress: Some(0),
            audio_url: None,
            prompts: None,
            error_message: None,
            created_at: Utc::now(),
            owner_id,
            is_sample: false,
        }
    }

    pub fn expected_pages_or_default(&self) -> usize {
        self.expected_pages.unwrap_or(DEFAULT_PAGE_COUNT)
    }

    /// Progress reported to pollers: the persisted value when present,
    /// otherwise an estimate from the pages produced so far.
    pub fn progress(&self) -> u32 {
        if let Some(progress) = self.generation_progress {
            return progress.min(100);
        }
        if self.status == BookStatus::Completed {
            return 100;
        }
        let expected = self.expected_pages_or_default().max(1);
        let ratio = self.pages.len() as f64 / expected as f64;
        ((ratio * 100.0).round() as u32).min(100)
    }

    pub fn status_view(&self) -> BookStatusView {
        BookStatusView {
            status: self.status,
            progress: self.progress(),
            pages_completed: self.pages.len(),
            total_pages: self.expected_pages_or_default(),
            expected_pages: self.expected_pages_or_default(),
            pages: self.pages.clone(),
            error: self.error_message.clone(),
        }
    }
}

/// Polling payload for a book under generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookStatusView {
    pub status: BookStatus,
    pub progress: u32,
    pub pages_completed: usize,
    pub total_pages: usize,
    pub expected_pages: usize,
    pub pages: Vec<BookPage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBookRequest {
    #[serde(default)]
    pub story_idea: String,
    #[serde(default)]
    pub age_range: String,
    #[serde(default)]
    pub illustration_style: String,
    #[serde(default)]
    pub page_count_hint: Option<i64>,
    #[serde(default)]
    pub character: Option<Character>,
    #[serde(default)]
    pub narrator_voice: Option<String>,
}

impl GenerateBookRequest {
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        if self.story_idea.trim().is_empty() {
            missing.push("storyIdea");
        }
        if self.age_range.trim().is_empty() {
            missing.push("ageRange");
        }
        if self.illustration_style.trim().is_empty() {
            missing.push("illustrationStyle");
        }
        if !missing.is_empty() {
            return Err(format!("missing required fields: {}", missing.join(", ")));
        }
        if let Some(character) = &self.character
            && character.name.trim().is_empty()
        {
            return Err("character.name must not be empty".to_owned());
        }
        Ok(())
    }

    /// Requested page count clamped to the supported range.
    pub fn page_count(&self) -> usize {
        match self.page_count_hint {
            None => DEFAULT_PAGE_COUNT,
            Some(hint) => hint.clamp(MIN_PAGE_COUNT as i64, MAX_PAGE_COUNT as i64) as usize,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartedGeneration {
    pub book_id: String,
    pub status: BookStatus,
}

/// `book_<unix millis>_<9 hex chars>`.
pub fn new_book_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("book_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Book ids double as path segments in the filesystem store.
pub fn is_valid_book_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
