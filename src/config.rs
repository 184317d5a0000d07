use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_BASE_URL: &str = "https://api.venice.ai/api/v1";
pub const DEFAULT_STORY_MODEL: &str = "venice-uncensored";
pub const DEFAULT_STORY_FALLBACK_MODEL: &str = "llama-3.3-70b";
pub const DEFAULT_IMAGE_MODEL: &str = "qwen-image";
pub const DEFAULT_TTS_MODEL: &str = "tts-kokoro";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Connection settings for the generative provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub story_model: String,
    pub story_fallback_model: Option<String>,
    pub image_model: String,
    pub tts_model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("story_model", &self.story_model)
            .field("story_fallback_model", &self.story_fallback_model)
            .field("image_model", &self.image_model)
            .field("tts_model", &self.tts_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Reads the provider settings from the environment.
    ///
    /// The API key is mandatory: `STORYBOOK_API_KEY`, falling back to
    /// `VENICE_API_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("STORYBOOK_API_KEY")
            .or_else(|| get("VENICE_API_KEY"))
            .ok_or_else(|| anyhow::anyhow!("STORYBOOK_API_KEY (or VENICE_API_KEY) is not set"))?;

        let base_url = get("STORYBOOK_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let parsed = url::Url::parse(&base_url)
            .with_context(|| format!("invalid STORYBOOK_API_BASE_URL={base_url:?}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("STORYBOOK_API_BASE_URL must be http/https: {base_url}");
        }

        let timeout_secs = match get("STORYBOOK_HTTP_TIMEOUT_SECS") {
            None => DEFAULT_HTTP_TIMEOUT_SECS,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| format!("invalid STORYBOOK_HTTP_TIMEOUT_SECS={raw:?}"))?,
        };

        let story_model =
            get("STORYBOOK_STORY_MODEL").unwrap_or_else(|| DEFAULT_STORY_MODEL.to_owned());
        let story_fallback_model = get("STORYBOOK_STORY_FALLBACK_MODEL")
            .or_else(|| Some(DEFAULT_STORY_FALLBACK_MODEL.to_owned()))
            .filter(|fallback| *fallback != story_model && fallback != "none");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            story_model,
            story_fallback_model,
            image_model: get("STORYBOOK_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_owned()),
            tts_model: get("STORYBOOK_TTS_MODEL").unwrap_or_else(|| DEFAULT_TTS_MODEL.to_owned()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Story models in the order they are tried.
    pub fn story_models(&self) -> Vec<String> {
        let mut models = vec![self.story_model.clone()];
        models.extend(self.story_fallback_model.clone());
        models
    }

    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")
    }
}
