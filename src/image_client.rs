use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub steps: u32,
}

/// Image generation collaborator. Every failure collapses to `None` so the
/// caller decides whether a missing image is fatal.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, request: &ImageRequest) -> Option<String>;
}

pub fn image_generate_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/image/generate")
}

/// Wraps a base64 payload as a data URL for the given image format.
pub fn image_data_url(format: &str, base64_payload: &str) -> String {
    format!("data:image/{format};base64,{base64_payload}")
}

#[derive(Debug, Clone)]
pub struct HttpImageClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpImageClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: image_generate_endpoint(base_url),
            api_key: api_key.into(),
        }
    }

    async fn try_generate(&self, request: &ImageRequest) -> anyhow::Result<String> {
        #[derive(Deserialize)]
        struct ImageResponse {
            #[serde(default)]
            images: Vec<String>,
        }

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
            anyhow::bail!("image endpoint returned {status}: {body}");
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .context("parse image response")?;
        parsed
            .images
            .into_iter()
            .next()
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("image response has no `images[0]`"))
    }
}

#[async_trait]
impl ImageClient for HttpImageClient {
    async fn generate(&self, request: &ImageRequest) -> Option<String> {
        match self.try_generate(request).await {
            Ok(image) => Some(image),
            Err(err) => {
                tracing::warn!(
                    model = %request.model,
                    prompt_chars = request.prompt.chars().count(),
                    error = %format!("{err:#}"),
                    "image generation failed"
                );
                None
            }
        }
    }
}
