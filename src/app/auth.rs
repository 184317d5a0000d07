use std::collections::HashMap;

use anyhow::Context as _;
use async_trait::async_trait;

/// Turns a bearer token into a user id. Token issuance lives elsewhere.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `Ok(None)` means the token is not recognized.
    async fn verify(&self, token: &str) -> anyhow::Result<Option<String>>;

    /// Whether any identity source is available at all.
    fn is_configured(&self) -> bool;
}

/// Fixed token → user id table, read from `STORYBOOK_AUTH_TOKENS`
/// (`token=uid,token=uid`).
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("STORYBOOK_AUTH_TOKENS").unwrap_or_default();
        Self::parse(&raw).context("invalid STORYBOOK_AUTH_TOKENS")
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut tokens = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((token, user_id)) = pair.split_once('=') else {
                anyhow::bail!("expected token=uid, got {pair:?}");
            };
            let (token, user_id) = (token.trim(), user_id.trim());
            if token.is_empty() || user_id.is_empty() {
                anyhow::bail!("empty token or uid in {pair:?}");
            }
            tokens.insert(token.to_owned(), user_id.to_owned());
        }
        Ok(Self { tokens })
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.get(token).cloned())
    }

    fn is_configured(&self) -> bool {
        !self.tokens.is_empty()
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
