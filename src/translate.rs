//! Natural-language to SQL translation
//!
//! A question is embedded in a fixed prompt together with the table name and
//! its columns, sent to a [`SqlGenerator`] once, and the reply is stripped of
//! Markdown code fences. The returned SQL is not validated here; the store
//! decides whether it may run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Row cap the prompt asks the model to respect
pub const PROMPT_ROW_LIMIT: usize = 100;

/// A text-generation backend that answers a prompt with raw text
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generate a reply for `prompt`
    ///
    /// Fails with `SheetsqlError::Generation` if the call itself fails.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Build the prompt for one question about one table
pub fn build_prompt(table_name: &str, columns: &[String], question: &str) -> String {
    format!(
        "Convert to SQL query:\n\
         Table: {}\n\
         Columns: {}\n\
         Question: {}\n\
         Return only SQL, limit {} rows.",
        table_name,
        columns.join(", "),
        question,
        PROMPT_ROW_LIMIT
    )
}

/// Strip whitespace and Markdown SQL fences from a model reply
pub fn clean_sql_response(raw: &str) -> String {
    raw.trim()
        .replace("```sql", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Translates questions into SQL through a [`SqlGenerator`]
#[derive(Clone)]
pub struct Translator {
    generator: Arc<dyn SqlGenerator>,
}

impl Translator {
    pub fn new(generator: Arc<dyn SqlGenerator>) -> Self {
        Self { generator }
    }

    /// Produce SQL text answering `question` about `table_name`
    pub async fn translate(
        &self,
        table_name: &str,
        columns: &[String],
        question: &str,
    ) -> Result<String> {
        let prompt = build_prompt(table_name, columns, question);
        tracing::debug!("Prompting {} with {} chars", self.generator.name(), prompt.len());

        let raw = self.generator.generate(&prompt).await?;
        let sql = clean_sql_response(&raw);
        tracing::debug!("Generated SQL: {}", sql);
        Ok(sql)
    }
}

#[cfg(feature = "gemini")]
pub use gemini::{GeminiGenerator, DEFAULT_BASE_URL, DEFAULT_MODEL};

#[cfg(feature = "gemini")]
mod gemini {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::SqlGenerator;
    use crate::{Result, SheetsqlError};

    pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

    /// Gemini `generateContent` client
    ///
    /// One request per prompt, no retries, no streaming.
    #[derive(Clone)]
    pub struct GeminiGenerator {
        base_url: String,
        model: String,
        api_key: String,
        client: reqwest::Client,
    }

    #[derive(Serialize)]
    struct GenerateRequest<'a> {
        contents: [RequestContent<'a>; 1],
    }

    #[derive(Serialize)]
    struct RequestContent<'a> {
        parts: [RequestPart<'a>; 1],
    }

    #[derive(Serialize)]
    struct RequestPart<'a> {
        text: &'a str,
    }

    #[derive(Deserialize)]
    struct GenerateResponse {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }

    #[derive(Deserialize)]
    struct Candidate {
        content: Option<ResponseContent>,
    }

    #[derive(Deserialize)]
    struct ResponseContent {
        #[serde(default)]
        parts: Vec<ResponsePart>,
    }

    #[derive(Deserialize)]
    struct ResponsePart {
        text: Option<String>,
    }

    impl GeminiGenerator {
        /// Creates a client for `model` against the public Gemini endpoint.
        pub fn new(
            api_key: impl Into<String>,
            model: impl Into<String>,
            timeout_secs: u64,
        ) -> Result<Self> {
            Self::with_base_url(DEFAULT_BASE_URL, api_key, model, timeout_secs)
        }

        /// Creates a client against a custom endpoint (proxies, tests).
        pub fn with_base_url(
            base_url: impl Into<String>,
            api_key: impl Into<String>,
            model: impl Into<String>,
            timeout_secs: u64,
        ) -> Result<Self> {
            let base_url: String = base_url.into();
            let api_key: String = api_key.into();
            if api_key.trim().is_empty() {
                return Err(SheetsqlError::InternalError(
                    "Gemini API key must not be empty".to_string(),
                ));
            }
            if timeout_secs == 0 {
                return Err(SheetsqlError::InternalError(
                    "Gemini timeout must be > 0 seconds".to_string(),
                ));
            }
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .map_err(|e| {
                    SheetsqlError::InternalError(format!("http client build failed: {e}"))
                })?;
            Ok(Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                model: model.into(),
                api_key,
                client,
            })
        }

        fn endpoint(&self) -> String {
            format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            )
        }
    }

    #[async_trait]
    impl SqlGenerator for GeminiGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            let body = GenerateRequest {
                contents: [RequestContent {
                    parts: [RequestPart { text: prompt }],
                }],
            };

            let resp = self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| SheetsqlError::Generation(format!("Gemini request failed: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let detail = resp.text().await.unwrap_or_default();
                return Err(SheetsqlError::Generation(format!(
                    "Gemini request failed with status {}: {}",
                    status,
                    detail.trim()
                )));
            }

            let parsed: GenerateResponse = resp.json().await.map_err(|e| {
                SheetsqlError::Generation(format!("invalid Gemini response JSON: {e}"))
            })?;

            let text: String = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();

            if text.is_empty() {
                return Err(SheetsqlError::Generation(
                    "Gemini response contained no text".to_string(),
                ));
            }
            Ok(text)
        }

        fn name(&self) -> &str {
            &self.model
        }
    }

}
