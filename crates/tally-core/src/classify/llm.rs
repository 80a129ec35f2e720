//! Optional LLM classification step
//!
//! The provider gets one structured prompt (transaction, candidate books
//! and categories, a few recent approved entries as patterns) and must
//! answer with a single JSON object. Anything else (bad JSON, unknown
//! ids, low confidence, timeouts) makes the pipeline fall through to the
//! local classifier. The LLM can never create books or categories.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::models::{Book, Category, Entry, ParsedTransaction, PaymentMode};

/// Structured answer the provider must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmPrediction {
    pub book_id: String,
    pub category_id: String,
    #[serde(default)]
    pub payment_mode: Option<PaymentMode>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// External LLM collaborator. Never assumed available or correct.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<LlmPrediction>;

    /// Model name, for logging.
    fn model(&self) -> &str;
}

/// Request to Ollama API
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

/// Response from Ollama API
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Ollama-compatible HTTP provider.
pub struct OllamaProvider {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.host, &config.model)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn classify(&self, prompt: &str) -> Result<LlmPrediction> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::LlmUnavailable(format!(
                "LLM server returned {}",
                response.status()
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;
        debug!(model = %self.model, "LLM response received");
        extract_prediction(&body.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Scripted provider for tests: pops pre-loaded answers front first.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<Result<LlmPrediction>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, response: Result<LlmPrediction>) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(response);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn classify(&self, _prompt: &str) -> Result<LlmPrediction> {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(Error::LlmUnavailable("no scripted response".into())))
    }

    fn model(&self) -> &str {
        "mock"
    }
}

/// Pull the first JSON object out of a completion. Models love to wrap
/// their answer in prose and code fences.
pub fn extract_prediction(text: &str) -> Result<LlmPrediction> {
    let start = text
        .find('{')
        .ok_or_else(|| Error::LlmProtocol("no JSON object in response".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| Error::LlmProtocol("unterminated JSON object".into()))?;
    if end < start {
        return Err(Error::LlmProtocol("malformed JSON object".into()));
    }
    let prediction: LlmPrediction = serde_json::from_str(&text[start..=end])
        .map_err(|e| Error::LlmProtocol(e.to_string()))?;
    if !(0.0..=1.0).contains(&prediction.confidence) {
        return Err(Error::LlmProtocol(format!(
            "confidence {} outside [0, 1]",
            prediction.confidence
        )));
    }
    Ok(prediction)
}

/// Build the structured classification prompt.
pub fn build_prompt(
    tx: &ParsedTransaction,
    books: &[Book],
    categories: &[Category],
    recent: &[Entry],
) -> String {
    let mut prompt = String::from(
        "You classify personal-finance transactions. Choose exactly one book id and one \
         category id from the lists below. Never invent ids.\n\n",
    );

    prompt.push_str("Books:\n");
    for book in books {
        prompt.push_str(&format!(
            "- {} | {} | {}\n",
            book.id, book.name, book.description
        ));
    }

    prompt.push_str("\nCategories:\n");
    for category in categories {
        prompt.push_str(&format!(
            "- {} | {} | {}\n",
            category.id, category.name, category.description
        ));
    }

    if !recent.is_empty() {
        prompt.push_str("\nRecent approved entries (pattern examples):\n");
        for entry in recent {
            prompt.push_str(&format!(
                "- \"{}\" ({} {}) -> book {} category {}\n",
                entry.party, entry.amount, entry.currency, entry.book_id, entry.category
            ));
        }
    }

    prompt.push_str(&format!(
        "\nTransaction:\n- description: \"{}\"\n- amount: {}\n- date: {}\n",
        tx.description, tx.amount, tx.date
    ));
    if let Some(currency) = &tx.currency {
        prompt.push_str(&format!("- currency: {}\n", currency));
    }

    prompt.push_str(
        "\nAnswer with only a JSON object:\n\
         {\"book_id\": \"...\", \"category_id\": \"...\", \"payment_mode\": \
         \"upi|card|cash|bank_transfer|wallet\", \"confidence\": 0.0, \"reasoning\": \"...\"}\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_json() {
        let prediction = extract_prediction(
            r#"{"book_id": "b1", "category_id": "c1", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(prediction.book_id, "b1");
        assert_eq!(prediction.confidence, 0.9);
        assert_eq!(prediction.payment_mode, None);
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let text = "Sure! Here is the classification:\n```json\n{\"book_id\": \"b2\", \
                    \"category_id\": \"c3\", \"payment_mode\": \"upi\", \"confidence\": 0.81, \
                    \"reasoning\": \"food delivery\"}\n```\nLet me know!";
        let prediction = extract_prediction(text).unwrap();
        assert_eq!(prediction.book_id, "b2");
        assert_eq!(prediction.payment_mode, Some(PaymentMode::Upi));
        assert_eq!(prediction.reasoning.as_deref(), Some("food delivery"));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(
            extract_prediction("I could not decide."),
            Err(Error::LlmProtocol(_))
        ));
        assert!(matches!(
            extract_prediction("{not json}"),
            Err(Error::LlmProtocol(_))
        ));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let text = r#"{"book_id": "b1", "category_id": "c1", "confidence": 1.7}"#;
        assert!(matches!(
            extract_prediction(text),
            Err(Error::LlmProtocol(_))
        ));
    }

    #[tokio::test]
    async fn mock_provider_scripts_responses() {
        let provider = MockProvider::new();
        provider.enqueue(Ok(LlmPrediction {
            book_id: "b1".into(),
            category_id: "c1".into(),
            payment_mode: None,
            confidence: 0.9,
            reasoning: None,
        }));

        assert!(provider.classify("prompt").await.is_ok());
        // Exhausted script behaves like an unavailable provider.
        assert!(matches!(
            provider.classify("prompt").await,
            Err(Error::LlmUnavailable(_))
        ));
    }
}
