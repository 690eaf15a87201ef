use std::future::Future;
use std::pin::Pin;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tracing::error;

use crate::utils::log_helpers::truncate_log;

pub type GeneratorBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces the reply text for a query.
///
/// `stream` yields the reply in the chunks the producer sends as
/// `TEXT_MESSAGE_CONTENT` events. The provided implementation generates the
/// whole reply first and splits it on whitespace.
pub trait ResponseGenerator: Send + Sync {
    fn generate<'a>(&'a self, query: &'a str) -> GeneratorBoxFuture<'a, Result<String, String>>;

    fn stream<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<String, String>> {
        stream::once(self.generate(query))
            .flat_map(|result| match result {
                Ok(text) => stream::iter(split_words(&text).into_iter().map(Ok)).boxed(),
                Err(err) => stream::iter(vec![Err(err)]).boxed(),
            })
            .boxed()
    }
}

/// Whitespace tokens, each but the last followed by a single space, so the
/// concatenation is the normalized text.
pub fn split_words(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i < last {
                format!("{word} ")
            } else {
                word.to_string()
            }
        })
        .collect()
}

const HIKING_REPLY: &str = "I found some great hiking trails in your area! Here are a few popular options: Bear Mountain Trail (moderate difficulty, 3.2 miles), Sunset Ridge Loop (easy, 1.8 miles), and Eagle Peak Summit (challenging, 5.7 miles). Would you like more details about any of these trails?";
const CYCLING_REPLY: &str = "There are several excellent cycling routes nearby! I recommend the Riverside Path (easy, 8 miles of paved trail), Mountain Loop Road (moderate, 12 miles with scenic views), and the Advanced Hill Circuit (challenging, 15 miles with steep climbs). Which type of cycling experience are you looking for?";
const FOOD_REPLY: &str = "Here are some great local restaurants: The Mountain View Café (farm-to-table, outdoor seating), Trailhead Grill (burgers and craft beer), and Summit Bistro (fine dining with valley views). What type of cuisine are you in the mood for?";
const DEFAULT_REPLY: &str = "Thanks for your message! I'm here to help you discover outdoor activities, restaurants, and local attractions. You can ask me about hiking trails, cycling routes, places to eat, or any other activities you're interested in. What would you like to explore today?";

/// Keyword replies used when no language model is configured.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedGenerator;

impl RuleBasedGenerator {
    pub fn reply_for(query: &str) -> &'static str {
        let lowered = query.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));

        if has(&["hiking", "trail"]) {
            HIKING_REPLY
        } else if has(&["cycling", "bike"]) {
            CYCLING_REPLY
        } else if has(&["restaurant", "food", "eat"]) {
            FOOD_REPLY
        } else {
            DEFAULT_REPLY
        }
    }
}

impl ResponseGenerator for RuleBasedGenerator {
    fn generate<'a>(&'a self, query: &'a str) -> GeneratorBoxFuture<'a, Result<String, String>> {
        Box::pin(async move { Ok::<String, String>(Self::reply_for(query).to_string()) })
    }
}

const SYSTEM_PROMPT: &str = "You are a local community guide. Help the user discover outdoor activities, trails, cycling routes, restaurants and attractions near them. Answer concisely in plain text.";

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_payload(&self, query: &str) -> Value {
        json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": query }
            ]
        })
    }
}

fn extract_reply(body: &Value) -> Result<String, String> {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::trim)
        .unwrap_or("");
    if content.is_empty() {
        return Err("language model returned an empty reply".to_string());
    }
    Ok(content.to_string())
}

impl ResponseGenerator for OpenAiGenerator {
    fn generate<'a>(&'a self, query: &'a str) -> GeneratorBoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(&self.build_payload(query))
                .send()
                .await
                .map_err(|e| e.to_string())?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                error!(
                    "[AI] completion request failed: status={}, error={}",
                    status,
                    truncate_log(&text, 2000)
                );
                return Err(format!("language model request failed with status {status}"));
            }

            let body: Value = resp.json().await.map_err(|e| e.to_string())?;
            extract_reply(&body)
        })
    }
}
