//! HTTP adapter for the external completion service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use gradegym_core::{Advisor, AdvisoryPrompt, Error, Result};

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

pub struct HttpAdvisor {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl HttpAdvisor {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn comment(&self, prompt: &AdvisoryPrompt) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.directive },
                { "role": "user", "content": prompt.details },
            ],
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("completion request failed: {err}")))?
            .error_for_status()
            .map_err(|err| Error::ExecutionFailed(format!("completion service: {err}")))?;

        let completion: Completion = response
            .json()
            .await
            .map_err(|err| Error::InvalidInput(format!("undecodable completion: {err}")))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::InvalidInput("completion had no choices".to_string()))
    }
}
