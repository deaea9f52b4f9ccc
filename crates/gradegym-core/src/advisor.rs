//! Advisory commentary seam.

use async_trait::async_trait;

use crate::{Job, Result, text};

/// Number of trailing diagnostic bytes quoted to the advisor.
const DETAIL_BYTES: usize = 200;

/// Two-message exchange sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryPrompt {
    /// System directive.
    pub directive: String,
    /// User message: overall outcome plus the tail of the diagnostic.
    pub details: String,
}

impl AdvisoryPrompt {
    pub fn for_job(job: &Job) -> Self {
        let outcome = if job.broken { "error occurred" } else { "all fine" };
        Self {
            directive: "give short advice on this error".to_string(),
            details: format!("{outcome} {}", text::tail(&job.text_content, DETAIL_BYTES)),
        }
    }
}

/// External completion service producing free-text commentary.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn comment(&self, prompt: &AdvisoryPrompt) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_quotes_outcome_and_diagnostic_tail() {
        let mut job = Job::new(1, "cat", 2, "/tmp/ws");
        job.mark_broken("x".repeat(300));

        let prompt = AdvisoryPrompt::for_job(&job);
        assert_eq!(prompt.directive, "give short advice on this error");
        assert!(prompt.details.starts_with("error occurred "));
        // outcome prefix + space + 200-byte tail
        assert_eq!(prompt.details.len(), "error occurred ".len() + 200);
    }

    #[test]
    fn prompt_for_healthy_job() {
        let job = Job::new(1, "cat", 2, "/tmp/ws");
        let prompt = AdvisoryPrompt::for_job(&job);
        assert!(prompt.details.starts_with("all fine"));
    }
}
