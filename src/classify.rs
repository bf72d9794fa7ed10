use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{Classification, TagDomain};
use crate::extract::extract_labels;
use crate::llm::{ChatClient, ChatRequest};
use crate::prompts::classification_prompt;

pub struct Classifier<C: ChatClient> {
    client: C,
    model: String,
    attempts: usize,
    retry_delay: Duration,
}

impl<C: ChatClient> Classifier<C> {
    pub fn new(client: C, model: impl Into<String>, attempts: usize) -> Self {
        Self {
            client,
            model: model.into(),
            attempts: attempts.max(1),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn classify(&self, domain: TagDomain, item: &str) -> Classification {
        let request = ChatRequest::user(self.model.clone(), classification_prompt(domain, item));

        for attempt in 1..=self.attempts {
            match self.client.chat(&request) {
                Ok(reply) => match extract_labels(&reply) {
                    Some(labels) => {
                        debug!(%domain, item, labels = %labels, attempt, "classified");
                        return Classification::classified(item, labels);
                    }
                    None => warn!(%domain, item, attempt, "no JSON array in reply"),
                },
                Err(err) => warn!(%domain, item, attempt, error = %err, "chat call failed"),
            }
            if attempt < self.attempts && !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }

        warn!(%domain, item, attempts = self.attempts, "defaulting to others");
        Classification::unresolved(item)
    }
}
