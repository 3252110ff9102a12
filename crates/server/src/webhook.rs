use async_trait::async_trait;

use trato_core::events::{EventDeliveryError, EventSink, NegotiationEvent};

/// Delivers negotiation events to the chat transcript collaborator over
/// HTTP. Failures surface as delivery errors for the dispatcher to retry.
pub struct WebhookEventSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookEventSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn deliver(&self, event: &NegotiationEvent) -> Result<(), EventDeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&event.to_wire())
            .send()
            .await
            .map_err(|error| EventDeliveryError::Transport(error.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EventDeliveryError::Transport(format!(
                "transcript webhook returned {}",
                response.status()
            )))
        }
    }
}
