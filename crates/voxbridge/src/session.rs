use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{CompletionRequest, Message};
use crate::providers::{StreamEvent, UpstreamClient, UpstreamError};
use crate::segment::SentenceSegmenter;

/// Messages accepted over the persistent client connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Text { text: String },
}

/// Notifications pushed to the client, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    Sentence {
        text: String,
        index: usize,
    },
    Done {
        #[serde(rename = "fullText")]
        full_text: String,
    },
    Error {
        error: String,
    },
}

/// Lifecycle of one exchange. `Completed`, `Errored` and `Superseded` are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Requesting,
    Streaming,
    Completed,
    Errored,
    Superseded,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Errored | Phase::Superseded)
    }
}

/// State for a single exchange: one completion request from issuance to its
/// terminal outcome. Transition methods return the client events to emit and
/// ignore anything that arrives after a terminal phase, so a late chunk from
/// a stale upstream handle can never produce a second terminal notification.
#[derive(Debug)]
pub struct Exchange {
    phase: Phase,
    segmenter: SentenceSegmenter,
    full_text: String,
    next_index: usize,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange {
    /// Created at the moment the upstream request is issued.
    pub fn new() -> Self {
        Exchange {
            phase: Phase::Requesting,
            segmenter: SentenceSegmenter::new(),
            full_text: String::new(),
            next_index: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// A token delta arrived. Returns completed sentences in index order.
    pub fn on_delta(&mut self, delta: &str) -> Vec<ClientEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.phase = Phase::Streaming;
        self.full_text.push_str(delta);
        self.segmenter
            .push(delta)
            .into_iter()
            .map(|text| self.sentence(text))
            .collect()
    }

    /// Upstream ended normally: flush the segmenter remainder, then report
    /// the full accumulated reply exactly once.
    pub fn on_done(&mut self) -> Vec<ClientEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.phase = Phase::Completed;
        let mut events = Vec::new();
        if let Some(tail) = self.segmenter.flush() {
            events.push(self.sentence(tail));
        }
        events.push(ClientEvent::Done {
            full_text: self.full_text.trim().to_string(),
        });
        events
    }

    /// A decode or transport failure: one terminal error notification.
    pub fn on_error(&mut self, error: &UpstreamError) -> Vec<ClientEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.phase = Phase::Errored;
        vec![ClientEvent::Error {
            error: error.to_string(),
        }]
    }

    /// A new exchange started or the connection closed before this one
    /// resolved. No notification is emitted for it, now or later.
    pub fn supersede(&mut self) {
        if !self.is_terminal() {
            self.phase = Phase::Superseded;
        }
    }

    fn sentence(&mut self, text: String) -> ClientEvent {
        let index = self.next_index;
        self.next_index += 1;
        ClientEvent::Sentence { text, index }
    }
}

/// Drives one persistent client connection. Owns the currently outstanding
/// upstream request, if any, and enforces at most one in flight: starting a
/// new exchange or closing the connection cancels the previous exchange task
/// and waits for it to stop, so none of its remaining notifications can
/// arrive afterwards.
pub struct SessionController {
    id: Uuid,
    client: Arc<UpstreamClient>,
    system_prompt: Option<String>,
    events: mpsc::Sender<ClientEvent>,
    active: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        client: Arc<UpstreamClient>,
        system_prompt: Option<String>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Self {
        SessionController {
            id: Uuid::new_v4(),
            client,
            system_prompt,
            events,
            active: None,
        }
    }

    /// Connection identity, also used as the upstream session tag.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle one raw inbound frame. An ill-formed frame yields a non-fatal
    /// error notification and leaves the session ready for the next message.
    pub async fn handle_frame(&mut self, raw: &str) {
        match serde_json::from_str::<ClientMessage>(raw) {
            Ok(ClientMessage::Text { text }) => self.start_exchange(text).await,
            Err(err) => {
                tracing::debug!(session = %self.id, error = %err, "rejecting inbound frame");
                self.reject_frame().await;
            }
        }
    }

    /// Emit the validation error for an unusable inbound frame.
    pub async fn reject_frame(&self) {
        let _ = self
            .events
            .send(ClientEvent::Error {
                error: "expected {\"type\": \"text\", \"text\": \"...\"}".to_string(),
            })
            .await;
    }

    /// Start a new exchange for one utterance, superseding any unresolved one.
    pub async fn start_exchange(&mut self, text: String) {
        self.cancel_active().await;
        let request = self.build_request(text);
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        let session = self.id;
        self.active = Some(tokio::spawn(async move {
            run_exchange(client, request, events, session).await;
        }));
    }

    /// The connection closed; cancel whatever is in flight.
    pub async fn close(&mut self) {
        self.cancel_active().await;
    }

    fn build_request(&self, text: String) -> CompletionRequest {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.push(Message::user(text));
        CompletionRequest::new(self.client.model(), messages)
            .streaming()
            .with_user(self.id.to_string())
    }

    /// Abort the in-flight exchange task and wait until it has actually
    /// stopped. A task caught mid-emission could otherwise still deliver its
    /// terminal notification after a newer exchange has begun. Aborting
    /// drops the upstream handle; the wait is only for the task itself, not
    /// for any upstream acknowledgment.
    async fn cancel_active(&mut self) {
        if let Some(handle) = self.active.take() {
            if !handle.is_finished() {
                tracing::debug!(session = %self.id, "superseding unresolved exchange");
            }
            handle.abort();
            // resolves immediately once the abort lands or the task is done
            let _ = handle.await;
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // last-resort cleanup; `close()` is the orderly path
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }
}

async fn run_exchange(
    client: Arc<UpstreamClient>,
    request: CompletionRequest,
    events: mpsc::Sender<ClientEvent>,
    session: Uuid,
) {
    let mut exchange = Exchange::new();

    let mut stream = match client.stream(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(session = %session, error = %err, "upstream request failed");
            emit(&events, exchange.on_error(&err)).await;
            return;
        }
    };

    while let Some(item) = stream.next().await {
        let out = match item {
            Ok(StreamEvent::Delta(delta)) => exchange.on_delta(&delta),
            Ok(StreamEvent::Done) => exchange.on_done(),
            Err(err) => {
                tracing::warn!(session = %session, error = %err, "upstream stream failed");
                exchange.on_error(&err)
            }
        };
        if !emit(&events, out).await {
            // client side is gone; nothing left to deliver
            return;
        }
        if exchange.phase().is_terminal() {
            return;
        }
    }

    // The decoder normally signals the end itself; if the stream ran dry
    // without it, close the exchange out as completed.
    emit(&events, exchange.on_done()).await;
}

async fn emit(events: &mpsc::Sender<ClientEvent>, batch: Vec<ClientEvent>) -> bool {
    for event in batch {
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}
