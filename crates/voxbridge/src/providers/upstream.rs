use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use super::configs::UpstreamConfig;
use super::decode::{SseDecoder, StreamEvent};
use crate::models::CompletionRequest;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Transport(err.to_string())
    }
}

/// Client for the upstream completion service. Timeouts cover the full call,
/// so a stalled stream surfaces as a transport error.
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        )
    }

    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Single call and reply, no streaming. The reply text lives at
    /// `choices[0].message.content`.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, UpstreamError> {
        let response = self.post(request).await?;
        let body: Value = response.json().await?;
        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                UpstreamError::MalformedResponse(
                    "no message content in completion response".to_string(),
                )
            })
    }

    /// Issue a streaming completion. A non-success status before any data is
    /// read is returned as a single error; afterwards the stream yields token
    /// deltas terminated by exactly one `Done`, with transport failures
    /// surfacing as stream items.
    pub async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent, UpstreamError>>, UpstreamError> {
        let response = self.post(request).await?;
        let mut bytes = response.bytes_stream();

        let events = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            let mut finished = false;
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(UpstreamError::from)?;
                for event in decoder.feed(&chunk) {
                    finished = matches!(event, StreamEvent::Done);
                    yield event;
                }
                if finished {
                    break;
                }
            }
            if !finished {
                for event in decoder.finish() {
                    yield event;
                }
            }
        };

        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(host: String) -> UpstreamConfig {
        UpstreamConfig::new(host, "test-key".to_string(), "assistant/gpt-4o".to_string())
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("assistant/gpt-4o", vec![Message::user(text)])
    }

    #[tokio::test]
    async fn test_complete_extracts_reply_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "It is sunny."}}]
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(test_config(server.uri())).unwrap();
        let reply = client.complete(&request("weather?")).await.unwrap();
        assert_eq!(reply, "It is sunny.");
    }

    #[tokio::test]
    async fn test_complete_missing_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(test_config(server.uri())).unwrap();
        let err = client.complete(&request("hi")).await.unwrap_err();
        assert!(matches!(err, UpstreamError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(test_config(server.uri())).unwrap();
        match client.stream(&request("hi")).await {
            Ok(_) => panic!("expected status error, got a stream"),
            Err(UpstreamError::Status { code, body }) => {
                assert_eq!(code, 503);
                assert_eq!(body, "overloaded");
            }
            Err(other) => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_decodes_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"there.\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(test_config(server.uri())).unwrap();
        let mut stream = client.stream(&request("hi").streaming()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hi ".to_string()),
                StreamEvent::Delta("there.".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_end_without_sentinel_still_finishes() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(test_config(server.uri())).unwrap();
        let mut stream = client.stream(&request("hi").streaming()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("partial".to_string()),
                StreamEvent::Done,
            ]
        );
    }
}
