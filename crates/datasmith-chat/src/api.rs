//! HTTP client for the conversational-AI API.
//!
//! [`ChatApi`] abstracts the four endpoints the session needs so that the
//! session can be driven by a scripted transport in tests. [`HttpChatApi`] is
//! the reqwest-backed implementation.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use datasmith_core::{ConversationId, MessageId, TaskId};
use futures::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response, Url};
use tracing::{debug, error, instrument};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result, TransportKind};
use crate::event::{
    ApiErrorResponse, ChatRequest, HistoryPage, StopRequest, SuggestedQuestionsResponse,
};

/// Body of a streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Trait for chat API communication.
///
/// This trait abstracts the transport, allowing for scripted
/// implementations in tests.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Start a streaming turn and return the response body.
    ///
    /// # Errors
    ///
    /// Returns a transport error if no response arrives in time, or a remote
    /// error carrying the server's detail on a non-success status.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;

    /// Ask the server to stop generating.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::BestEffort`] if the request fails.
    async fn stop(&self, task_id: &TaskId, user: &str) -> Result<()>;

    /// Fetch follow-up question suggestions for a finished message.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Remote`] if the server rejects the request, and
    /// [`ChatError::BestEffort`] on network failure or a malformed response.
    async fn suggested_questions(&self, message_id: &MessageId, user: &str) -> Result<Vec<String>>;

    /// Fetch a page of conversation history.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
        user: &str,
        limit: u32,
    ) -> Result<HistoryPage>;
}

/// HTTP client for the chat API.
///
/// Requests go straight to the API, or through a same-origin proxy as
/// `{proxy}?url=<target>` when one is configured.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    proxy: Option<Url>,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpChatApi {
    /// Create a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if the configuration is incomplete,
    /// the proxy endpoint is not a valid URL, or the HTTP client cannot be built.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Self::with_client(client, config)
    }

    /// Create a client with a custom reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if the configuration is invalid.
    pub fn with_client(client: reqwest::Client, config: &ChatConfig) -> Result<Self> {
        config.validate()?;
        let proxy = config
            .proxy_endpoint
            .as_deref()
            .map(|p| {
                Url::parse(p).map_err(|e| {
                    ChatError::Configuration(format!("invalid proxy endpoint {p}: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            api_key: config.api_key.clone(),
            proxy,
            request_timeout: config.request_timeout(),
            idle_timeout: config.stream_idle_timeout(),
        })
    }

    /// Get the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the URL actually requested for `path` (and query) on the API.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if the resulting URL is invalid.
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut target = Url::parse(&format!("{}{path}", self.base_url))
            .map_err(|e| ChatError::Configuration(format!("invalid API URL: {e}")))?;
        if !query.is_empty() {
            target.query_pairs_mut().extend_pairs(query);
        }

        match &self.proxy {
            Some(proxy) => {
                let mut url = proxy.clone();
                url.query_pairs_mut().append_pair("url", target.as_str());
                Ok(url)
            }
            None => Ok(target),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("X-Requested-With", "XMLHttpRequest")
    }

    /// Send a request, bounding the wait for response headers.
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        match tokio::time::timeout(self.request_timeout, self.authorized(builder).send()).await {
            Ok(result) => result.map_err(ChatError::from),
            Err(_) => Err(ChatError::transport(
                TransportKind::Timeout,
                format!("no response within {}s", self.request_timeout.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    #[instrument(skip_all, fields(conversation_id = ?request.conversation_id))]
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let url = self.endpoint("/chat-messages", &[])?;
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
                    .json(request),
            )
            .await?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        debug!(status = %response.status(), "Chat stream opened");
        Ok(with_idle_timeout(response.bytes_stream(), self.idle_timeout))
    }

    #[instrument(skip_all, fields(task_id = %task_id))]
    async fn stop(&self, task_id: &TaskId, user: &str) -> Result<()> {
        let url = self.endpoint(&format!("/chat-messages/{task_id}/stop"), &[])?;
        let response = self
            .send(self.client.post(url).json(&StopRequest { user }))
            .await
            .map_err(|e| ChatError::BestEffort(format!("stop request failed: {e}")))?;

        if response.status().is_success() {
            debug!(task_id = %task_id, "Stopped generation via chat API");
            Ok(())
        } else {
            let err = remote_error(response).await;
            Err(ChatError::BestEffort(format!("stop request rejected: {err}")))
        }
    }

    #[instrument(skip_all, fields(message_id = %message_id))]
    async fn suggested_questions(&self, message_id: &MessageId, user: &str) -> Result<Vec<String>> {
        let url = self.endpoint(
            &format!("/messages/{message_id}/suggested"),
            &[("user", user)],
        )?;
        let response = self
            .send(self.client.get(url))
            .await
            .map_err(|e| ChatError::BestEffort(format!("suggestion request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let body: SuggestedQuestionsResponse = response
            .json()
            .await
            .map_err(|e| ChatError::BestEffort(format!("malformed suggestion response: {e}")))?;
        match body.result.as_deref() {
            Some("success") | None => Ok(body.data),
            Some(other) => Err(ChatError::BestEffort(format!(
                "suggestion endpoint returned result {other}"
            ))),
        }
    }

    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
        user: &str,
        limit: u32,
    ) -> Result<HistoryPage> {
        let limit = limit.to_string();
        let url = self.endpoint(
            &format!("/conversations/{conversation_id}/messages"),
            &[("user", user), ("limit", &limit)],
        )?;
        let response = self.send(self.client.get(url)).await?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        response
            .json::<HistoryPage>()
            .await
            .map_err(|e| ChatError::Protocol(format!("failed to parse history: {e}")))
    }
}

/// Turn a non-success response into a remote error with the server's detail.
async fn remote_error(response: Response) -> ChatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<ApiErrorResponse>(&body).ok();

    let message = parsed
        .as_ref()
        .and_then(ApiErrorResponse::detail)
        .map(str::to_string)
        .or_else(|| {
            let raw = body.trim();
            (!raw.is_empty()).then(|| raw.to_string())
        })
        .unwrap_or_else(|| format!("server returned status {status}"));

    error!(status = %status, error = %message, "Chat API request failed");

    ChatError::Remote {
        status: Some(status.as_u16()),
        code: parsed.and_then(|p| p.code),
        message,
    }
}

/// Wrap a body so that a gap longer than `idle` between chunks fails the stream.
fn with_idle_timeout<S>(body: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let stream = futures::stream::unfold(
        (Box::pin(body), false),
        move |(mut body, failed)| async move {
            if failed {
                return None;
            }
            match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), (body, false))),
                Ok(Some(Err(e))) => Some((Err(ChatError::from(e)), (body, true))),
                Ok(None) => None,
                Err(_) => Some((
                    Err(ChatError::transport(
                        TransportKind::Timeout,
                        format!("no data received for {}s", idle.as_secs()),
                    )),
                    (body, true),
                )),
            }
        },
    );
    Box::pin(stream)
}
