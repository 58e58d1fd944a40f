//! HTTP-level tests of the chat client against a mock chat API.

use std::time::Duration;

use datasmith_chat::{
    ChatApi, ChatConfig, ChatError, ChatSession, HttpChatApi, Inputs, RetryPolicy, TransportKind,
    TurnEnd, TurnEvent,
};
use datasmith_core::{MessageId, TaskId};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM: &str = concat!(
    "data: {\"event\":\"message\",\"answer\":\"Hel\",\"conversation_id\":\"c-1\",\"message_id\":\"m-1\",\"task_id\":\"t-1\"}\n\n",
    "data: {\"event\":\"ping\"}\n\n",
    "data: {\"event\":\"message\",\"answer\":\"lo\",\"conversation_id\":\"c-1\",\"message_id\":\"m-1\",\"task_id\":\"t-1\"}\n\n",
    "data: {\"event\":\"message_end\",\"conversation_id\":\"c-1\",\"message_id\":\"m-1\",\"metadata\":{\"usage\":{\"total_tokens\":12}}}\n\n",
);

fn config(server: &MockServer) -> ChatConfig {
    ChatConfig::new(format!("{}/v1", server.uri()), "app-key")
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn mount_stream(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(sse(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn streams_a_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(header("authorization", "Bearer app-key"))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .and(body_partial_json(json!({
            "query": "What is RPA?",
            "inputs": {},
            "user": "web-user",
            "response_mode": "streaming"
        })))
        .respond_with(sse(STREAM))
        .expect(1)
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("What is RPA?", Inputs::new(), &mut events).await;

    assert_eq!(outcome.end, TurnEnd::Completed);
    assert_eq!(outcome.text, "Hello");
    assert_eq!(outcome.message_id.unwrap().as_str(), "m-1");
    assert_eq!(session.conversation_id().unwrap().as_str(), "c-1");

    let texts: Vec<(String, bool)> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Text(t) => Some((t.text.clone(), t.is_complete)),
            _ => None,
        })
        .collect();
    assert_eq!(
        texts,
        vec![
            ("Hel".to_string(), false),
            ("Hello".to_string(), false),
            ("Hello".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn follow_up_turn_sends_conversation_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .and(body_partial_json(json!({"conversation_id": "c-1"})))
        .respond_with(sse(STREAM))
        .expect(1)
        .mount(&server)
        .await;
    mount_stream(&server, STREAM).await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    session.send("first", Inputs::new(), &mut events).await;
    let second = session.send("second", Inputs::new(), &mut events).await;
    assert_eq!(second.end, TurnEnd::Completed);
}

#[tokio::test]
async fn error_status_surfaces_server_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "invalid_param",
            "message": "Query is required",
            "status": 400
        })))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("", Inputs::new(), &mut events).await;

    assert_eq!(outcome.end, TurnEnd::Errored);
    assert_eq!(
        outcome.error,
        Some(ChatError::Remote {
            status: Some(400),
            code: Some("invalid_param".to_string()),
            message: "Query is required".to_string(),
        })
    );
    assert!(!session.is_loading());
    assert!(matches!(events.last(), Some(TurnEvent::Completed(_))));
}

#[tokio::test]
async fn error_status_falls_back_to_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("Hi", Inputs::new(), &mut events).await;

    assert!(matches!(
        outcome.error,
        Some(ChatError::Remote { status: Some(502), ref message, .. }) if message == "Bad Gateway"
    ));
}

#[tokio::test]
async fn stream_error_event_ends_turn() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        concat!(
            "data: {\"event\":\"message\",\"answer\":\"Partial\",\"task_id\":\"t-1\"}\n\n",
            "data: {\"event\":\"error\",\"status\":500,\"code\":\"completion_request_error\",\"message\":\"model overloaded\"}\n\n",
        ),
    )
    .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("Hi", Inputs::new(), &mut events).await;

    assert_eq!(outcome.end, TurnEnd::Errored);
    assert_eq!(outcome.text, "Partial");
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::RemoteError { text, .. } if text.is_empty())));
    assert_eq!(session.messages()[1].content(), "Partial");
}

#[tokio::test]
async fn routes_through_proxy() {
    let server = MockServer::start().await;
    let target = format!("{}/v1/chat-messages", server.uri());
    Mock::given(method("POST"))
        .and(path("/api/proxy"))
        .and(query_param("url", target.as_str()))
        .and(header("authorization", "Bearer app-key"))
        .respond_with(sse(STREAM))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.proxy_endpoint = Some(format!("{}/api/proxy", server.uri()));
    let session = ChatSession::new(config).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("Hi", Inputs::new(), &mut events).await;

    assert_eq!(outcome.text, "Hello");
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages"))
        .respond_with(sse(STREAM).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.request_timeout_seconds = 1;
    let session = ChatSession::new(config).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("Hi", Inputs::new(), &mut events).await;

    assert!(matches!(
        outcome.error,
        Some(ChatError::Transport {
            kind: TransportKind::Timeout,
            ..
        })
    ));
    assert!(!session.is_loading());
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = format!("http://{addr}/v1");

    let session = ChatSession::new(ChatConfig::new(base, "app-key")).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    let outcome = session.send("Hi", Inputs::new(), &mut events).await;

    assert_eq!(outcome.end, TurnEnd::Errored);
    assert!(matches!(
        outcome.error,
        Some(ChatError::Transport {
            kind: TransportKind::ConnectionRefused | TransportKind::Other,
            ..
        })
    ));
}

#[tokio::test]
async fn stop_posts_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages/t-1/stop"))
        .and(body_json(json!({"user": "web-user"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "success"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpChatApi::new(&config(&server)).unwrap();
    api.stop(&TaskId::new("t-1").unwrap(), "web-user").await.unwrap();
}

#[tokio::test]
async fn rejected_stop_is_best_effort_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat-messages/t-1/stop"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let api = HttpChatApi::new(&config(&server)).unwrap();
    let err = api
        .stop(&TaskId::new("t-1").unwrap(), "web-user")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::BestEffort(_)));
}

#[tokio::test]
async fn fetches_suggested_questions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-1/suggested"))
        .and(query_param("user", "web-user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": ["How long does an RPA rollout take?", "Which BI tools do you support?"]
        })))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let questions = session
        .fetch_suggested_questions(&MessageId::new("m-1").unwrap())
        .await;
    assert_eq!(questions.len(), 2);
}

#[tokio::test]
async fn malformed_suggestions_degrade_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-1/suggested"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-2/suggested"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Message Not Exists."})))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    assert!(session
        .fetch_suggested_questions(&MessageId::new("m-1").unwrap())
        .await
        .is_empty());
    assert!(session
        .fetch_suggested_questions(&MessageId::new("m-2").unwrap())
        .await
        .is_empty());
}

#[tokio::test]
async fn suggestions_retry_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-1/suggested"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-1/suggested"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "success",
            "data": ["Can you automate invoices?"]
        })))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let policy = RetryPolicy {
        max_retries: 2,
        delay_ms: 10,
    };
    let questions = session
        .fetch_suggested_questions_with_retry(&MessageId::new("m-1").unwrap(), policy)
        .await;
    assert_eq!(questions, vec!["Can you automate invoices?".to_string()]);
}

#[tokio::test]
async fn suggestions_are_not_retried_after_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/m-1/suggested"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Message Not Exists."})))
        .expect(1)
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let policy = RetryPolicy {
        max_retries: 2,
        delay_ms: 10,
    };
    let questions = session
        .fetch_suggested_questions_with_retry(&MessageId::new("m-1").unwrap(), policy)
        .await;
    assert!(questions.is_empty());
    server.verify().await;
}

#[tokio::test]
async fn fetches_conversation_history() {
    let server = MockServer::start().await;
    mount_stream(&server, STREAM).await;
    Mock::given(method("GET"))
        .and(path("/v1/conversations/c-1/messages"))
        .and(query_param("user", "web-user"))
        .and(query_param("limit", "20"))
        .and(header("authorization", "Bearer app-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "limit": 20,
            "has_more": false,
            "data": [{
                "id": "m-1",
                "conversation_id": "c-1",
                "query": "What is RPA?",
                "answer": "Hello",
                "created_at": 1_705_395_332
            }]
        })))
        .mount(&server)
        .await;

    let session = ChatSession::new(config(&server)).unwrap();
    let mut events: Vec<TurnEvent> = Vec::new();
    session.send("What is RPA?", Inputs::new(), &mut events).await;

    let page = session.conversation_history(20).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].answer, "Hello");
    assert!(!page.has_more);
}

#[tokio::test]
async fn history_error_is_returned() {
    let server = MockServer::start().await;
    let api = HttpChatApi::new(&config(&server)).unwrap();
    Mock::given(method("GET"))
        .and(path("/v1/conversations/c-404/messages"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"code": "not_found", "message": "Conversation Not Exists."})),
        )
        .mount(&server)
        .await;

    let err = api
        .conversation_messages(&"c-404".parse().unwrap(), "web-user", 20)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Remote { status: Some(404), .. }));
}
