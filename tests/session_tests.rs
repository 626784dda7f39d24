//! End-to-end turn scenarios: chat creation, streaming reconciliation,
//! commit-and-persist ordering, and the dual-response flow.

use docchat::{
    ApiClient, ChatSession, Choice, ClientError, Message, RenderEvent, RenderSink, Role,
    SessionConfig, TurnOutcome,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_for(server: &MockServer, config: SessionConfig) -> (ChatSession, UnboundedReceiver<RenderEvent>) {
    let client = ApiClient::builder(server.uri()).token("test-token").build();
    let (sink, events) = RenderSink::channel();
    (ChatSession::new(client, sink, config), events)
}

fn single_mode() -> SessionConfig {
    SessionConfig {
        dual_enabled: false,
        dual_probability: 0.0,
    }
}

fn dual_mode() -> SessionConfig {
    SessionConfig {
        dual_enabled: true,
        dual_probability: 1.0,
    }
}

async fn mount_chat_creation(server: &MockServer, chat_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"chat_id": chat_id})))
        .mount(server)
        .await;
}

async fn mount_message_ack(server: &MockServer, chat_id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/api/chats/{chat_id}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(server)
        .await;
}

async fn mount_reply(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/plain"))
        .mount(server)
        .await;
}

fn requests_to<'a>(requests: &'a [wiremock::Request], route: &str) -> Vec<&'a wiremock::Request> {
    requests.iter().filter(|r| r.url.path() == route).collect()
}

fn system_messages(events: &mut UnboundedReceiver<RenderEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RenderEvent::MessageCreated {
            role: Role::System,
            content,
            ..
        } = event
        {
            out.push(content);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Single-response turns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_turn_creates_chat_streams_reply_and_persists_in_order() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    mount_reply(&server, "Rest and hydrate.__MESSAGE_ID__:m1\n__SIGNATURE__:s1").await;

    let (mut session, _events) = session_for(&server, single_mode());
    let outcome = session.submit_turn("I have a headache").await.unwrap();

    let settled = match outcome {
        TurnOutcome::Completed(message) => message,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(settled.content, "Rest and hydrate.");
    assert_eq!(settled.message_id.as_deref(), Some("m1"));
    assert_eq!(settled.signature.as_deref(), Some("s1"));

    assert_eq!(session.chat_id(), Some("c1"));
    assert!(!session.is_new());
    assert_eq!(session.title(), "I have a headache");
    assert_eq!(session.conversation().len(), 2);
    assert_eq!(session.pending_count(), 0);

    let requests = server.received_requests().await.unwrap();

    // Chat creation carried the title.
    let create: serde_json::Value = requests_to(&requests, "/api/chats")[0].body_json().unwrap();
    assert_eq!(create["title"], "I have a headache");

    // User message persisted before the stream, assistant after, in order.
    let persisted: Vec<serde_json::Value> = requests_to(&requests, "/api/chats/c1/messages")
        .iter()
        .map(|r| r.body_json().unwrap())
        .collect();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0]["message"]["role"], "user");
    assert_eq!(persisted[0]["message"]["content"], "I have a headache");
    assert_eq!(persisted[1]["message"]["role"], "assistant");
    assert_eq!(persisted[1]["message"]["content"], "Rest and hydrate.");
    assert_eq!(persisted[1]["message"]["message_id"], "m1");
    assert_eq!(persisted[1]["message"]["signature"], "s1");

    // The streamed request carried the full conversation so far.
    let streamed: serde_json::Value = requests_to(&requests, "/api/chat")[0].body_json().unwrap();
    assert_eq!(streamed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn long_first_message_truncates_the_chat_title() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    mount_reply(&server, "Noted.").await;

    let (mut session, _events) = session_for(&server, single_mode());
    let text = "My left shoulder has been aching badly for two weeks now";
    session.submit_turn(text).await.unwrap();

    assert_eq!(session.title(), "My left shoulder has been achi...");
    let requests = server.received_requests().await.unwrap();
    let create: serde_json::Value = requests_to(&requests, "/api/chats")[0].body_json().unwrap();
    assert_eq!(create["title"], "My left shoulder has been achi...");
}

#[tokio::test]
async fn empty_input_is_ignored_with_no_requests() {
    let server = MockServer::start().await;
    let (mut session, _events) = session_for(&server, single_mode());

    let outcome = session.submit_turn("   ").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Ignored));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn chat_creation_failure_aborts_with_a_system_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mut session, mut events) = session_for(&server, single_mode());
    let outcome = session.submit_turn("hello").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Aborted));
    // The user message stays visible in the transcript but nothing
    // persisted and no generation started.
    assert_eq!(session.conversation().len(), 1);
    assert_eq!(session.pending_count(), 1);
    assert!(session.chat_id().is_none());

    let system = system_messages(&mut events);
    assert_eq!(
        system,
        vec!["Error: Could not create a new chat. Please try again."]
    );

    let requests = server.received_requests().await.unwrap();
    assert!(requests_to(&requests, "/api/chat").is_empty());
}

#[tokio::test]
async fn rejected_credential_propagates_out_of_the_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (mut session, _events) = session_for(&server, single_mode());
    let err = session.submit_turn("hello").await.unwrap_err();
    assert!(err.is_unauthenticated());
}

#[tokio::test]
async fn stream_failure_renders_the_server_detail_and_aborts() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "Model exploded"})))
        .mount(&server)
        .await;

    let (mut session, mut events) = session_for(&server, single_mode());
    let outcome = session.submit_turn("hello").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Aborted));
    // Only the user message is in the transcript; it was already persisted.
    assert_eq!(session.conversation().len(), 1);
    assert_eq!(session.pending_count(), 0);
    assert_eq!(system_messages(&mut events), vec!["Error: Model exploded"]);
}

#[tokio::test]
async fn persistence_failure_completes_the_turn_and_keeps_messages_queued() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    Mock::given(method("POST"))
        .and(path("/api/chats/c1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_reply(&server, "Noted.").await;

    let (mut session, mut events) = session_for(&server, single_mode());
    let outcome = session.submit_turn("hello").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    // Both messages committed to the transcript, both still pending.
    assert_eq!(session.conversation().len(), 2);
    assert_eq!(session.pending_count(), 2);
    // Persistence trouble is never surfaced to the user.
    assert!(system_messages(&mut events).is_empty());
}

// ---------------------------------------------------------------------------
// Chat lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_chat_replaces_state_and_skips_system_messages_in_render() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats/c9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "Checkup",
            "messages": [
                {"role": "system", "content": "You are a medical assistant."},
                {"role": "user", "content": "I have a cough"},
                {"role": "assistant", "content": "How long has it lasted?"}
            ]
        })))
        .mount(&server)
        .await;

    let (mut session, mut events) = session_for(&server, single_mode());
    session.load_chat("c9").await.unwrap();

    assert_eq!(session.chat_id(), Some("c9"));
    assert_eq!(session.title(), "Checkup");
    assert!(!session.is_new());
    assert_eq!(session.conversation().len(), 3);
    assert_eq!(session.pending_count(), 0);

    assert!(matches!(
        events.try_recv().unwrap(),
        RenderEvent::TranscriptCleared
    ));
    let mut rendered = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RenderEvent::MessageCreated { role, content, .. } = event {
            rendered.push((role, content));
        }
    }
    assert_eq!(
        rendered,
        vec![
            (Role::User, "I have a cough".to_string()),
            (Role::Assistant, "How long has it lasted?".to_string()),
        ]
    );
}

#[tokio::test]
async fn load_chat_resets_the_pending_queue_unconditionally() {
    let server = MockServer::start().await;
    // Chat creation succeeds but persists fail, leaving the queue populated.
    mount_chat_creation(&server, "c1").await;
    Mock::given(method("POST"))
        .and(path("/api/chats/c1/messages"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_reply(&server, "Noted.").await;
    Mock::given(method("GET"))
        .and(path("/api/chats/c9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "Other",
            "messages": []
        })))
        .mount(&server)
        .await;

    let (mut session, _events) = session_for(&server, single_mode());
    session.submit_turn("hello").await.unwrap();
    assert_eq!(session.pending_count(), 2);

    session.load_chat("c9").await.unwrap();
    assert_eq!(session.pending_count(), 0);
    assert!(session.conversation().is_empty());
}

// ---------------------------------------------------------------------------
// Dual-response flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dual_round_with_one_failure_returns_the_survivor_without_a_choice() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    // One of the two concurrent generations fails, the other succeeds.
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_reply(&server, "See a doctor.__MESSAGE_ID__:m2\n__SIGNATURE__:s2").await;

    let (mut session, mut events) = session_for(&server, dual_mode());
    let outcome = session.submit_turn("Should I worry?").await.unwrap();

    let settled = match outcome {
        TurnOutcome::Completed(message) => message,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(settled.content, "See a doctor.");
    assert_eq!(settled.message_id.as_deref(), Some("m2"));

    // No choice was presented and no feedback was submitted.
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, RenderEvent::ChoiceRequested(_)),
            "survivor path must not prompt for a choice"
        );
    }
    let requests = server.received_requests().await.unwrap();
    assert!(requests_to(&requests, "/api/feedback/pairwise").is_empty());
}

#[tokio::test]
async fn dual_round_with_both_failures_falls_back_to_a_single_generation() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_reply(&server, "Rest and hydrate.__MESSAGE_ID__:m1\n__SIGNATURE__:s1").await;

    let (mut session, _events) = session_for(&server, dual_mode());
    let outcome = session.submit_turn("What should I do?").await.unwrap();

    let settled = match outcome {
        TurnOutcome::Completed(message) => message,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(settled.content, "Rest and hydrate.");

    // Two failed candidates plus the fallback generation.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/api/chat").len(), 3);
}

#[tokio::test]
async fn dual_round_choice_commits_the_picked_candidate_and_submits_feedback() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "Answer Alpha.__MESSAGE_ID__:ma\n__SIGNATURE__:sa".as_bytes().to_vec(),
            "text/plain",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_reply(&server, "Answer Beta.__MESSAGE_ID__:mb\n__SIGNATURE__:sb").await;
    Mock::given(method("POST"))
        .and(path("/api/feedback/pairwise"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let (mut session, mut events) = session_for(&server, dual_mode());

    let turn = session.submit_turn("Which is it?");
    let responder = async {
        loop {
            match events.recv().await.expect("events stay open") {
                RenderEvent::ChoiceRequested(prompt) => {
                    let picked = prompt.candidate_b.clone();
                    let rejected = prompt.candidate_a.clone();
                    prompt.responder.send(Choice::CandidateB).unwrap();
                    return (picked, rejected);
                }
                _ => continue,
            }
        }
    };
    let (outcome, (picked, rejected)) = tokio::join!(turn, responder);

    let settled = match outcome.unwrap() {
        TurnOutcome::Completed(message) => message,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(settled.content, picked);
    assert_eq!(session.conversation().len(), 2);
    assert_eq!(session.pending_count(), 0);

    let requests = server.received_requests().await.unwrap();
    let feedback: serde_json::Value =
        requests_to(&requests, "/api/feedback/pairwise")[0].body_json().unwrap();
    assert_eq!(feedback["prompt"], "Which is it?");
    assert_eq!(feedback["chosen_response"], picked.as_str());
    assert_eq!(feedback["rejected_response"], rejected.as_str());
    assert_eq!(feedback["chat_id"], "c1");

    // The committed assistant message was persisted.
    let persisted: Vec<serde_json::Value> = requests_to(&requests, "/api/chats/c1/messages")
        .iter()
        .map(|r| r.body_json().unwrap())
        .collect();
    assert_eq!(persisted.last().unwrap()["message"]["content"], picked.as_str());
}

#[tokio::test]
async fn abandoning_the_choice_commits_nothing() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    mount_reply(&server, "Same answer.__MESSAGE_ID__:m\n__SIGNATURE__:s").await;

    let (mut session, mut events) = session_for(&server, dual_mode());

    let turn = session.submit_turn("hello");
    let abandoner = async {
        loop {
            match events.recv().await.expect("events stay open") {
                // Dropping the prompt drops the responder with it.
                RenderEvent::ChoiceRequested(prompt) => {
                    drop(prompt);
                    return;
                }
                _ => continue,
            }
        }
    };
    let (outcome, ()) = tokio::join!(turn, abandoner);

    assert!(matches!(outcome.unwrap(), TurnOutcome::Abandoned));
    // Only the user message was committed; no feedback was sent.
    assert_eq!(session.conversation().len(), 1);
    assert_eq!(session.pending_count(), 0);
    let requests = server.received_requests().await.unwrap();
    assert!(requests_to(&requests, "/api/feedback/pairwise").is_empty());
}

#[tokio::test]
async fn feedback_submission_failure_does_not_undo_the_choice() {
    let server = MockServer::start().await;
    mount_chat_creation(&server, "c1").await;
    mount_message_ack(&server, "c1").await;
    mount_reply(&server, "Answer.__MESSAGE_ID__:m\n__SIGNATURE__:s").await;
    Mock::given(method("POST"))
        .and(path("/api/feedback/pairwise"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mut session, mut events) = session_for(&server, dual_mode());

    let turn = session.submit_turn("hello");
    let responder = async {
        loop {
            match events.recv().await.expect("events stay open") {
                RenderEvent::ChoiceRequested(prompt) => {
                    prompt.responder.send(Choice::CandidateA).unwrap();
                    return;
                }
                _ => continue,
            }
        }
    };
    let (outcome, ()) = tokio::join!(turn, responder);

    let settled = match outcome.unwrap() {
        TurnOutcome::Completed(message) => message,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(settled.content, "Answer.");
    assert_eq!(session.conversation().len(), 2);
}

// ---------------------------------------------------------------------------
// Error taxonomy at the session boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_chat_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Chat not found"})))
        .mount(&server)
        .await;

    let (mut session, _events) = session_for(&server, single_mode());
    let err = session.load_chat("missing").await.unwrap_err();
    match err {
        ClientError::Api(detail) => assert_eq!(detail, "Chat not found"),
        other => panic!("expected Api, got {other:?}"),
    }
}
