//! Session facade the embedding viewer drives.
//!
//! One `Session` per API operation. It owns the generation and execution
//! state, mutates it only through named transitions, and publishes an
//! immutable [`SessionSnapshot`] over a watch channel after every mutation.
//! The viewer renders snapshots; it never touches the state directly.

use crate::domain::{CapturedExchange, TestCaseRecord};
use crate::engine::cancel::CancelRegistry;
use crate::engine::payload::build_generation_payload;
use crate::engine::run::{error_value, execute_test_impl};
use crate::engine::stream::{GenerationClient, GenerationConfig};
use crate::error::EngineError;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

/// Everything the viewer needs to render one operation's generated tests.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Arrival order, which is also display order.
    pub records: Vec<TestCaseRecord>,
    /// True while the generation POST itself is in flight.
    pub is_requesting: bool,
    /// True from generation start until terminal success or failure.
    pub is_streaming: bool,
    /// Terminal stream failure, if the last generation ended in one.
    pub generation_error: Option<String>,
    pub running_by_uuid: HashMap<String, bool>,
    pub response_by_uuid: HashMap<String, Value>,
}

#[derive(Default)]
struct SessionState {
    /// Id of the generation currently allowed to mutate this state.
    generation_id: Option<String>,
    records: Vec<TestCaseRecord>,
    is_requesting: bool,
    is_streaming: bool,
    generation_error: Option<String>,
    running_by_uuid: HashMap<String, bool>,
    response_by_uuid: HashMap<String, Value>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            records: self.records.clone(),
            is_requesting: self.is_requesting,
            is_streaming: self.is_streaming,
            generation_error: self.generation_error.clone(),
            running_by_uuid: self.running_by_uuid.clone(),
            response_by_uuid: self.response_by_uuid.clone(),
        }
    }
}

pub struct Session {
    state: Mutex<SessionState>,
    watch_tx: watch::Sender<SessionSnapshot>,
    client: Client,
    generator: GenerationClient,
    cancels: CancelRegistry,
}

impl Session {
    pub fn new(config: GenerationConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Shares `client` between the generation stream and test runs.
    pub fn with_client(client: Client, config: GenerationConfig) -> Self {
        let (watch_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            state: Mutex::new(SessionState::default()),
            watch_tx,
            generator: GenerationClient::new(client.clone(), config),
            client,
            cancels: CancelRegistry::new(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().unwrap().snapshot()
    }

    /// One snapshot per mutation; the viewer re-renders on change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.watch_tx.subscribe()
    }

    /// Starts a new generation for `exchange`, replacing any generation still
    /// in flight and clearing the previous record sequence.
    ///
    /// Resolves when the stream terminates; records show up on the snapshot
    /// as they arrive. Returns `Err` only for the missing-exchange
    /// precondition, which leaves the state untouched. Network and protocol
    /// failures become `generation_error` on the snapshot instead.
    pub async fn generate_tests(
        &self,
        exchange: Option<&CapturedExchange>,
        suite_name: &str,
    ) -> Result<(), EngineError> {
        let payload =
            build_generation_payload(exchange, suite_name, self.generator.machine_id())?;

        let generation_id = Uuid::new_v4().to_string();
        let cancel_rx = self.cancels.register(&generation_id);

        let superseded = self.update(|state| {
            let superseded = state.generation_id.replace(generation_id.clone());
            state.records.clear();
            state.generation_error = None;
            state.is_requesting = true;
            state.is_streaming = true;
            superseded
        });
        if let Some(prev) = superseded {
            self.cancels.cancel(&prev);
        }

        let mut stream = match self.generator.generate(&payload, cancel_rx).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!("generation request failed: {err}");
                self.finish_generation(&generation_id, Some(err.to_string()));
                return Ok(());
            }
        };

        // response headers are in; records may now trickle
        self.update_generation(&generation_id, |state| state.is_requesting = false);

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    self.update_generation(&generation_id, |state| state.records.push(record));
                }
                Err(err) => {
                    tracing::error!("generation stream failed: {err}");
                    self.finish_generation(&generation_id, Some(err.to_string()));
                    return Ok(());
                }
            }
        }

        self.finish_generation(&generation_id, None);
        Ok(())
    }

    /// Stops the in-flight generation, if any. Records already received stay.
    pub fn abort_generation(&self) {
        let aborted = self.update(|state| {
            let aborted = state.generation_id.take();
            if aborted.is_some() {
                state.is_requesting = false;
                state.is_streaming = false;
            }
            aborted
        });
        if let Some(id) = aborted {
            self.cancels.cancel(&id);
        }
    }

    /// Executes one generated test case. Fire-and-forget from the caller's
    /// point of view: every outcome, success or failure, lands in the
    /// snapshot keyed by the record's uuid, and one failing run never affects
    /// another.
    ///
    /// The running flag for the uuid is published before the network call
    /// starts, so the viewer can disable the trigger immediately. Re-running
    /// a uuid already in flight is the caller's mistake to avoid; if it
    /// happens anyway, the run that completes last wins the response slot.
    pub async fn run_test(&self, record: &TestCaseRecord) {
        let uuid = record.uuid.clone();

        self.update(|state| {
            state.running_by_uuid.insert(uuid.clone(), true);
        });

        let value = match execute_test_impl(&self.client, &record.request).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(uuid = %uuid, "test run failed: {err}");
                error_value(err.to_string())
            }
        };

        self.update(|state| {
            state.response_by_uuid.insert(uuid.clone(), value);
            state.running_by_uuid.insert(uuid, false);
        });
    }

    /// Applies one state transition and publishes the resulting snapshot.
    fn update<T>(&self, mutate: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let out = mutate(&mut state);
        let snapshot = state.snapshot();
        drop(state);
        self.watch_tx.send_replace(snapshot);
        out
    }

    /// Like `update`, but only while `generation_id` is still the current
    /// generation. A superseded or aborted generation must not touch state
    /// that now belongs to its successor.
    fn update_generation(&self, generation_id: &str, mutate: impl FnOnce(&mut SessionState)) {
        let mut state = self.state.lock().unwrap();
        if state.generation_id.as_deref() != Some(generation_id) {
            return;
        }
        mutate(&mut state);
        let snapshot = state.snapshot();
        drop(state);
        self.watch_tx.send_replace(snapshot);
    }

    fn finish_generation(&self, generation_id: &str, error: Option<String>) {
        self.update_generation(generation_id, |state| {
            state.generation_id = None;
            state.is_requesting = false;
            state.is_streaming = false;
            state.generation_error = error;
        });
        self.cancels.remove(generation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stream::{SOURCE_HEADER, STREAMING_PATH};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(base_url: String) -> Session {
        Session::new(GenerationConfig {
            base_url,
            machine_id: "docs-viewer".to_string(),
            source: "docs-viewer".to_string(),
        })
    }

    fn exchange(method: &str, url: &str, body: Option<&str>) -> CapturedExchange {
        CapturedExchange {
            method: method.to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: body.map(str::to_string),
        }
    }

    fn frame(uuid: &str, request: Value) -> String {
        let record = json!({
            "uuid": uuid,
            "description": format!("case {uuid}"),
            "request": request,
        });
        format!("event:test_case\ndata:{record}\n\n")
    }

    fn get_record(uuid: &str, url: String) -> TestCaseRecord {
        TestCaseRecord {
            uuid: uuid.to_string(),
            description: format!("case {uuid}"),
            request: crate::domain::TestRequest {
                method: "GET".to_string(),
                url,
                headers: HashMap::new(),
                json_body: None,
            },
        }
    }

    async fn mount_stream(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path(STREAMING_PATH))
            .and(header(SOURCE_HEADER, "docs-viewer"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn generation_appends_records_in_arrival_order() {
        let server = MockServer::start().await;
        let body = format!(
            "{}{}[DONE]\n\n",
            frame("t1", json!({"method": "GET", "url": "/a"})),
            frame("t2", json!({"method": "GET", "url": "/b"})),
        );
        mount_stream(&server, body).await;

        let session = session(server.uri());
        let exchange = exchange("GET", "/pets", None);
        session
            .generate_tests(Some(&exchange), "Pets")
            .await
            .unwrap();

        let snapshot = session.snapshot();
        let uuids: Vec<_> = snapshot.records.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(uuids, ["t1", "t2"]);
        assert!(!snapshot.is_streaming);
        assert!(!snapshot.is_requesting);
        assert!(snapshot.generation_error.is_none());
    }

    #[tokio::test]
    async fn missing_exchange_blocks_generation_and_leaves_state_alone() {
        let session = session("http://127.0.0.1:9".to_string());

        let result = session.generate_tests(None, "Pets").await;
        assert!(matches!(result, Err(EngineError::MissingExchange)));

        let snapshot = session.snapshot();
        assert!(snapshot.records.is_empty());
        assert!(!snapshot.is_streaming);
    }

    #[tokio::test]
    async fn generation_failure_becomes_error_state_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAMING_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let session = session(server.uri());
        let exchange = exchange("GET", "/pets", None);
        session
            .generate_tests(Some(&exchange), "Pets")
            .await
            .unwrap();

        let snapshot = session.snapshot();
        assert!(snapshot.records.is_empty());
        assert!(!snapshot.is_streaming);
        assert!(!snapshot.is_requesting);
        assert!(snapshot.generation_error.is_some());
    }

    #[tokio::test]
    async fn new_generation_clears_the_previous_sequence() {
        let server = MockServer::start().await;
        let body = format!(
            "{}[DONE]\n\n",
            frame("t1", json!({"method": "GET", "url": "/a"})),
        );
        mount_stream(&server, body).await;

        let session = session(server.uri());
        let exchange = exchange("GET", "/pets", None);
        session
            .generate_tests(Some(&exchange), "Pets")
            .await
            .unwrap();
        assert_eq!(session.snapshot().records.len(), 1);

        session
            .generate_tests(Some(&exchange), "Pets")
            .await
            .unwrap();
        // cleared, then repopulated by the second stream
        assert_eq!(session.snapshot().records.len(), 1);
        assert!(session.snapshot().generation_error.is_none());
    }

    #[tokio::test]
    async fn run_test_stores_the_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let session = session(server.uri());
        let record = get_record("t1", format!("{}/pets/1", server.uri()));

        session.run_test(&record).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.response_by_uuid.get("t1"), Some(&json!({"id": 1})));
        assert_eq!(snapshot.running_by_uuid.get("t1"), Some(&false));
    }

    #[tokio::test]
    async fn failed_run_stores_an_error_value_and_clears_running() {
        let session = session("http://127.0.0.1:9".to_string());
        // nothing listens on the record's own target either
        let record = get_record("t1", "http://127.0.0.1:9/pets".to_string());

        session.run_test(&record).await;

        let snapshot = session.snapshot();
        let stored = snapshot.response_by_uuid.get("t1").unwrap();
        assert!(stored.get("error").is_some());
        assert_eq!(snapshot.running_by_uuid.get("t1"), Some(&false));
    }

    #[tokio::test]
    async fn running_flag_covers_the_whole_inflight_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let session = Arc::new(session(server.uri()));
        let record = get_record("t1", format!("{}/slow", server.uri()));

        let task = {
            let session = Arc::clone(&session);
            let record = record.clone();
            tokio::spawn(async move { session.run_test(&record).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.snapshot().running_by_uuid.get("t1"), Some(&true));

        task.await.unwrap();
        assert_eq!(session.snapshot().running_by_uuid.get("t1"), Some(&false));
        assert_eq!(
            session.snapshot().response_by_uuid.get("t1"),
            Some(&json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn concurrent_runs_for_distinct_uuids_never_cross_contaminate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"from": "a"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "b"})))
            .mount(&server)
            .await;

        let session = session(server.uri());
        let first = get_record("t1", format!("{}/a", server.uri()));
        let second = get_record("t2", format!("{}/b", server.uri()));

        tokio::join!(session.run_test(&first), session.run_test(&second));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.response_by_uuid.get("t1"), Some(&json!({"from": "a"})));
        assert_eq!(snapshot.response_by_uuid.get("t2"), Some(&json!({"from": "b"})));
    }

    #[tokio::test]
    async fn runs_do_not_disturb_generation_flags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let session = session(server.uri());
        session
            .run_test(&get_record("t1", format!("{}/x", server.uri())))
            .await;

        let snapshot = session.snapshot();
        assert!(!snapshot.is_streaming);
        assert!(!snapshot.is_requesting);
    }

    #[tokio::test]
    async fn subscribers_see_a_snapshot_per_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let session = session(server.uri());
        let mut rx = session.subscribe();

        session
            .run_test(&get_record("t1", format!("{}/x", server.uri())))
            .await;

        rx.changed().await.unwrap();
        let latest = rx.borrow_and_update().clone();
        assert_eq!(latest.running_by_uuid.get("t1"), Some(&false));
    }

    #[tokio::test]
    async fn abort_clears_flags_without_recording_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAMING_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[DONE]\n\n")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let session = Arc::new(session(server.uri()));
        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let exchange = exchange("GET", "/pets", None);
                session.generate_tests(Some(&exchange), "Pets").await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.snapshot().is_streaming);
        session.abort_generation();

        task.await.unwrap().unwrap();
        let snapshot = session.snapshot();
        assert!(!snapshot.is_streaming);
        assert!(!snapshot.is_requesting);
        assert!(snapshot.generation_error.is_none());
    }

    // The worked end-to-end scenario: capture POST /pets, generate one test
    // case, run it against a live mock.
    #[tokio::test]
    async fn captured_post_generates_and_replays_a_pet_creation() {
        let server = MockServer::start().await;

        let body = format!(
            "{}[DONE]\n\n",
            frame(
                "t1",
                json!({
                    "method": "POST",
                    "url": format!("{}/pets", server.uri()),
                    "json_body": {"name": "Rex"},
                })
            ),
        );
        Mock::given(method("POST"))
            .and(path(STREAMING_PATH))
            .and(body_partial_json(json!({
                "api_info": {"json_body": {"name": "Rex"}},
                "test_suite_name": "Create pet",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/pets"))
            .and(body_string(r#"{"name":"Rex"}"#))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let session = session(server.uri());
        let exchange = exchange("POST", "/pets", Some(r#"{"name":"Rex"}"#));

        session
            .generate_tests(Some(&exchange), "Create pet")
            .await
            .unwrap();

        let record = session.snapshot().records[0].clone();
        assert_eq!(record.uuid, "t1");

        session.run_test(&record).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.response_by_uuid.get("t1"), Some(&json!({"id": 1})));
        assert_eq!(snapshot.running_by_uuid.get("t1"), Some(&false));
    }
}
