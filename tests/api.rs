mod common;

use common::*;
use flowcore::{
    api::AppState,
    execution::InMemoryExecutionStore,
    runtime::{Scheduler, WorkerPool},
    server::create_app,
    workflow::WorkflowRegistry,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

struct TestServer {
    base: String,
    client: reqwest::Client,
    _workers: WorkerPool,
}

impl TestServer {
    async fn start() -> Self {
        let registry = Arc::new(WorkflowRegistry::in_memory());
        registry
            .register(workflow(
                "chain",
                vec![
                    with_text(node("A", "append_1"), "${trigger:x}"),
                    with_text(node("B", "append_2"), "${node:A.y}"),
                ],
                &[("A", "B")],
            ))
            .unwrap();

        let executor = FakeExecutor::new()
            .with("append_1", Behavior::Append("_1"))
            .with("append_2", Behavior::Append("_2"));
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(executor),
            fast_config(),
        ));
        let workers = WorkerPool::spawn(Arc::clone(&scheduler), 2);

        let app = create_app(AppState {
            scheduler,
            registry,
            triggers: None,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            _workers: workers,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn wait_status(&self, execution_id: &str, status: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let body: Value = self
                .client
                .get(self.url(&format!("/api/executions/{}", execution_id)))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["status"] == status {
                return body;
            }
            assert!(tokio::time::Instant::now() < deadline, "last seen: {}", body);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn health_check_responds() {
    let server = TestServer::start().await;
    let body = server
        .client
        .get(server.url("/healthz"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn start_and_inspect_an_execution() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/api/workflows/chain/executions"))
        .json(&json!({ "trigger_data": { "x": "HELLO" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let id = body["execution_id"].as_str().unwrap().to_string();

    let execution = server.wait_status(&id, "COMPLETED").await;
    assert_eq!(execution["results"]["B"]["status"], "SUCCESS");
    assert_eq!(execution["results"]["B"]["result_data"], json!({"y": "HELLO_1_2"}));

    let inputs: Value = server
        .client
        .get(server.url(&format!("/api/executions/{}/inputs", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(inputs["inputs"], json!([]));

    let cancel: Value = server
        .client
        .post(server.url(&format!("/api/executions/{}/cancel", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancel["cancelled"], false);

    let retry = server
        .client
        .post(server.url(&format!("/api/executions/{}/retry", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(retry.status().as_u16(), 422);
}

#[tokio::test]
async fn webhook_starts_an_execution() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/webhook/chain/orders/new"))
        .json(&json!({ "x": "hook" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 202);
    let body: Value = response.json().await.unwrap();
    let id = body["execution_id"].as_str().unwrap().to_string();

    let execution = server.wait_status(&id, "COMPLETED").await;
    assert_eq!(execution["trigger_id"], "webhook:/orders/new");
    assert_eq!(execution["trigger_data"], json!({ "x": "hook" }));

    let bad = server
        .client
        .post(server.url("/webhook/chain/orders/new"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status().as_u16(), 400);
}

#[tokio::test]
async fn errors_map_to_statuses() {
    let server = TestServer::start().await;

    let missing = server
        .client
        .get(server.url("/api/executions/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let unknown_workflow = server
        .client
        .post(server.url("/api/workflows/nope/executions"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_workflow.status().as_u16(), 404);

    // In-memory registry has no storage to reload from
    let reload = server
        .client
        .post(server.url("/api/workflows/chain/reload"))
        .send()
        .await
        .unwrap();
    assert_eq!(reload.status().as_u16(), 422);
}
