//! End-to-end engine scenarios: linear pipelines, conditional GOTO cycles,
//! join fan-in and loop fan-out over sub-workflows.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aiflow::runtime::executors::{webhook, NodeContext};
use aiflow::workflow::types::{NodeType, WorkflowExecuteRequest};
use common::*;
use serde_json::{json, Map};

#[tokio::test]
async fn linear_pipeline_threads_results_through_templates() {
    let chat = Arc::new(StubChatClient::returning("world"));
    let engine = test_engine(chat.clone()).await;

    let request = WorkflowExecuteRequest {
        nodes: vec![
            labeled_node(
                "a",
                "A",
                NodeType::Gigachat,
                json!({"userMessage": "Hello", "authToken": "t"}),
            ),
            node(
                "b",
                NodeType::Email,
                json!({"to": "ops@example.com", "subject": "{{A.text}}", "body": "from {{A.meta.id_node}}"}),
            ),
        ],
        connections: vec![edge("e1", "a", "b")],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({})).await;
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    assert_eq!(pool["a"]["text"], "world");
    assert_eq!(pool["a"]["meta"]["id_node"], "a");
    assert_eq!(pool["b"]["sent"], true);
    assert_eq!(pool["b"]["subject"], "world");
    assert_eq!(chat.call_count(), 1);
    assert!(!result.logs.is_empty());
}

#[tokio::test]
async fn webhook_request_is_built_from_prior_results() {
    let chat = Arc::new(StubChatClient::returning("unused"));
    let engine = test_engine(chat).await;

    let mut pool = Map::new();
    pool.insert(
        "a".to_string(),
        json!({"text": "world", "meta": {"id_node": "A"}}),
    );
    let labels = std::collections::HashMap::from([("A".to_string(), "a".to_string())]);
    let input = json!({});
    let ctx = NodeContext {
        engine: engine.as_ref(),
        label_to_id: &labels,
        input: &input,
        results: &pool,
    };

    let hook = node(
        "b",
        NodeType::Webhook,
        json!({
            "url": "https://h/{{A.meta.id_node}}",
            "bodyTemplate": "{\"t\": \"{{A.text}}\"}",
        }),
    );

    let (url, payload) = webhook::prepare_request(&hook, &ctx).unwrap();
    assert_eq!(url, "https://h/A");
    assert_eq!(payload.unwrap(), json!({"t": "world"}));
}

#[tokio::test]
async fn goto_cycle_terminates_when_condition_flips() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    // Each call "increments" by answering with the next value of n.
    let chat = Arc::new(StubChatClient::with_handler(move |_, _| {
        let n = counter_clone.fetch_add(1, Ordering::SeqCst) + 1;
        ok_response(&format!("{{\"n\": {}}}", n))
    }));
    let engine = test_engine(chat.clone()).await;

    let request = WorkflowExecuteRequest {
        nodes: vec![
            node("start", NodeType::WebhookTrigger, json!({})),
            node(
                "check",
                NodeType::IfElse,
                json!({
                    "conditionType": "not_equals",
                    "fieldPath": "Inc.json.n",
                    "compareValue": "3",
                    "maxGotoIterations": 5,
                }),
            ),
            labeled_node("inc", "Inc", NodeType::Gigachat, json!({"userMessage": "tick", "authToken": "t"})),
            node("end", NodeType::Email, json!({"to": "done@example.com", "subject": "n={{Inc.json.n}}"})),
        ],
        connections: vec![
            edge("e1", "start", "check"),
            labeled_edge("e2", "check", "inc", "true:goto"),
            edge("e3", "inc", "check"),
            labeled_edge("e4", "check", "end", "false"),
        ],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({})).await;
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    assert_eq!(pool["inc"]["json"]["n"], 3);
    assert_eq!(pool["end"]["sent"], true);
    assert_eq!(pool["end"]["subject"], "n=3");
    // Three goto jumps: n went 1, 2, 3.
    assert_eq!(chat.call_count(), 3);
}

#[tokio::test]
async fn goto_overflow_aborts_the_run() {
    let chat = Arc::new(StubChatClient::returning("{\"n\": 0}"));
    let engine = test_engine(chat).await;

    let request = WorkflowExecuteRequest {
        nodes: vec![
            node("start", NodeType::WebhookTrigger, json!({})),
            node(
                "check",
                NodeType::IfElse,
                json!({
                    "conditionType": "not_equals",
                    "fieldPath": "Inc.json.n",
                    "compareValue": "999",
                    "maxGotoIterations": 2,
                }),
            ),
            labeled_node("inc", "Inc", NodeType::Gigachat, json!({"userMessage": "tick", "authToken": "t"})),
            node("end", NodeType::Email, json!({"to": "x@example.com"})),
        ],
        connections: vec![
            edge("e1", "start", "check"),
            labeled_edge("e2", "check", "inc", "true:goto"),
            edge("e3", "inc", "check"),
            labeled_edge("e4", "check", "end", "false"),
        ],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({})).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("GOTO limit (2) exceeded"), "unexpected error: {}", error);
    // Partial pool stays inspectable.
    assert!(result.result.is_some());
}

#[tokio::test]
async fn join_waits_for_all_branches_and_splits_common_fields() {
    let chat = Arc::new(StubChatClient::returning("unused"));
    let engine = test_engine(chat).await;

    let passthrough = |id: &str| {
        node(
            id,
            NodeType::IfElse,
            json!({"conditionType": "exists", "fieldPath": "output.user"}),
        )
    };

    let request = WorkflowExecuteRequest {
        nodes: vec![
            node("start", NodeType::WebhookTrigger, json!({})),
            passthrough("a"),
            passthrough("b"),
            node("join", NodeType::Join, json!({"mergeStrategy": "merge_json"})),
        ],
        connections: vec![
            edge("e1", "start", "a"),
            edge("e2", "start", "b"),
            edge("e3", "a", "join"),
            edge("e4", "b", "join"),
        ],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({"user": "alice"})).await;
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    let join = &pool["join"];

    // Fired exactly once, after both sources reported.
    assert_eq!(join["join_result"]["metadata"]["source_count"], 2);
    // Identical fields are promoted to the top level.
    assert_eq!(join["output"]["source_count"], 2);
    assert_eq!(join["success"], true);
    assert_eq!(join["branch"], "true");
    // The per-source uniques carry what differed between the branches.
    assert_eq!(join["join_result"]["sources"]["a"]["if_else_result"]["node_id"], "a");
    assert_eq!(join["join_result"]["sources"]["b"]["if_else_result"]["node_id"], "b");
}

#[tokio::test]
async fn loop_runs_sub_workflow_per_item_in_parallel() {
    // The echo sub-workflow multiplies its item by ten.
    let chat = Arc::new(StubChatClient::with_handler(|_, user| {
        let n: i64 = user.trim().parse().unwrap_or(0);
        ok_response(&(n * 10).to_string())
    }));
    let engine = test_engine(chat).await;

    save_workflow(
        &engine,
        "echo_wf",
        vec![node("echo", NodeType::Gigachat, json!({"userMessage": "{{input.item}}", "authToken": "t"}))],
        vec![],
    )
    .await;

    let request = WorkflowExecuteRequest {
        nodes: vec![
            node("start", NodeType::WebhookTrigger, json!({})),
            node(
                "loop1",
                NodeType::Loop,
                json!({
                    "inputArrayPath": "output.items",
                    "subWorkflowId": "echo_wf",
                    "executionMode": "parallel",
                    "maxConcurrent": 2,
                }),
            ),
        ],
        connections: vec![edge("e1", "start", "loop1")],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({"items": [1, 2, 3, 4, 5]})).await;
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    let loop_result = &pool["loop1"];
    let results = loop_result["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    for (i, item_result) in results.iter().enumerate() {
        assert_eq!(item_result["index"], i);
        assert_eq!(item_result["success"], true);
        assert_eq!(item_result["result"]["echo"]["json"], (i as i64 + 1) * 10);
    }
    assert_eq!(loop_result["summary"]["total"], 5);
    assert_eq!(loop_result["summary"]["success_count"], 5);
    assert_eq!(loop_result["summary"]["error_count"], 0);
}

#[tokio::test]
async fn loop_skip_errors_records_failures_and_continues() {
    let chat = Arc::new(StubChatClient::with_handler(|_, user| {
        if user.trim() == "3" {
            aiflow::llm::ChatResponse::failure("boom")
        } else {
            ok_response(user.trim())
        }
    }));
    let engine = test_engine(chat).await;

    save_workflow(
        &engine,
        "echo_wf",
        vec![node("echo", NodeType::Gigachat, json!({"userMessage": "{{input.item}}", "authToken": "t"}))],
        vec![],
    )
    .await;

    let loop_node = |skip: bool| WorkflowExecuteRequest {
        nodes: vec![
            node("start", NodeType::WebhookTrigger, json!({})),
            node(
                "loop1",
                NodeType::Loop,
                json!({
                    "inputArrayPath": "output.items",
                    "subWorkflowId": "echo_wf",
                    "skipErrors": skip,
                }),
            ),
        ],
        connections: vec![edge("e1", "start", "loop1")],
        start_node_id: None,
        input: None,
    };

    // skipErrors=true: per-item failure is recorded, the run continues.
    let result = engine.execute(loop_node(true), json!({"items": [1, 2, 3, 4]})).await;
    assert!(result.success, "run failed: {:?}", result.error);
    let pool = result.result.unwrap();
    assert_eq!(pool["loop1"]["summary"]["success_count"], 3);
    assert_eq!(pool["loop1"]["summary"]["error_count"], 1);
    assert_eq!(pool["loop1"]["results"][2]["success"], false);

    // skipErrors=false: the failure propagates to the parent run.
    let result = engine.execute(loop_node(false), json!({"items": [1, 2, 3, 4]})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Loop item 2 failed"));
}

#[tokio::test]
async fn duplicate_labels_fail_validation_before_execution() {
    let chat = Arc::new(StubChatClient::returning("unused"));
    let engine = test_engine(chat.clone()).await;

    let request = WorkflowExecuteRequest {
        nodes: vec![
            labeled_node("a", "Same", NodeType::WebhookTrigger, json!({})),
            labeled_node("b", "Same", NodeType::Email, json!({"to": "x@example.com"})),
        ],
        connections: vec![edge("e1", "a", "b")],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({})).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Duplicate node label"));
    // Nothing ran.
    assert_eq!(chat.call_count(), 0);
    assert!(result.result.unwrap().is_empty());
}

#[tokio::test]
async fn start_node_selection_prefers_startable_without_incoming_edges() {
    let chat = Arc::new(StubChatClient::returning("unused"));
    let engine = test_engine(chat).await;

    // The email node comes first in declaration order but is not startable.
    let request = WorkflowExecuteRequest {
        nodes: vec![
            node("mail", NodeType::Email, json!({"to": "x@example.com", "subject": "s"})),
            node("start", NodeType::WebhookTrigger, json!({})),
        ],
        connections: vec![edge("e1", "start", "mail")],
        start_node_id: None,
        input: None,
    };

    let result = engine.execute(request, json!({"seed": 1})).await;
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    assert_eq!(pool["start"]["output"]["seed"], 1);
    assert_eq!(pool["mail"]["sent"], true);
}

#[tokio::test]
async fn node_status_buffer_is_read_and_cleared() {
    let chat = Arc::new(StubChatClient::returning("hi"));
    let engine = test_engine(chat).await;

    let request = WorkflowExecuteRequest {
        nodes: vec![node("a", NodeType::Gigachat, json!({"userMessage": "q", "authToken": "t"}))],
        connections: vec![],
        start_node_id: None,
        input: None,
    };
    let result = engine.execute(request, json!({})).await;
    assert!(result.success);

    let ids = vec!["a".to_string(), "missing".to_string()];
    let first = engine.take_node_results(&ids).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first["a"]["text"], "hi");

    // A second read comes back empty.
    let second = engine.take_node_results(&ids).await;
    assert!(second.is_empty());
}
