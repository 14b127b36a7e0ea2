//! Timer manager scenarios: publication gating, pause/resume and
//! execute-now.

mod common;

use std::sync::Arc;

use aiflow::runtime::{TimerManager, TimerStatus, WorkflowEngine};
use aiflow::workflow::types::{Node, NodeType, Workflow, WorkflowStatus};
use aiflow::workflow::WorkflowStorage;
use common::*;
use serde_json::json;

struct Fixture {
    storage: WorkflowStorage,
    manager: TimerManager,
    timer_node: Node,
}

async fn fixture() -> Fixture {
    let storage = WorkflowStorage::in_memory().await.unwrap();
    let chat = Arc::new(StubChatClient::returning("unused"));
    let engine = Arc::new(WorkflowEngine::new(storage.clone(), chat));
    let manager = TimerManager::new(storage.clone(), engine).await.unwrap();

    let timer_node = node("t1", NodeType::Timer, json!({"interval": 1, "timezone": "UTC"}));
    let mut workflow = Workflow {
        id: "w".to_string(),
        name: "Timed".to_string(),
        nodes: vec![timer_node.clone()],
        connections: vec![],
        status: WorkflowStatus::Draft,
        created_at: String::new(),
        updated_at: String::new(),
    };
    storage.upsert(&mut workflow).await.unwrap();

    Fixture { storage, manager, timer_node }
}

#[tokio::test]
async fn setup_is_gated_on_publication() {
    let fx = fixture().await;

    // Draft workflow: no timer gets armed.
    let message = fx.manager.setup_timer(&fx.timer_node, "w").await.unwrap();
    assert!(message.contains("draft"), "unexpected message: {}", message);
    assert!(fx.manager.list().await.is_empty());

    // Published: exactly one active timer with the derived id.
    fx.storage.set_status("w", WorkflowStatus::Published).await.unwrap();
    let message = fx.manager.setup_timer(&fx.timer_node, "w").await.unwrap();
    assert!(message.contains("created"), "unexpected message: {}", message);

    let timers = fx.manager.list().await;
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].id, "workflow_timer_w");
    assert_eq!(timers[0].workflow_id, "w");
    assert_eq!(timers[0].interval_minutes, 1);
    assert_eq!(timers[0].status, TimerStatus::Active);
    assert!(!timers[0].is_executing);

    // Unpublished again: setup deactivates the existing timer.
    fx.storage.set_status("w", WorkflowStatus::Draft).await.unwrap();
    let message = fx.manager.setup_timer(&fx.timer_node, "w").await.unwrap();
    assert!(message.contains("deactivated"), "unexpected message: {}", message);
    assert!(fx.manager.list().await.is_empty());
}

#[tokio::test]
async fn publish_side_effects_arm_and_disarm() {
    let fx = fixture().await;

    let workflow = fx
        .storage
        .set_status("w", WorkflowStatus::Published)
        .await
        .unwrap()
        .unwrap();
    let armed = fx.manager.arm_workflow_timers(&workflow).await.unwrap();
    assert_eq!(armed, 1);
    assert_eq!(fx.manager.list().await.len(), 1);

    fx.manager.deactivate_workflow_timers("w").await;
    assert!(fx.manager.list().await.is_empty());
}

#[tokio::test]
async fn pause_and_resume_flip_status() {
    let fx = fixture().await;
    fx.storage.set_status("w", WorkflowStatus::Published).await.unwrap();
    fx.manager.setup_timer(&fx.timer_node, "w").await.unwrap();

    fx.manager.pause("workflow_timer_w").await.unwrap();
    assert_eq!(fx.manager.list().await[0].status, TimerStatus::Paused);

    fx.manager.resume("workflow_timer_w").await.unwrap();
    assert_eq!(fx.manager.list().await[0].status, TimerStatus::Active);

    // Unknown timers are an error, not a crash.
    assert!(fx.manager.pause("workflow_timer_missing").await.is_err());
    assert!(fx.manager.resume("workflow_timer_missing").await.is_err());
}

#[tokio::test]
async fn execute_now_runs_the_workflow_once() {
    let fx = fixture().await;
    fx.storage.set_status("w", WorkflowStatus::Published).await.unwrap();
    fx.manager.setup_timer(&fx.timer_node, "w").await.unwrap();

    let result = fx.manager.execute_now("workflow_timer_w").await.unwrap();
    assert!(result.success, "run failed: {:?}", result.error);

    let pool = result.result.unwrap();
    assert_eq!(pool["t1"]["success"], true);
    assert_eq!(pool["t1"]["output"]["interval"], 1);
    assert_eq!(pool["t1"]["output"]["timezone"], "UTC");

    // The schedule itself is untouched.
    let timers = fx.manager.list().await;
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].status, TimerStatus::Active);
}
