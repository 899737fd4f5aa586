use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use flowdeck_core::config::EditorConfig;
use flowdeck_core::traits::{EventSource, WorkflowApi};
use flowdeck_core::types::*;
use flowdeck_core::validate::validate;
use flowdeck_core::{EventBus, FlowdeckError};
use flowdeck_editor::{CanvasController, EditorOrchestrator, GraphModel, Point, Submission};
use flowdeck_test_utils::{sample_document, MockWorkflowApi, Script, ScriptedEventSource, StreamEnd};

fn editor(api: Arc<dyn WorkflowApi>, source: Arc<dyn EventSource>) -> Arc<EditorOrchestrator> {
    Arc::new(EditorOrchestrator::new(
        api,
        source,
        Arc::new(EventBus::default()),
        EditorConfig::default(),
    ))
}

fn node(kind: EventKind, id: &str) -> ExecutionEvent {
    ExecutionEvent::for_node(kind, id)
}

fn drain(rx: &mut broadcast::Receiver<EditorEvent>) -> Vec<EditorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Formatted log output, shared with the subscriber that writes it.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

async fn status_of(editor: &EditorOrchestrator, id: &str) -> NodeStatus {
    editor.snapshot().await.graph.node(id).unwrap().status
}

#[test]
fn single_dropped_node_makes_a_valid_document() {
    let mut graph = GraphModel::new();
    let mut canvas = CanvasController::new();
    canvas.begin_drag(AgentDescriptor::new("echo", "Echo"));
    canvas.drop_at(&mut graph, Point::new(10.0, 20.0), Point::new(0.0, 0.0));

    let mut doc = WorkflowDocument::new("demo_1", "Demo");
    doc.nodes = graph.nodes().to_vec();

    let report = validate(&doc);
    assert!(report.is_valid, "{:?}", report.errors);
    assert_eq!(doc.nodes[0].position, Position::new(10.0, 20.0));
}

#[test]
fn removing_source_node_drops_its_connection() {
    let mut graph = GraphModel::new();
    let a = graph.add_node("a", Position::new(0.0, 0.0), empty_config());
    let b = graph.add_node("b", Position::new(100.0, 0.0), empty_config());
    graph.add_connection(&a.id, &b.id, "success").unwrap();

    graph.remove_node(&a.id);
    assert!(graph.connections().is_empty());
}

#[tokio::test]
async fn save_execute_observe_complete() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();
    let mut rx = editor.bus().subscribe();

    source.push(Script::new(vec![
        ExecutionEvent::new(EventKind::WorkflowStarted)
            .with_data(json!({"execution_id": "exec_wf_sample"})),
        node(EventKind::NodeStarted, "n1"),
        node(EventKind::NodeCompleted, "n1"),
        node(EventKind::NodeStarted, "n2"),
        node(EventKind::NodeCompleted, "n2"),
        ExecutionEvent::new(EventKind::WorkflowCompleted),
    ]));

    let report = editor
        .execute(json!({"input": "hi"}))
        .await
        .unwrap()
        .accepted()
        .unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    assert_eq!(report.execution_id.as_deref(), Some("exec_wf_sample"));
    assert_eq!(report.nodes["n2"].progress, 100);
    assert_eq!(status_of(&editor, "n1").await, NodeStatus::Completed);
    assert_eq!(status_of(&editor, "n2").await, NodeStatus::Completed);

    assert_eq!(api.upserts().len(), 1);
    assert_eq!(
        api.executions(),
        vec![("wf_sample".to_string(), json!({"input": "hi"}))]
    );
    assert_eq!(source.connects(), vec!["wf_sample".to_string()]);
    assert!(source.is_closed(0));
    assert!(!editor.is_executing());

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(EditorEvent::Saved { .. })));
    assert!(matches!(events.get(1), Some(EditorEvent::ExecutionStarted { .. })));
    let changes = events
        .iter()
        .filter(|e| matches!(e, EditorEvent::NodeStatusChanged { .. }))
        .count();
    assert_eq!(changes, 4);
    assert!(matches!(
        events.last(),
        Some(EditorEvent::ExecutionFinished {
            outcome: ExecutionOutcome::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn workflow_failure_is_reported_with_error() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    source.push(Script::new(vec![
        node(EventKind::NodeStarted, "n1"),
        node(EventKind::NodeFailed, "n1"),
        ExecutionEvent::new(EventKind::WorkflowFailed).with_data(json!({"error": "echo crashed"})),
    ]));

    let report = editor.execute(json!({})).await.unwrap().accepted().unwrap();
    assert_eq!(
        report.outcome,
        ExecutionOutcome::Failed {
            error: Some("echo crashed".into())
        }
    );
    assert_eq!(status_of(&editor, "n1").await, NodeStatus::Failed);
    assert_eq!(status_of(&editor, "n2").await, NodeStatus::Pending);
}

#[tokio::test]
async fn unknown_node_event_is_ignored() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();
    let mut rx = editor.bus().subscribe();

    source.push(Script::new(vec![
        node(EventKind::NodeStarted, "ghost"),
        ExecutionEvent::new(EventKind::WorkflowCompleted),
    ]));

    let report = editor.execute(json!({})).await.unwrap().accepted().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    assert!(report.nodes.values().all(|p| p.status == NodeStatus::Pending));

    let unknown: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EditorEvent::UnknownNode { node_id } => Some(node_id),
            _ => None,
        })
        .collect();
    assert_eq!(unknown, vec!["ghost".to_string()]);
}

#[tokio::test]
async fn unknown_node_event_is_logged_once() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    source.push(Script::new(vec![
        node(EventKind::NodeStarted, "ghost"),
        node(EventKind::NodeCompleted, "n1"),
        ExecutionEvent::new(EventKind::WorkflowCompleted),
    ]));
    editor.execute(json!({})).await.unwrap();

    let output = logs.contents();
    let entries: Vec<_> = output
        .lines()
        .filter(|line| line.contains("Ignoring execution event for unknown node"))
        .collect();
    assert_eq!(entries.len(), 1, "{}", output);
    assert!(entries[0].contains("WARN"));
    assert!(entries[0].contains("node_id=ghost"));
}

#[tokio::test]
async fn clearing_canvas_stops_observing_execution() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    source.push(Script::new(vec![node(EventKind::NodeStarted, "n1")]).then(StreamEnd::Hold));
    let run = tokio::spawn({
        let editor = editor.clone();
        async move { editor.execute(json!({})).await }
    });
    source.wait_for_connects(1).await;
    while status_of(&editor, "n1").await != NodeStatus::Running {
        tokio::task::yield_now().await;
    }

    editor.clear_canvas().await;
    assert!(!editor.is_executing());
    assert!(source.is_closed(0));
    assert!(!editor.cancel_execution().await);

    let report = run.await.unwrap().unwrap().accepted().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
    assert!(report.nodes.is_empty());
    assert!(editor.snapshot().await.graph.is_empty());
}

#[tokio::test]
async fn stream_end_before_terminal_leaves_statuses() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();
    let mut rx = editor.bus().subscribe();

    source.push(Script::new(vec![node(EventKind::NodeStarted, "n1")]));

    let err = editor.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, FlowdeckError::Stream(_)));
    assert_eq!(status_of(&editor, "n1").await, NodeStatus::Running);
    assert_eq!(status_of(&editor, "n2").await, NodeStatus::Pending);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, EditorEvent::ExecutionInterrupted { .. })));
}

#[tokio::test]
async fn transport_error_surfaces_as_stream_error() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    source.push(
        Script::new(vec![node(EventKind::NodeStarted, "n2")])
            .then(StreamEnd::Fail("connection reset".into())),
    );

    match editor.execute(json!({})).await {
        Err(FlowdeckError::Stream(reason)) => assert!(reason.contains("connection reset")),
        other => panic!("expected stream error, got {:?}", other),
    }
    assert_eq!(status_of(&editor, "n2").await, NodeStatus::Running);
}

#[tokio::test]
async fn failed_execute_request_closes_the_channel() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();
    api.fail_executions(500, "engine down");

    let err = editor.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, FlowdeckError::Backend { status: 500, .. }));
    assert!(source.is_closed(0));
    assert!(!editor.is_executing());
}

#[tokio::test]
async fn invalid_document_is_never_executed() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();
    editor.edit(|s| s.name.clear()).await;

    let err = editor.execute(json!({})).await.unwrap_err();
    assert_eq!(err.validation_errors().map(|e| e.len()), Some(1));
    assert!(api.upserts().is_empty());
    assert!(source.connects().is_empty());
}

#[tokio::test]
async fn second_save_while_first_in_flight_is_noop() {
    let api = Arc::new(MockWorkflowApi::gated());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    let first = tokio::spawn({
        let editor = editor.clone();
        async move { editor.save().await }
    });
    api.upsert_entered().await;

    assert!(editor.is_saving());
    assert_eq!(editor.save().await.unwrap(), Submission::AlreadyInFlight);
    assert!(matches!(
        editor.execute(json!({})).await.unwrap(),
        Submission::AlreadyInFlight
    ));

    api.release_upsert();
    let saved = first.await.unwrap().unwrap().accepted().unwrap();
    assert_eq!(saved.id, "wf_sample");
    assert_eq!(api.upserts().len(), 1);
    assert!(api.executions().is_empty());
    assert!(source.connects().is_empty());
    assert!(!editor.is_saving());
}

#[tokio::test]
async fn new_execution_closes_previous_connection_first() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    // No script queued: the first connection stays open and silent.
    let first = tokio::spawn({
        let editor = editor.clone();
        async move { editor.execute(json!({"run": 1})).await }
    });
    source.wait_for_connects(1).await;

    source.push(Script::new(vec![
        node(EventKind::NodeCompleted, "n1"),
        ExecutionEvent::new(EventKind::WorkflowCompleted),
    ]));
    let second = editor
        .execute(json!({"run": 2}))
        .await
        .unwrap()
        .accepted()
        .unwrap();
    assert_eq!(second.outcome, ExecutionOutcome::Completed);

    let first = first.await.unwrap().unwrap().accepted().unwrap();
    assert_eq!(first.outcome, ExecutionOutcome::Cancelled);

    assert_eq!(source.connects().len(), 2);
    assert!(source.is_closed(0));
    assert_eq!(source.open_at_connect(1), 0);
    assert_eq!(status_of(&editor, "n1").await, NodeStatus::Completed);
}

#[tokio::test]
async fn cancel_stops_observing_without_backend_call() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api.clone(), source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    source.push(Script::new(vec![node(EventKind::NodeStarted, "n1")]).then(StreamEnd::Hold));
    let run = tokio::spawn({
        let editor = editor.clone();
        async move { editor.execute(json!({})).await }
    });
    source.wait_for_connects(1).await;
    while status_of(&editor, "n1").await != NodeStatus::Running {
        tokio::task::yield_now().await;
    }

    assert!(editor.cancel_execution().await);
    let report = run.await.unwrap().unwrap().accepted().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
    assert!(source.is_closed(0));
    assert_eq!(api.executions().len(), 1);
    assert!(!editor.is_executing());
    assert_eq!(status_of(&editor, "n1").await, NodeStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_interrupts_silent_execution() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = Arc::new(
        EditorOrchestrator::new(
            api,
            source.clone(),
            Arc::new(EventBus::default()),
            EditorConfig::default(),
        )
        .with_idle_timeout(Some(Duration::from_secs(30))),
    );
    editor.load_document(&sample_document()).await.unwrap();

    let err = editor.execute(json!({})).await.unwrap_err();
    assert!(matches!(err, FlowdeckError::Stream(_)));
    assert!(source.is_closed(0));
}

#[tokio::test]
async fn dispose_cancels_running_execution() {
    let api = Arc::new(MockWorkflowApi::new());
    let source = Arc::new(ScriptedEventSource::new());
    let editor = editor(api, source.clone());
    editor.load_document(&sample_document()).await.unwrap();

    let run = tokio::spawn({
        let editor = editor.clone();
        async move { editor.execute(json!({})).await }
    });
    source.wait_for_connects(1).await;

    editor.dispose().await;
    let report = run.await.unwrap().unwrap().accepted().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
    assert!(source.is_closed(0));
}
