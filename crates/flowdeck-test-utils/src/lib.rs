//! Mocks and fixtures shared by Flowdeck tests.
//!
//! `MockWorkflowApi` records what the editor sends and can hold an upsert in
//! flight; `ScriptedEventSource` replays fixed event sequences per connection.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::{event_channel, EventChannel, EventSource, WorkflowApi};
use flowdeck_core::types::*;

/// Two nodes joined by one success connection, ids `n1` and `n2`.
pub fn sample_document() -> WorkflowDocument {
    let mut doc = WorkflowDocument::new("wf_sample", "Sample");
    doc.description = "Fixture workflow".to_string();
    doc.nodes = vec![
        Node {
            id: "n1".to_string(),
            agent_type: "echo".to_string(),
            name: "Echo".to_string(),
            position: Position::new(0.0, 0.0),
            config: serde_json::json!({"greeting": "hello"}),
            status: NodeStatus::Pending,
        },
        Node {
            id: "n2".to_string(),
            agent_type: "qa_agent".to_string(),
            name: "QA".to_string(),
            position: Position::new(200.0, 0.0),
            config: empty_config(),
            status: NodeStatus::Pending,
        },
    ];
    doc.connections = vec![Connection::new("n1", "n2")];
    doc
}

#[derive(Default)]
struct UpsertGate {
    entered: Notify,
    release: Notify,
}

/// In-memory backend.
#[derive(Default)]
pub struct MockWorkflowApi {
    agents: Mutex<Vec<AgentDescriptor>>,
    stored: Mutex<Vec<WorkflowDocument>>,
    upserts: Mutex<Vec<WorkflowDocument>>,
    executions: Mutex<Vec<(String, serde_json::Value)>>,
    templates: Mutex<Vec<(TemplateDescriptor, WorkflowDocument)>>,
    upsert_failure: Mutex<Option<(u16, String)>>,
    execute_failure: Mutex<Option<(u16, String)>>,
    gate: Option<UpsertGate>,
}

impl MockWorkflowApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upsert waits for `release_upsert` before it completes.
    pub fn gated() -> Self {
        Self {
            gate: Some(UpsertGate::default()),
            ..Self::default()
        }
    }

    pub fn with_agents(self, agents: Vec<AgentDescriptor>) -> Self {
        *self.agents.lock().unwrap() = agents;
        self
    }

    /// Offer `doc` as a template. Creating from it stores a copy under a
    /// new id and answers with that id only.
    pub fn with_template(self, template_id: &str, doc: WorkflowDocument) -> Self {
        let descriptor = TemplateDescriptor {
            id: template_id.to_string(),
            name: doc.name.clone(),
            category: "general".to_string(),
            description: None,
        };
        self.templates.lock().unwrap().push((descriptor, doc));
        self
    }

    pub fn fail_upserts(&self, status: u16, message: &str) {
        *self.upsert_failure.lock().unwrap() = Some((status, message.to_string()));
    }

    pub fn fail_executions(&self, status: u16, message: &str) {
        *self.execute_failure.lock().unwrap() = Some((status, message.to_string()));
    }

    /// Documents received by `upsert_workflow`, in order.
    pub fn upserts(&self) -> Vec<WorkflowDocument> {
        self.upserts.lock().unwrap().clone()
    }

    /// `(workflow_id, initial_data)` of every execution request.
    pub fn executions(&self) -> Vec<(String, serde_json::Value)> {
        self.executions.lock().unwrap().clone()
    }

    /// Resolves once a gated upsert has started waiting.
    pub async fn upsert_entered(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notified().await;
        }
    }

    /// Let one gated upsert finish.
    pub fn release_upsert(&self) {
        if let Some(gate) = &self.gate {
            gate.release.notify_one();
        }
    }

    fn stored(&self, workflow_id: &str) -> Option<WorkflowDocument> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == workflow_id)
            .cloned()
    }
}

fn not_found(workflow_id: &str) -> FlowdeckError {
    FlowdeckError::Backend {
        status: 404,
        message: format!("Workflow {} not found", workflow_id),
    }
}

impl WorkflowApi for MockWorkflowApi {
    fn upsert_workflow(&self, doc: &WorkflowDocument) -> BoxFuture<'_, Result<serde_json::Value>> {
        let doc = doc.clone();
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if let Some((status, message)) = self.upsert_failure.lock().unwrap().clone() {
                return Err(FlowdeckError::Backend { status, message });
            }
            self.upserts.lock().unwrap().push(doc.clone());
            let mut stored = self.stored.lock().unwrap();
            stored.retain(|d| d.id != doc.id);
            stored.push(doc.clone());
            Ok(serde_json::json!({
                "workflow_id": doc.id,
                "message": "Workflow saved successfully"
            }))
        })
    }

    fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_data: serde_json::Value,
    ) -> BoxFuture<'_, Result<ExecutionAck>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            if let Some((status, message)) = self.execute_failure.lock().unwrap().clone() {
                return Err(FlowdeckError::Backend { status, message });
            }
            if self.stored(&workflow_id).is_none() {
                return Err(not_found(&workflow_id));
            }
            self.executions
                .lock()
                .unwrap()
                .push((workflow_id.clone(), initial_data));
            Ok(ExecutionAck {
                execution_id: Some(format!("exec_{}", workflow_id)),
                extra: serde_json::Map::new(),
            })
        })
    }

    fn available_agents(&self) -> BoxFuture<'_, Result<Vec<AgentDescriptor>>> {
        Box::pin(async move { Ok(self.agents.lock().unwrap().clone()) })
    }

    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        Box::pin(async move {
            Ok(self
                .stored
                .lock()
                .unwrap()
                .iter()
                .map(|d| WorkflowSummary {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    description: d.description.clone(),
                    status: None,
                    node_count: d.nodes.len(),
                    connection_count: d.connections.len(),
                })
                .collect())
        })
    }

    fn get_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowDocument>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move { self.stored(&workflow_id).ok_or_else(|| not_found(&workflow_id)) })
    }

    fn delete_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<()>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let mut stored = self.stored.lock().unwrap();
            let before = stored.len();
            stored.retain(|d| d.id != workflow_id);
            if stored.len() == before {
                return Err(not_found(&workflow_id));
            }
            Ok(())
        })
    }

    fn list_templates(&self) -> BoxFuture<'_, Result<Vec<TemplateDescriptor>>> {
        Box::pin(async move {
            Ok(self
                .templates
                .lock()
                .unwrap()
                .iter()
                .map(|(t, _)| t.clone())
                .collect())
        })
    }

    fn create_from_template(
        &self,
        template_id: &str,
        customizations: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let template_id = template_id.to_string();
        Box::pin(async move {
            let template = self
                .templates
                .lock()
                .unwrap()
                .iter()
                .find(|(t, _)| t.id == template_id)
                .map(|(_, doc)| doc.clone());
            let Some(mut doc) = template else {
                return Err(FlowdeckError::Backend {
                    status: 404,
                    message: format!("Template {} not found", template_id),
                });
            };
            let mut stored = self.stored.lock().unwrap();
            doc.id = format!("{}_{}", template_id, stored.len() + 1);
            if let Some(name) = customizations["name"].as_str() {
                doc.name = name.to_string();
            }
            stored.push(doc.clone());
            Ok(serde_json::json!({
                "workflow_id": doc.id,
                "message": "Workflow created from template"
            }))
        })
    }

    fn health(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            HealthReport {
                status: HealthStatus::Healthy,
                workflow_engine: Some("running".to_string()),
                total_workflows: self.stored.lock().unwrap().len() as u64,
                error: None,
                timestamp: chrono::Utc::now(),
            }
        })
    }
}

/// How a scripted connection behaves after its last event.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// The server hangs up.
    Close,
    /// The transport reports an error.
    Fail(String),
    /// Stay open until the consumer closes the channel.
    Hold,
}

/// Events one connection will deliver.
#[derive(Debug, Clone)]
pub struct Script {
    events: Vec<ExecutionEvent>,
    end: StreamEnd,
}

impl Script {
    pub fn new(events: Vec<ExecutionEvent>) -> Self {
        Self {
            events,
            end: StreamEnd::Close,
        }
    }

    pub fn then(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }
}

struct Opened {
    workflow_id: String,
    token: CancellationToken,
    open_before: usize,
}

/// Event source replaying one `Script` per `connect`. Connections past the
/// last script stay open and silent.
#[derive(Default)]
pub struct ScriptedEventSource {
    scripts: Mutex<VecDeque<Script>>,
    opened: Mutex<Vec<Opened>>,
    connected: Notify,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Workflow ids of every connection, in order.
    pub fn connects(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.workflow_id.clone())
            .collect()
    }

    /// Whether the consumer has closed connection `index`.
    pub fn is_closed(&self, index: usize) -> bool {
        self.opened.lock().unwrap()[index].token.is_cancelled()
    }

    /// How many earlier connections were still open when `index` opened.
    pub fn open_at_connect(&self, index: usize) -> usize {
        self.opened.lock().unwrap()[index].open_before
    }

    pub async fn wait_for_connects(&self, count: usize) {
        loop {
            if self.opened.lock().unwrap().len() >= count {
                return;
            }
            self.connected.notified().await;
        }
    }
}

impl EventSource for ScriptedEventSource {
    fn connect(&self, workflow_id: &str) -> BoxFuture<'_, Result<EventChannel>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Script::new(vec![]).then(StreamEnd::Hold));
            let (feed, channel) = event_channel(16);

            {
                let mut opened = self.opened.lock().unwrap();
                let open_before = opened.iter().filter(|o| !o.token.is_cancelled()).count();
                opened.push(Opened {
                    workflow_id,
                    token: feed.cancel.clone(),
                    open_before,
                });
            }
            self.connected.notify_one();

            tokio::spawn(async move {
                for event in script.events {
                    if feed.tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                match script.end {
                    StreamEnd::Close => {}
                    StreamEnd::Fail(reason) => {
                        let _ = feed.tx.send(Err(FlowdeckError::Stream(reason))).await;
                    }
                    StreamEnd::Hold => feed.cancel.cancelled().await,
                }
            });
            Ok(channel)
        })
    }
}
