use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowdeck_core::config::EditorConfig;
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::event::EventBus;
use flowdeck_core::ids::new_workflow_id;
use flowdeck_core::traits::{EventSource, WorkflowApi};
use flowdeck_core::types::{AgentDescriptor, EditorEvent, ExecutionOutcome, WorkflowDocument};

use crate::canvas::CanvasController;
use crate::graph::GraphModel;
use crate::persistence::PersistenceClient;
use crate::reconciler::{Applied, ExecutionState, NodeProgress, Reconciler, Step};

/// Outcome of a guarded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    Accepted(T),
    /// A save was still in flight; nothing was done.
    AlreadyInFlight,
}

impl<T> Submission<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            Submission::Accepted(value) => Some(value),
            Submission::AlreadyInFlight => None,
        }
    }
}

/// Everything the editor shows for one open document.
#[derive(Debug, Clone)]
pub struct EditorState {
    pub graph: GraphModel,
    pub canvas: CanvasController,
    pub palette: Vec<AgentDescriptor>,
    document_id: String,
    pub name: String,
    pub description: String,
}

impl EditorState {
    /// A fresh document. The id is derived from the name once and kept
    /// through renames, saves and executions.
    pub fn new(name: &str) -> Self {
        Self {
            graph: GraphModel::new(),
            canvas: CanvasController::new(),
            palette: Vec::new(),
            document_id: new_workflow_id(name),
            name: name.to_string(),
            description: String::new(),
        }
    }

    pub fn from_document(doc: &WorkflowDocument) -> Result<Self> {
        let mut graph = GraphModel::new();
        graph.load(doc)?;
        Ok(Self {
            graph,
            canvas: CanvasController::new(),
            palette: Vec::new(),
            document_id: doc.id.clone(),
            name: doc.name.clone(),
            description: doc.description.clone(),
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn to_document(&self) -> WorkflowDocument {
        PersistenceClient::to_document(
            &self.graph,
            &self.document_id,
            &self.name,
            &self.description,
        )
    }

    /// Palette entry by agent type.
    pub fn agent(&self, agent_type: &str) -> Option<&AgentDescriptor> {
        self.palette.iter().find(|a| a.id == agent_type)
    }
}

/// Final picture of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub execution_id: Option<String>,
    pub outcome: ExecutionOutcome,
    pub nodes: BTreeMap<String, NodeProgress>,
}

/// Resets a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    /// Claim the flag, or `None` if someone already holds it.
    fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlagGuard(flag))
    }

    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        FlagGuard(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Composes graph editing, persistence and execution observation into
/// the save, execute, observe flow of one editor instance.
///
/// Only one execution is observed at a time: starting a new one cancels
/// the previous attempt and waits for its connection to be closed first.
pub struct EditorOrchestrator {
    api: Arc<dyn WorkflowApi>,
    events: Arc<dyn EventSource>,
    bus: Arc<EventBus>,
    persistence: PersistenceClient,
    config: EditorConfig,
    idle_timeout: Option<Duration>,
    state: Mutex<EditorState>,
    saving: AtomicBool,
    executing: AtomicBool,
    session_lock: Mutex<()>,
    current: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl EditorOrchestrator {
    pub fn new(
        api: Arc<dyn WorkflowApi>,
        events: Arc<dyn EventSource>,
        bus: Arc<EventBus>,
        config: EditorConfig,
    ) -> Self {
        let persistence = PersistenceClient::new(api.clone(), config.exported_by.clone());
        let state = EditorState::new(&config.default_name);
        Self {
            api,
            events,
            bus,
            persistence,
            config,
            idle_timeout: None,
            state: Mutex::new(state),
            saving: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            session_lock: Mutex::new(()),
            current: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Give up on an execution whose channel stays silent this long.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn persistence(&self) -> &PersistenceClient {
        &self.persistence
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Mount: load the agent palette. Returns the number of entries.
    pub async fn init(&self) -> Result<usize> {
        let agents = self.api.available_agents().await?;
        let count = agents.len();
        self.state.lock().await.palette = agents;
        info!(agents = count, "Editor initialized");
        Ok(count)
    }

    /// Unmount: stop observing any execution. Later executions are refused.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        self.stop_observing().await;
        debug!("Editor disposed");
    }

    /// Cancel the observed execution and wait until its connection is closed.
    async fn stop_observing(&self) {
        self.cancel_current().await;
        let _session = self.session_lock.lock().await;
    }

    async fn cancel_current(&self) {
        if let Some(token) = self.current.lock().await.take() {
            token.cancel();
        }
    }

    /// Run a closure against the editor state. A selection whose node the
    /// closure removed is dropped.
    pub async fn edit<R>(&self, f: impl FnOnce(&mut EditorState) -> R) -> R {
        let mut state = self.state.lock().await;
        let result = f(&mut state);
        let EditorState { graph, canvas, .. } = &mut *state;
        canvas.sync_selection(graph);
        result
    }

    pub async fn snapshot(&self) -> EditorState {
        self.state.lock().await.clone()
    }

    pub async fn document(&self) -> WorkflowDocument {
        self.state.lock().await.to_document()
    }

    /// Replace the open document with an empty one. The palette is kept.
    pub async fn new_document(&self, name: Option<&str>) -> String {
        self.stop_observing().await;
        let name = name.unwrap_or(&self.config.default_name);
        let mut state = self.state.lock().await;
        let palette = std::mem::take(&mut state.palette);
        *state = EditorState::new(name);
        state.palette = palette;
        state.document_id.clone()
    }

    /// Open an existing document, statuses reset to pending. A document
    /// that repeats a node id is refused and the open one is kept.
    pub async fn load_document(&self, doc: &WorkflowDocument) -> Result<()> {
        let mut fresh = EditorState::from_document(doc)?;
        self.stop_observing().await;
        let mut state = self.state.lock().await;
        fresh.palette = std::mem::take(&mut state.palette);
        *state = fresh;
        debug!(workflow_id = %doc.id, nodes = doc.nodes.len(), "Document loaded");
        Ok(())
    }

    /// Ask the backend to instantiate a template and open the result.
    /// Returns the new workflow id.
    pub async fn new_from_template(
        &self,
        template_id: &str,
        customizations: serde_json::Value,
    ) -> Result<String> {
        let created = self
            .api
            .create_from_template(template_id, customizations)
            .await?;
        let doc: WorkflowDocument =
            if let Some(workflow) = created.get("workflow").filter(|w| w.is_object()) {
                serde_json::from_value(workflow.clone())?
            } else if created.get("nodes").is_some() {
                serde_json::from_value(created)?
            } else if let Some(id) = created.get("workflow_id").and_then(|v| v.as_str()) {
                self.api.get_workflow(id).await?
            } else {
                return Err(FlowdeckError::ImportParse(format!(
                    "template {} did not return a workflow",
                    template_id
                )));
            };
        self.load_document(&doc).await?;
        info!(template_id, workflow_id = %doc.id, "Workflow created from template");
        Ok(doc.id)
    }

    /// Remove every node and connection, keeping the document identity.
    /// An observed execution is cancelled and its report covers no nodes.
    pub async fn clear_canvas(&self) {
        self.cancel_current().await;
        {
            let mut state = self.state.lock().await;
            state.graph.clear();
            state.canvas.reset();
        }
        let _session = self.session_lock.lock().await;
        self.bus.publish(EditorEvent::CanvasCleared);
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Validate and upsert the open document.
    ///
    /// While a save is in flight, further calls return
    /// `Submission::AlreadyInFlight` without doing anything.
    pub async fn save(&self) -> Result<Submission<WorkflowDocument>> {
        let Some(_guard) = FlagGuard::try_claim(&self.saving) else {
            debug!("Save already in flight");
            return Ok(Submission::AlreadyInFlight);
        };

        let doc = self.state.lock().await.to_document();
        self.persistence.save(&doc).await?;
        self.bus.publish(EditorEvent::Saved {
            workflow_id: doc.id.clone(),
        });
        Ok(Submission::Accepted(doc))
    }

    /// Save, start the backend run, and observe it until it finishes.
    ///
    /// Returns when the workflow reaches a terminal event or the attempt
    /// is cancelled. A channel that ends before the workflow does is a
    /// `FlowdeckError::Stream`; node statuses then stay where they were.
    pub async fn execute(
        &self,
        initial_data: serde_json::Value,
    ) -> Result<Submission<ExecutionReport>> {
        if self.shutdown.is_cancelled() {
            return Err(FlowdeckError::Stream("editor has been disposed".to_string()));
        }

        let doc = match self.save().await? {
            Submission::Accepted(doc) => doc,
            Submission::AlreadyInFlight => return Ok(Submission::AlreadyInFlight),
        };

        let token = self.shutdown.child_token();
        if let Some(previous) = self.current.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        let _session = self.session_lock.lock().await;
        if token.is_cancelled() {
            return Ok(Submission::Accepted(ExecutionReport {
                workflow_id: doc.id,
                execution_id: None,
                outcome: ExecutionOutcome::Cancelled,
                nodes: BTreeMap::new(),
            }));
        }
        let _executing = FlagGuard::raise(&self.executing);

        self.state.lock().await.graph.reset_statuses();

        let mut channel = self.events.connect(&doc.id).await?;
        let ack = match self.api.execute_workflow(&doc.id, initial_data).await {
            Ok(ack) => ack,
            Err(e) => {
                channel.close();
                warn!(workflow_id = %doc.id, error = %e, "Execution request failed");
                return Err(e);
            }
        };

        let mut state = ExecutionState::new(&doc.id, doc.nodes.iter().map(|n| n.id.clone()));
        state.execution_id = ack.execution_id.clone();
        let mut reconciler = Reconciler::new(channel, state).with_idle_timeout(self.idle_timeout);

        info!(
            workflow_id = %doc.id,
            execution_id = ?ack.execution_id,
            "Workflow execution started"
        );
        self.bus.publish(EditorEvent::ExecutionStarted {
            workflow_id: doc.id.clone(),
            execution_id: ack.execution_id,
        });

        let result = self.observe(&mut reconciler, &token).await;
        reconciler.close();
        let mut state = reconciler.into_state();
        {
            let editor = self.state.lock().await;
            state.nodes.retain(|id, _| editor.graph.contains(id));
        }

        match result {
            Ok(outcome) => {
                info!(workflow_id = %doc.id, outcome = ?outcome, "Workflow execution finished");
                self.bus.publish(EditorEvent::ExecutionFinished {
                    workflow_id: doc.id.clone(),
                    outcome: outcome.clone(),
                });
                Ok(Submission::Accepted(ExecutionReport {
                    workflow_id: doc.id,
                    execution_id: state.execution_id,
                    outcome,
                    nodes: state.nodes,
                }))
            }
            Err(e) => {
                warn!(workflow_id = %doc.id, error = %e, "Execution stream interrupted");
                self.bus.publish(EditorEvent::ExecutionInterrupted {
                    workflow_id: doc.id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn observe(
        &self,
        reconciler: &mut Reconciler,
        token: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        loop {
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(ExecutionOutcome::Cancelled),
                step = reconciler.next_step() => step,
            };

            match step {
                Step::Applied(Applied::NodeUpdated { node_id, progress }) => {
                    let on_canvas = self
                        .state
                        .lock()
                        .await
                        .graph
                        .set_node_status(&node_id, progress.status);
                    if on_canvas {
                        self.bus.publish(EditorEvent::NodeStatusChanged {
                            node_id,
                            status: progress.status,
                            progress: progress.progress,
                        });
                    } else {
                        warn!(node_id = %node_id, "Node was removed from the canvas during execution");
                        self.bus.publish(EditorEvent::UnknownNode { node_id });
                    }
                }
                Step::Applied(Applied::UnknownNode(node_id)) => {
                    self.bus.publish(EditorEvent::UnknownNode { node_id });
                }
                Step::Applied(Applied::Finished(outcome)) => return Ok(outcome),
                Step::Applied(_) => {}
                Step::Closed => {
                    return Err(FlowdeckError::Stream(
                        "event stream closed before the workflow finished".to_string(),
                    ))
                }
                Step::Error(FlowdeckError::Stream(reason)) => {
                    return Err(FlowdeckError::Stream(reason))
                }
                Step::Error(other) => return Err(FlowdeckError::Stream(other.to_string())),
            }
        }
    }

    /// Stop observing the current execution. The backend keeps running.
    /// Returns whether an execution was being observed.
    pub async fn cancel_execution(&self) -> bool {
        let was_executing = self.is_executing();
        self.cancel_current().await;
        was_executing
    }
}
