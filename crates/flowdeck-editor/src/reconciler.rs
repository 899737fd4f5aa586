//! Execution event reconciliation.
//!
//! Node status moves `pending -> running -> completed | failed`. Events are
//! folded strictly in arrival order by the pure [`reduce`] function: no
//! reordering and no deduplication, so a late `node_started` after a
//! `node_completed` puts the node back to running. Once a workflow-level
//! terminal event arrives, later node events no longer change anything.
//!
//! [`Reconciler`] drives the fold from a live [`EventChannel`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use flowdeck_core::error::FlowdeckError;
use flowdeck_core::traits::EventChannel;
use flowdeck_core::types::{EventKind, ExecutionEvent, ExecutionOutcome, NodeStatus};

use crate::graph::GraphModel;

/// Status plus a coarse progress indicator (0 or 100).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeProgress {
    pub status: NodeStatus,
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Observing,
    Completed,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionPhase::Observing)
    }
}

/// Everything known about one execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionState {
    pub workflow_id: String,
    pub execution_id: Option<String>,
    pub phase: SessionPhase,
    /// One entry per node that existed when the attempt began.
    pub nodes: BTreeMap<String, NodeProgress>,
    /// Events that changed nothing (unknown node, late, unrecognized).
    pub ignored_events: usize,
    pub error: Option<String>,
}

impl ExecutionState {
    pub fn new<I, S>(workflow_id: &str, node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workflow_id: workflow_id.to_string(),
            nodes: node_ids
                .into_iter()
                .map(|id| (id.into(), NodeProgress::default()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn for_graph(workflow_id: &str, graph: &GraphModel) -> Self {
        Self::new(workflow_id, graph.nodes().iter().map(|n| n.id.clone()))
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.nodes.get(node_id).map(|p| p.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        match self.phase {
            SessionPhase::Observing => None,
            SessionPhase::Completed => Some(ExecutionOutcome::Completed),
            SessionPhase::Failed => Some(ExecutionOutcome::Failed {
                error: self.error.clone(),
            }),
        }
    }
}

/// What a single event did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    NodeUpdated {
        node_id: String,
        progress: NodeProgress,
    },
    /// The execution was acknowledged by the engine.
    Started { execution_id: Option<String> },
    /// The workflow reached a terminal event.
    Finished(ExecutionOutcome),
    /// Node event naming a node this editor does not have.
    UnknownNode(String),
    /// Node event without `data.node_id`.
    MissingNodeId(EventKind),
    /// Arrived after the workflow was already terminal.
    AfterTerminal(EventKind),
    /// Event type this editor does not understand.
    Unrecognized,
}

impl Applied {
    pub fn is_ignored(&self) -> bool {
        matches!(
            self,
            Applied::UnknownNode(_)
                | Applied::MissingNodeId(_)
                | Applied::AfterTerminal(_)
                | Applied::Unrecognized
        )
    }
}

/// Fold one event into the state.
pub fn reduce(mut state: ExecutionState, event: &ExecutionEvent) -> (ExecutionState, Applied) {
    let applied = if state.is_terminal() {
        Applied::AfterTerminal(event.kind)
    } else {
        match event.kind {
            EventKind::WorkflowStarted => {
                if let Some(id) = event.execution_id() {
                    state.execution_id = Some(id.to_string());
                }
                Applied::Started {
                    execution_id: state.execution_id.clone(),
                }
            }
            EventKind::NodeStarted => update_node(&mut state, event, NodeStatus::Running, 0),
            EventKind::NodeCompleted => update_node(&mut state, event, NodeStatus::Completed, 100),
            EventKind::NodeFailed => update_node(&mut state, event, NodeStatus::Failed, 0),
            EventKind::WorkflowCompleted => {
                state.phase = SessionPhase::Completed;
                Applied::Finished(ExecutionOutcome::Completed)
            }
            EventKind::WorkflowFailed => {
                state.phase = SessionPhase::Failed;
                state.error = event.error().map(str::to_string);
                Applied::Finished(ExecutionOutcome::Failed {
                    error: state.error.clone(),
                })
            }
            EventKind::Unknown => Applied::Unrecognized,
        }
    };

    if applied.is_ignored() {
        state.ignored_events += 1;
    }
    (state, applied)
}

fn update_node(
    state: &mut ExecutionState,
    event: &ExecutionEvent,
    status: NodeStatus,
    progress: u8,
) -> Applied {
    let Some(node_id) = event.node_id() else {
        return Applied::MissingNodeId(event.kind);
    };
    match state.nodes.get_mut(node_id) {
        Some(entry) => {
            *entry = NodeProgress { status, progress };
            Applied::NodeUpdated {
                node_id: node_id.to_string(),
                progress: *entry,
            }
        }
        None => Applied::UnknownNode(node_id.to_string()),
    }
}

/// Result of pulling one message off the channel.
#[derive(Debug)]
pub enum Step {
    Applied(Applied),
    /// The channel ended.
    Closed,
    /// The channel failed or went idle for too long.
    Error(FlowdeckError),
}

/// Owns the live connection of one execution attempt and folds its events.
pub struct Reconciler {
    channel: EventChannel,
    state: ExecutionState,
    idle_timeout: Option<Duration>,
}

impl Reconciler {
    pub fn new(channel: EventChannel, state: ExecutionState) -> Self {
        Self {
            channel,
            state,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn into_state(self) -> ExecutionState {
        self.state
    }

    /// Wait for the next event and fold it.
    pub async fn next_step(&mut self) -> Step {
        let next = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.channel.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    return Step::Error(FlowdeckError::Stream(format!(
                        "no execution events for {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => self.channel.recv().await,
        };

        let event = match next {
            None => return Step::Closed,
            Some(Err(e)) => return Step::Error(e),
            Some(Ok(event)) => event,
        };

        let (state, applied) = reduce(std::mem::take(&mut self.state), &event);
        self.state = state;

        match &applied {
            Applied::UnknownNode(node_id) => {
                warn!(
                    workflow_id = %self.state.workflow_id,
                    node_id = %node_id,
                    kind = ?event.kind,
                    "Ignoring execution event for unknown node"
                );
            }
            Applied::MissingNodeId(kind) => {
                warn!(workflow_id = %self.state.workflow_id, ?kind, "Execution event without node_id");
            }
            Applied::AfterTerminal(kind) => {
                debug!(workflow_id = %self.state.workflow_id, ?kind, "Event after workflow finished");
            }
            Applied::Unrecognized => {
                debug!(workflow_id = %self.state.workflow_id, data = %event.data, "Unrecognized execution event");
            }
            other => {
                debug!(workflow_id = %self.state.workflow_id, applied = ?other, "Execution event applied");
            }
        }
        Step::Applied(applied)
    }

    /// Close the connection. Stops updates; the backend keeps running.
    pub fn close(&mut self) {
        self.channel.close();
    }
}
