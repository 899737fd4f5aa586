use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Canvas coordinates. Not snapped to any grid; may be negative.
/// A coordinate that is missing or `null` decodes as NaN. NaN encodes as
/// `null`, so an unset position survives an export round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default = "unset_coordinate", deserialize_with = "coordinate")]
    pub x: f64,
    #[serde(default = "unset_coordinate", deserialize_with = "coordinate")]
    pub y: f64,
}

fn unset_coordinate() -> f64 {
    f64::NAN
}

fn coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Placeholder used when a document omits the position entirely.
    /// Never finite, so the validator rejects it.
    pub fn unset() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Lifecycle of a node during one execution attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// One agent invocation placed on the canvas.
///
/// `agent_type` is a foreign key into the external agent catalog and never
/// changes after creation. `config` is agent-defined and passed through
/// untouched. `status` is volatile: it is never serialized and always comes
/// back as `Pending` after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "Position::unset")]
    pub position: Position,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(skip)]
    pub status: NodeStatus,
}

pub fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A directed edge between two nodes of the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default = "default_connection_type", alias = "type")]
    pub connection_type: String,
}

pub fn default_connection_type() -> String {
    "success".to_string()
}

impl Connection {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            connection_type: default_connection_type(),
        }
    }

    pub fn with_type(mut self, connection_type: impl Into<String>) -> Self {
        self.connection_type = connection_type.into();
        self
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }
}

/// The persisted and transmitted unit.
///
/// Every field defaults when absent so that a malformed candidate still
/// parses and the validator can report all of its problems at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(rename = "workflow_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowDocument {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: vec![],
            connections: vec![],
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Kind of a server-pushed lifecycle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    WorkflowCompleted,
    WorkflowFailed,
    #[serde(other)]
    Unknown,
}

/// A message received on the execution event channel: `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            data: empty_config(),
            timestamp: None,
        }
    }

    /// Shorthand for a node-scoped event carrying `data.node_id`.
    pub fn for_node(kind: EventKind, node_id: &str) -> Self {
        Self::new(kind).with_data(serde_json::json!({ "node_id": node_id }))
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn node_id(&self) -> Option<&str> {
        self.data.get("node_id").and_then(|v| v.as_str())
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.data.get("execution_id").and_then(|v| v.as_str())
    }

    pub fn error(&self) -> Option<&str> {
        self.data.get("error").and_then(|v| v.as_str())
    }

    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::WorkflowCompleted | EventKind::WorkflowFailed
        )
    }
}

/// An entry of the agent catalog used to populate the node palette.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_agent_description")]
    pub description: String,
    #[serde(default = "default_agent_icon")]
    pub icon: String,
    #[serde(default = "default_agent_category")]
    pub category: String,
    #[serde(default = "default_agent_color")]
    pub color: String,
}

fn default_agent_description() -> String { "No description available".to_string() }
fn default_agent_icon() -> String { "🤖".to_string() }
fn default_agent_category() -> String { "general".to_string() }
fn default_agent_color() -> String { "#6b7280".to_string() }

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: default_agent_description(),
            icon: default_agent_icon(),
            category: default_agent_category(),
            color: default_agent_color(),
        }
    }

    /// Fill the id from the catalog key and the name from the id when blank.
    pub fn normalized(mut self, key: &str) -> Self {
        if self.id.is_empty() {
            self.id = key.to_string();
        }
        if self.name.is_empty() {
            self.name = self.id.clone();
        }
        self
    }
}

/// Row returned by the workflow listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    #[serde(rename = "workflow_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub connection_count: usize,
}

/// A server-side workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Acknowledgement of an execution request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionAck {
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

/// Result of probing the backend's health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default)]
    pub workflow_engine: Option<String>,
    #[serde(default)]
    pub total_workflows: u64,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How an observed execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed { error: Option<String> },
    /// Stopped locally; the backend was not told to abort.
    Cancelled,
}

/// Events published by the editor for whatever renders it.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// A document was accepted by the backend.
    Saved { workflow_id: String },
    /// Backend acknowledged an execution request.
    ExecutionStarted {
        workflow_id: String,
        execution_id: Option<String>,
    },
    /// A node changed status as the result of an execution event.
    NodeStatusChanged {
        node_id: String,
        status: NodeStatus,
        progress: u8,
    },
    /// An execution event named a node that is not on the canvas.
    UnknownNode { node_id: String },
    /// The workflow reached a terminal event or was cancelled.
    ExecutionFinished {
        workflow_id: String,
        outcome: ExecutionOutcome,
    },
    /// The event channel failed or closed before a terminal event.
    ExecutionInterrupted { workflow_id: String, reason: String },
    /// All nodes and connections were removed.
    CanvasCleared,
}
