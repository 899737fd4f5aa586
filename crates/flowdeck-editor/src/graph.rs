use tracing::debug;

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::ids::new_node_id;
use flowdeck_core::types::{Connection, Node, NodeStatus, Position, WorkflowDocument};
use flowdeck_core::validate::duplicate_node_ids;

/// In-memory workflow graph.
///
/// Node ids are unique within the graph and every connection references two
/// nodes that exist. Removing a node removes its connections. Node order is
/// insertion order, which is also render order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphModel {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node labelled with its agent type.
    pub fn add_node(
        &mut self,
        agent_type: &str,
        position: Position,
        config: serde_json::Value,
    ) -> Node {
        self.add_named_node(agent_type, agent_type, position, config)
    }

    /// Add a node with an explicit display name. Status starts as pending.
    pub fn add_named_node(
        &mut self,
        agent_type: &str,
        name: &str,
        position: Position,
        config: serde_json::Value,
    ) -> Node {
        let mut id = new_node_id(agent_type);
        while self.contains(&id) {
            id = new_node_id(agent_type);
        }
        let node = Node {
            id,
            agent_type: agent_type.to_string(),
            name: name.to_string(),
            position,
            config,
            status: NodeStatus::Pending,
        };
        debug!(node_id = %node.id, agent_type, "Node added");
        self.nodes.push(node.clone());
        node
    }

    /// Remove a node and every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(index);
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        debug!(
            node_id = %id,
            cascaded = before - self.connections.len(),
            "Node removed"
        );
        Some(node)
    }

    /// Connect two existing nodes. Returns `Ok(false)` if the exact
    /// connection already exists.
    pub fn add_connection(
        &mut self,
        source_id: &str,
        target_id: &str,
        connection_type: &str,
    ) -> Result<bool> {
        for id in [source_id, target_id] {
            if !self.contains(id) {
                return Err(FlowdeckError::NodeNotFound(id.to_string()));
            }
        }
        let conn = Connection::new(source_id, target_id).with_type(connection_type);
        if self.connections.contains(&conn) {
            return Ok(false);
        }
        self.connections.push(conn);
        Ok(true)
    }

    /// Remove every connection from `source_id` to `target_id`.
    pub fn remove_connection(&mut self, source_id: &str, target_id: &str) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|c| !(c.source_id == source_id && c.target_id == target_id));
        self.connections.len() != before
    }

    pub fn rename_node(&mut self, id: &str, name: &str) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn update_node_config(&mut self, id: &str, config: serde_json::Value) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.config = config;
                true
            }
            None => false,
        }
    }

    pub fn move_node(&mut self, id: &str, position: Position) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    /// Empty the canvas.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connections.clear();
    }

    /// Replace the graph with a document's contents, statuses reset.
    ///
    /// A document that repeats a node id is refused and the graph is left
    /// untouched.
    pub fn load(&mut self, doc: &WorkflowDocument) -> Result<()> {
        if let Some(id) = duplicate_node_ids(doc).into_iter().next() {
            return Err(FlowdeckError::DuplicateNode(id));
        }
        self.nodes = doc
            .nodes
            .iter()
            .cloned()
            .map(|mut n| {
                n.status = NodeStatus::Pending;
                n
            })
            .collect();
        self.connections = doc.connections.clone();
        Ok(())
    }

    /// Status is owned by execution reconciliation; nothing else in the
    /// editor writes it.
    pub(crate) fn set_node_status(&mut self, id: &str, status: NodeStatus) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    pub fn reset_statuses(&mut self) {
        for node in &mut self.nodes {
            node.status = NodeStatus::Pending;
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
