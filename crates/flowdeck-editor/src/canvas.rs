use tracing::debug;

use flowdeck_core::types::{empty_config, AgentDescriptor, Node, Position};

use crate::graph::GraphModel;

/// A point in viewport (page) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Drag session over the palette: `Idle -> Dragging -> Idle`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DragState {
    #[default]
    Idle,
    /// A catalog entry is being dragged. It is not a node yet.
    Dragging(AgentDescriptor),
}

/// Maps pointer gestures onto graph mutations and tracks single selection.
#[derive(Debug, Clone, Default)]
pub struct CanvasController {
    drag: DragState,
    selected: Option<String>,
}

impl CanvasController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_drag(&mut self, agent: AgentDescriptor) {
        debug!(agent_type = %agent.id, "Drag started");
        self.drag = DragState::Dragging(agent);
    }

    pub fn cancel_drag(&mut self) {
        self.drag = DragState::Idle;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging(_))
    }

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    /// Finish a drag over the canvas whose top-left corner sits at
    /// `canvas_origin`. Without an active drag this does nothing.
    pub fn drop_at(
        &mut self,
        graph: &mut GraphModel,
        pointer: Point,
        canvas_origin: Point,
    ) -> Option<Node> {
        let agent = match std::mem::take(&mut self.drag) {
            DragState::Dragging(agent) => agent,
            DragState::Idle => return None,
        };
        let position = Position::new(pointer.x - canvas_origin.x, pointer.y - canvas_origin.y);
        let name = if agent.name.is_empty() {
            agent.id.as_str()
        } else {
            agent.name.as_str()
        };
        Some(graph.add_named_node(&agent.id, name, position, empty_config()))
    }

    /// Clicking the selected node deselects it; clicking another selects it.
    pub fn click_node(&mut self, node_id: &str) {
        if self.selected.as_deref() == Some(node_id) {
            self.selected = None;
        } else {
            self.selected = Some(node_id.to_string());
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Drop a selection whose node is no longer in the graph.
    pub fn sync_selection(&mut self, graph: &GraphModel) {
        if let Some(id) = &self.selected {
            if !graph.contains(id) {
                debug!(node_id = %id, "Selected node left the graph");
                self.selected = None;
            }
        }
    }

    /// Delete the selected node (connections cascade) and clear selection.
    pub fn delete_selected(&mut self, graph: &mut GraphModel) -> Option<Node> {
        let id = self.selected.take()?;
        graph.remove_node(&id)
    }

    /// Forget selection and any drag in progress.
    pub fn reset(&mut self) {
        self.drag = DragState::Idle;
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentDescriptor {
        AgentDescriptor::new("qa_agent", "QA Agent")
    }

    #[test]
    fn drop_translates_viewport_to_canvas_coordinates() {
        let mut graph = GraphModel::new();
        let mut canvas = CanvasController::new();
        canvas.begin_drag(agent());
        assert!(canvas.is_dragging());

        let node = canvas
            .drop_at(&mut graph, Point::new(350.0, 220.0), Point::new(300.0, 200.0))
            .unwrap();

        assert_eq!(node.position, Position::new(50.0, 20.0));
        assert_eq!(node.agent_type, "qa_agent");
        assert_eq!(node.name, "QA Agent");
        assert_eq!(node.config, serde_json::json!({}));
        assert!(!canvas.is_dragging());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn drop_left_of_origin_goes_negative() {
        let mut graph = GraphModel::new();
        let mut canvas = CanvasController::new();
        canvas.begin_drag(agent());
        let node = canvas
            .drop_at(&mut graph, Point::new(10.0, 10.0), Point::new(40.0, 25.0))
            .unwrap();
        assert_eq!(node.position, Position::new(-30.0, -15.0));
    }

    #[test]
    fn drop_without_drag_is_noop() {
        let mut graph = GraphModel::new();
        let mut canvas = CanvasController::new();
        assert!(canvas
            .drop_at(&mut graph, Point::new(1.0, 1.0), Point::new(0.0, 0.0))
            .is_none());

        canvas.begin_drag(agent());
        canvas.cancel_drag();
        assert!(canvas
            .drop_at(&mut graph, Point::new(1.0, 1.0), Point::new(0.0, 0.0))
            .is_none());
        assert!(graph.is_empty());
    }

    #[test]
    fn selection_toggles_and_switches() {
        let mut canvas = CanvasController::new();
        canvas.click_node("a");
        assert_eq!(canvas.selected(), Some("a"));
        canvas.click_node("b");
        assert_eq!(canvas.selected(), Some("b"));
        canvas.click_node("b");
        assert_eq!(canvas.selected(), None);
    }

    #[test]
    fn delete_selected_cascades_and_clears_selection() {
        let mut graph = GraphModel::new();
        let mut canvas = CanvasController::new();
        let a = graph.add_node("a", Position::new(0.0, 0.0), empty_config());
        let b = graph.add_node("b", Position::new(0.0, 0.0), empty_config());
        graph.add_connection(&a.id, &b.id, "success").unwrap();

        canvas.click_node(&a.id);
        let removed = canvas.delete_selected(&mut graph).unwrap();
        assert_eq!(removed.id, a.id);
        assert!(canvas.selected().is_none());
        assert!(graph.connections().is_empty());
        assert!(canvas.delete_selected(&mut graph).is_none());
    }

    #[test]
    fn selection_of_removed_node_is_dropped() {
        let mut graph = GraphModel::new();
        let mut canvas = CanvasController::new();
        let a = graph.add_node("a", Position::new(0.0, 0.0), empty_config());
        let b = graph.add_node("b", Position::new(0.0, 0.0), empty_config());

        canvas.click_node(&a.id);
        canvas.sync_selection(&graph);
        assert_eq!(canvas.selected(), Some(a.id.as_str()));

        graph.remove_node(&a.id);
        canvas.sync_selection(&graph);
        assert!(canvas.selected().is_none());
        assert!(canvas.delete_selected(&mut graph).is_none());
        assert!(graph.contains(&b.id));
    }
}
