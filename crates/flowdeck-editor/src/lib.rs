//! Workflow graph editor engine.
//!
//! The `GraphModel` holds nodes and connections, the `CanvasController`
//! turns drag-and-drop gestures into graph mutations, the
//! `PersistenceClient` moves documents to and from the backend and local
//! files, and the `Reconciler` folds execution events into node status.
//! `EditorOrchestrator` composes them into the save, execute, observe flow.

pub mod canvas;
pub mod graph;
pub mod orchestrator;
pub mod persistence;
pub mod reconciler;

pub use canvas::{CanvasController, DragState, Point};
pub use graph::GraphModel;
pub use orchestrator::{EditorOrchestrator, EditorState, ExecutionReport, Submission};
pub use persistence::PersistenceClient;
pub use reconciler::{reduce, Applied, ExecutionState, NodeProgress, Reconciler, SessionPhase, Step};
