use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::ids::slugify;
use flowdeck_core::traits::WorkflowApi;
use flowdeck_core::types::{NodeStatus, WorkflowDocument};
use flowdeck_core::validate::{dangling_connections, duplicate_node_ids, validate};

use crate::graph::GraphModel;

/// Wire shape of an exported file: the document plus export metadata.
#[derive(Serialize)]
struct ExportEnvelope<'a> {
    #[serde(flatten)]
    document: &'a WorkflowDocument,
    exported_at: DateTime<Utc>,
    exported_by: &'a str,
}

/// Moves documents between the editor, the backend, and local files.
pub struct PersistenceClient {
    api: Arc<dyn WorkflowApi>,
    exported_by: String,
}

impl PersistenceClient {
    pub fn new(api: Arc<dyn WorkflowApi>, exported_by: impl Into<String>) -> Self {
        Self {
            api,
            exported_by: exported_by.into(),
        }
    }

    /// Project the graph into a document. Statuses are not part of a
    /// document and come out as pending.
    pub fn to_document(
        graph: &GraphModel,
        id: &str,
        name: &str,
        description: &str,
    ) -> WorkflowDocument {
        WorkflowDocument {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            nodes: graph
                .nodes()
                .iter()
                .cloned()
                .map(|mut n| {
                    n.status = NodeStatus::Pending;
                    n
                })
                .collect(),
            connections: graph.connections().to_vec(),
        }
    }

    /// Validate, then upsert. An invalid document is never sent.
    pub async fn save(&self, doc: &WorkflowDocument) -> Result<serde_json::Value> {
        let report = validate(doc);
        if !report.is_valid {
            return Err(FlowdeckError::Validation(report.errors));
        }
        for problem in dangling_connections(doc) {
            warn!(workflow_id = %doc.id, %problem, "Saving workflow with dangling connection");
        }

        let stored = self.api.upsert_workflow(doc).await?;
        info!(
            workflow_id = %doc.id,
            nodes = doc.nodes.len(),
            connections = doc.connections.len(),
            "Workflow saved"
        );
        Ok(stored)
    }

    /// Pretty JSON with `exported_at` and `exported_by` added.
    pub fn export_bytes(&self, doc: &WorkflowDocument) -> Result<Vec<u8>> {
        let envelope = ExportEnvelope {
            document: doc,
            exported_at: Utc::now(),
            exported_by: &self.exported_by,
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    /// Write an export. A directory target gets `<name>.json` inside it.
    pub async fn export_to_file(&self, doc: &WorkflowDocument, target: &Path) -> Result<PathBuf> {
        let bytes = self.export_bytes(doc)?;
        let path = if target.is_dir() {
            target.join(export_file_name(doc))
        } else {
            target.to_path_buf()
        };
        tokio::fs::write(&path, bytes).await?;
        info!(workflow_id = %doc.id, path = %path.display(), "Workflow exported");
        Ok(path)
    }

    /// Parse and re-validate an exported document. Export metadata is
    /// ignored and statuses come back pending. Repeated node ids are
    /// refused.
    pub fn import_bytes(bytes: &[u8]) -> Result<WorkflowDocument> {
        let doc: WorkflowDocument =
            serde_json::from_slice(bytes).map_err(|e| FlowdeckError::ImportParse(e.to_string()))?;
        let report = validate(&doc);
        if !report.is_valid {
            return Err(FlowdeckError::Validation(report.errors));
        }
        if let Some(id) = duplicate_node_ids(&doc).into_iter().next() {
            return Err(FlowdeckError::DuplicateNode(id));
        }
        Ok(doc)
    }

    pub async fn import_from_file(path: &Path) -> Result<WorkflowDocument> {
        let bytes = tokio::fs::read(path).await?;
        Self::import_bytes(&bytes)
    }
}

/// `Data Pipeline` exports as `data_pipeline.json`.
pub fn export_file_name(doc: &WorkflowDocument) -> String {
    let slug = slugify(&doc.name);
    if slug.is_empty() {
        "workflow.json".to_string()
    } else {
        format!("{}.json", slug)
    }
}
