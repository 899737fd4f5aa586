use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{FlowdeckError, Result};
use crate::types::*;

/// Backend workflow API — request/response half of the collaborator contract.
pub trait WorkflowApi: Send + Sync + 'static {
    /// Create or update a document keyed by its id. The backend decides which.
    fn upsert_workflow(&self, doc: &WorkflowDocument) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Ask the backend to start executing a stored workflow.
    fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_data: serde_json::Value,
    ) -> BoxFuture<'_, Result<ExecutionAck>>;

    /// Catalog entries for the node palette.
    fn available_agents(&self) -> BoxFuture<'_, Result<Vec<AgentDescriptor>>>;

    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        Box::pin(async { Err(unsupported("list_workflows")) })
    }

    fn get_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowDocument>> {
        let _ = workflow_id;
        Box::pin(async { Err(unsupported("get_workflow")) })
    }

    fn delete_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<()>> {
        let _ = workflow_id;
        Box::pin(async { Err(unsupported("delete_workflow")) })
    }

    fn list_templates(&self) -> BoxFuture<'_, Result<Vec<TemplateDescriptor>>> {
        Box::pin(async { Err(unsupported("list_templates")) })
    }

    fn create_from_template(
        &self,
        template_id: &str,
        customizations: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let _ = (template_id, customizations);
        Box::pin(async { Err(unsupported("create_from_template")) })
    }

    /// Probe backend health. Never fails; unreachable backends are reported
    /// in the returned status.
    fn health(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async {
            HealthReport {
                status: HealthStatus::Unreachable,
                workflow_engine: None,
                total_workflows: 0,
                error: Some("health check not supported".to_string()),
                timestamp: chrono::Utc::now(),
            }
        })
    }
}

fn unsupported(op: &str) -> FlowdeckError {
    FlowdeckError::Backend {
        status: 501,
        message: format!("{} is not supported by this backend", op),
    }
}

/// Event source — opens the live duplex channel for one execution attempt.
pub trait EventSource: Send + Sync + 'static {
    fn connect(&self, workflow_id: &str) -> BoxFuture<'_, Result<EventChannel>>;
}

/// Producer side of an `EventChannel`, held by whatever pumps the socket.
pub struct ChannelFeed {
    pub tx: mpsc::Sender<Result<ExecutionEvent>>,
    /// Cancelled when the consumer closes or drops the channel.
    pub cancel: CancellationToken,
}

/// Typed stream of execution events from one live connection.
///
/// Closing or dropping the channel cancels its token, which tells the
/// producer to shut the underlying connection down.
#[derive(Debug)]
pub struct EventChannel {
    rx: mpsc::Receiver<Result<ExecutionEvent>>,
    cancel: CancellationToken,
}

/// Create a connected producer/consumer pair.
pub fn event_channel(buffer: usize) -> (ChannelFeed, EventChannel) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    (
        ChannelFeed {
            tx,
            cancel: cancel.clone(),
        },
        EventChannel { rx, cancel },
    )
}

impl EventChannel {
    /// Next event, or `None` once the producer has hung up.
    pub async fn recv(&mut self) -> Option<Result<ExecutionEvent>> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_delivers_then_ends() {
        let (feed, mut channel) = event_channel(4);
        feed.tx
            .send(Ok(ExecutionEvent::for_node(EventKind::NodeStarted, "n1")))
            .await
            .unwrap();
        drop(feed);

        let ev = channel.recv().await.unwrap().unwrap();
        assert_eq!(ev.node_id(), Some("n1"));
        assert!(channel.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_channel_cancels_producer() {
        let (feed, channel) = event_channel(1);
        assert!(!feed.cancel.is_cancelled());
        drop(channel);
        assert!(feed.cancel.is_cancelled());
        assert!(feed.tx.is_closed());
    }
}
