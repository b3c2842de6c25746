//! Entry point of the SDK.
//!
//! A [`Client`] owns one connection. It knows the datasets the server offers,
//! creates tasks, and routes every pushed message to the task whose id is the
//! message topic.

use crate::config::ClientConfig;
use crate::connection::{Connection, InboundMessage, Session};
use crate::dataset::Dataset;
use crate::error::{ClientError, Result};
use crate::registry::TaskRegistry;
use crate::socketio::SocketIoConnection;
use crate::task::Task;
use pek_core::TaskId;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The server a client is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub url: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    server_version: String,
    #[serde(default)]
    datasets: Vec<String>,
}

/// Connected Pek client.
pub struct Client {
    session: Arc<Session>,
    server: ServerInfo,
    dataset_names: Vec<String>,
    datasets: HashMap<String, Arc<Dataset>>,
    registry: TaskRegistry,
    router: JoinHandle<()>,
    disconnected: watch::Receiver<bool>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("server", &self.server)
            .field("datasets", &self.dataset_names)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to `config.server_url` over Socket.IO.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connection = SocketIoConnection::connect(&config.server_url, config.connect_timeout()).await?;
        Self::with_connection(Arc::new(connection), config).await
    }

    /// Builds a client over an already open connection.
    ///
    /// Sends `info` to learn the server version and its datasets.
    pub async fn with_connection(connection: Arc<dyn Connection>, config: ClientConfig) -> Result<Self> {
        let inbound = connection
            .take_inbound()
            .ok_or_else(|| ClientError::Connection("inbound stream is already in use".to_string()))?;
        let session = Arc::new(Session::new(connection, config.request_timeout()));

        let info = session.send("info", None).await?;
        let info: InfoResponse = serde_json::from_value(info)
            .map_err(|e| ClientError::InvalidResponse(format!("malformed info response: {e}")))?;

        let datasets = info
            .datasets
            .iter()
            .map(|name| (name.clone(), Arc::new(Dataset::new(name.clone(), Arc::clone(&session)))))
            .collect();

        let registry = TaskRegistry::new();
        let (disconnected_tx, disconnected) = watch::channel(false);
        let router = tokio::spawn(route_inbound(inbound, registry.clone(), disconnected_tx));

        info!(
            client_id = %session.client_id(),
            server_version = %info.server_version,
            datasets = info.datasets.len(),
            "Client ready"
        );

        Ok(Self {
            server: ServerInfo { url: config.server_url, version: info.server_version },
            dataset_names: info.datasets,
            datasets,
            session,
            registry,
            router,
            disconnected,
        })
    }

    /// Id the server knows this client by.
    pub fn id(&self) -> &str {
        self.session.client_id()
    }

    /// URL and version of the connected server.
    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Dataset names in the order the server listed them.
    pub fn dataset_names(&self) -> &[String] {
        &self.dataset_names
    }

    /// Fails without contacting the server when `name` is not offered.
    pub fn dataset(&self, name: &str) -> Result<Arc<Dataset>> {
        self.datasets.get(name).cloned().ok_or_else(|| ClientError::DatasetNotFound(name.to_string()))
    }

    /// Creates a pending task with a fresh id and starts routing its messages.
    pub async fn create_task(&self) -> Task {
        let task = Task::new(TaskId::new(), Arc::clone(&self.session));
        self.registry.register(task.clone()).await;
        debug!(task_id = %task.id(), "Task created");
        task
    }

    /// Looks up a task created by this client.
    ///
    /// # Arguments
    /// * `id` - The id returned by `Task::id`
    ///
    /// # Returns
    /// The task handle, or `None` if it was never created or has been removed.
    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.registry.get(id).await
    }

    /// Every task created by this client, ordered by id.
    pub async fn tasks(&self) -> Vec<Task> {
        self.registry.list().await
    }

    /// Stops routing messages to a task. Returns `true` if it was known.
    pub async fn remove_task(&self, id: &TaskId) -> bool {
        self.registry.unregister(id).await
    }

    /// True once the server stream has ended or the client was closed.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow() || self.disconnected.has_changed().is_err()
    }

    /// Resolves when the server stream ends or the client is closed.
    ///
    /// Pushed results stop arriving at that point, so callers waiting on a
    /// task should select on this as well.
    pub async fn disconnected(&self) {
        let mut disconnected = self.disconnected.clone();
        // An error means the router is gone, which also ends routing.
        let _ = disconnected.wait_for(|ended| *ended).await;
    }

    /// Stops the router and closes the connection.
    pub async fn close(&self) -> Result<()> {
        self.router.abort();
        self.session.connection().close().await?;
        info!(client_id = %self.id(), "Client closed");
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn route_inbound(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    registry: TaskRegistry,
    disconnected: watch::Sender<bool>,
) {
    while let Some(message) = inbound.recv().await {
        let task_id = TaskId::from(message.topic);
        let Some(task) = registry.get(&task_id).await else {
            debug!(topic = %task_id, "No task registered for message");
            continue;
        };

        if let Err(e) = task.handle_partial_result(&message.payload) {
            warn!(task_id = %task_id, error = %e, "Dropping malformed partial result");
        }
    }
    let tasks = registry.count().await;
    warn!(tasks, "Inbound stream closed, no more results will be routed");
    disconnected.send_replace(true);
}
