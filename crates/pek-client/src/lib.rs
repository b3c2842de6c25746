//! Pek Client
//!
//! Async SDK for a Pek progressive clustering server:
//! - `Client` connects, lists datasets and creates tasks
//! - `Dataset` fetches and caches precomputed dataset attributes
//! - `Task` configures an ensemble, drives its lifecycle and receives partial results
//! - `Connection` abstracts the transport (`SocketIoConnection`, `MockConnection`)

pub mod client;
pub mod config;
pub mod connection;
pub mod dataset;
pub mod error;
pub mod mock;
pub mod registry;
pub mod socketio;
pub mod task;

pub use client::{Client, ServerInfo};
pub use config::{ClientConfig, ClientConfigError, ClientConfigFile, ClientConfigResult};
pub use connection::{Connection, InboundMessage};
pub use dataset::{Dataset, DatasetKey};
pub use error::{ClientError, Result};
pub use mock::{MockConnection, SentRequest};
pub use registry::TaskRegistry;
pub use socketio::SocketIoConnection;
pub use task::Task;

pub use pek_core;
