//! Connection acquisition and release
//!
//! [`connect`] and [`connect_with_uri`] return deferred computations: nothing
//! touches the network until they are run. Failures are the driver's own errors,
//! not [`ErrorDescriptor`](crate::ErrorDescriptor)s.

use crate::deferred::Deferred;
use crate::session::Session;
use bson::doc;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Database};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Client options applied on top of the connection string
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Minimum number of connections in the pool (default: driver default)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
    /// Pin the stable server API (v1)
    pub stable_api: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("mongo-executer".to_string()),
            stable_api: true,
        }
    }
}

impl ConnectOptions {
    fn apply(self, client_options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            client_options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = self.app_name {
            client_options.app_name = Some(app);
        }
        if self.stable_api {
            let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
            client_options.server_api = Some(server_api);
        }
    }
}

/// A handle operations can be bound to.
///
/// Either it selects databases by name (a client), or it already is a database.
pub trait Connection: Send + Sync {
    /// Session for `name`, when this handle can select databases
    fn select_database(&self, name: &str) -> Option<Arc<dyn Session>>;

    /// Session for the handle itself, when it is database-scoped
    fn as_session(&self) -> Option<Arc<dyn Session>>;
}

impl Connection for Client {
    fn select_database(&self, name: &str) -> Option<Arc<dyn Session>> {
        Some(Arc::new(self.database(name)))
    }

    fn as_session(&self) -> Option<Arc<dyn Session>> {
        None
    }
}

impl Connection for Database {
    fn select_database(&self, _name: &str) -> Option<Arc<dyn Session>> {
        None
    }

    fn as_session(&self) -> Option<Arc<dyn Session>> {
        Some(Arc::new(self.clone()))
    }
}

/// Connection string for `host[:port][/database]`.
pub fn address_uri(address: &str) -> String {
    format!("mongodb://{}", address)
}

/// Connects to `host[:port][/database]` with default options.
pub fn connect(address: &str) -> Deferred<Client, mongodb::error::Error> {
    connect_with_uri(address_uri(address), ConnectOptions::default())
}

/// Connects with a full connection string. The server is pinged once so that an
/// unreachable host or bad credentials fail the computation.
pub fn connect_with_uri(
    uri: impl Into<String>,
    options: ConnectOptions,
) -> Deferred<Client, mongodb::error::Error> {
    let uri = uri.into();
    Deferred::attempt(move || establish(uri, options))
}

#[instrument(skip(uri, options), fields(app_name = ?options.app_name))]
async fn establish(uri: String, options: ConnectOptions) -> mongodb::error::Result<Client> {
    let mut client_options = ClientOptions::parse(uri.as_str()).await?;
    options.apply(&mut client_options);

    let client = Client::with_options(client_options)?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;

    info!("Connected to MongoDB");
    Ok(client)
}

/// Releases a client and its pooled connections.
pub fn disconnect(client: Client) -> Deferred<(), Infallible> {
    Deferred::attempt(move || async move {
        client.shutdown().await;
        info!("Disconnected from MongoDB");
        Ok(())
    })
}
