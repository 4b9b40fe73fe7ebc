//! Test server harness for E2E testing
//!
//! Provides `TestCcServer` for spawning real CC server instances in tests.

use card_controller::actors::{ActorMetrics, MeetingChannelRegistry};
use card_controller::config::Config;
use card_controller::routes::{self, AppState};
use card_controller::store::InMemoryStore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the Card Controller API in E2E tests.
///
/// The store and registry are shared with the running server, so tests can
/// seed users and meetings directly and inspect channels afterwards.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_ws_flow() -> anyhow::Result<()> {
///     let server = TestCcServer::spawn().await?;
///     let user = server.store().create_user().await?;
///     let (meeting, _) = server
///         .store()
///         .create_meeting(user.id, "Standup", "Alice", false)
///         .await?;
///
///     let (socket, _) = tokio_tungstenite::connect_async(server.ws_url(&meeting.short_code)).await?;
///     Ok(())
/// }
/// ```
pub struct TestCcServer {
    addr: SocketAddr,
    store: InMemoryStore,
    registry: MeetingChannelRegistry,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestCcServer {
    /// Spawn a server with default settings and a 100ms broadcast cooldown.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::from([(
            "CC_BROADCAST_COOLDOWN_MS".to_string(),
            "100".to_string(),
        )]))
        .await
    }

    /// Spawn a server configured from `vars` (same keys as the environment).
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(mut vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        vars.entry("CC_BIND_ADDRESS".to_string())
            .or_insert_with(|| "127.0.0.1:0".to_string());
        vars.entry("CC_INSTANCE_ID".to_string())
            .or_insert_with(|| "cc-test".to_string());

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = InMemoryStore::new();
        let registry = MeetingChannelRegistry::new(
            config.instance_id.clone(),
            config.channel_settings(),
            ActorMetrics::new(),
        );

        let state = Arc::new(AppState {
            store: store.clone(),
            registry: registry.clone(),
            config: config.clone(),
        });

        // Build routes using card-controller's real route builder
        let app = routes::build_routes(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            registry,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL of `meeting_code`'s channel.
    pub fn ws_url(&self, meeting_code: &str) -> String {
        format!("ws://{}/api/meetings/{}/ws", self.addr, meeting_code)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The store the server reads and writes.
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// The server's channel registry.
    pub fn registry(&self) -> &MeetingChannelRegistry {
        &self.registry
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestCcServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.registry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_binds_random_port() -> Result<(), anyhow::Error> {
        let server = TestCcServer::spawn().await?;

        assert_ne!(server.addr().port(), 0);
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.ws_url("AbCdEf").ends_with("/api/meetings/AbCdEf/ws"));
        assert_eq!(server.config().broadcast_cooldown_ms, 100);

        Ok(())
    }
}
