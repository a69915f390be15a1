//! Server facade tying configuration, registry, and engine together.

use std::{ffi::OsStr, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    config::ServerConfig,
    engine::{RequestEngine, ServerOverride},
    error::Result,
    http::{HttpServerHandle, HttpTransport},
    registry::{CandidateUnit, DiscoveryReport, Registry},
    stdio::StdioTransport,
};

/// An MCP server: a registry of capabilities plus the engine and the
/// transports that serve it.
///
/// ```ignore
/// let server = Server::new(ServerConfig::new("demo", "1.0.0"));
/// server.registry().register_tool(Arc::new(MyTool))?;
/// server.serve_stdio().await?;
/// ```
pub struct Server {
    config: ServerConfig,
    registry: Registry,
    hook: Option<Box<dyn ServerOverride>>,
}

impl Server {
    /// Create a server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            hook: None,
        }
    }

    /// The capability registry; register handlers before serving.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Attach a user override hook whose callbacks pre-empt the engine
    /// defaults.
    pub fn with_override(mut self, hook: Box<dyn ServerOverride>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Run discovery over candidate units, filtered by the configured
    /// module prefix.
    pub fn discover(
        &self,
        candidates: impl IntoIterator<Item = CandidateUnit>,
    ) -> DiscoveryReport {
        self.registry
            .discover(candidates, self.config.module_prefix.as_deref())
    }

    /// Build the request engine for this server.
    pub fn into_engine(self) -> Arc<RequestEngine> {
        let engine = RequestEngine::new(self.config, self.registry);
        let engine = match self.hook {
            Some(hook) => engine.with_override(hook),
            None => engine,
        };
        Arc::new(engine)
    }

    /// Serve stdin/stdout until end-of-input.
    pub async fn serve_stdio(self) -> Result<()> {
        StdioTransport::new(self.into_engine()).run().await
    }

    /// Serve an arbitrary byte-level duplex channel.
    pub async fn serve_stream<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        StdioTransport::new(self.into_engine())
            .run_with(reader, writer)
            .await
    }

    /// Spawn a command and serve its standard streams.
    pub async fn serve_command<P, I, A>(self, program: P, args: I) -> Result<()>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        StdioTransport::new(self.into_engine())
            .run_command(program, args)
            .await
    }

    /// Serve HTTP on the given address; returns a stoppable handle.
    pub async fn serve_http(self, addr: &str) -> Result<HttpServerHandle> {
        HttpTransport::new(self.into_engine()).serve(addr).await
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
