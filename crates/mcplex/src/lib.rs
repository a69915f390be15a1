//! # mcplex
//!
//! A server-side runtime for the Model Context Protocol (MCP): a typed
//! catalog of tools, resources, and prompts, a JSON-RPC 2.0 request engine
//! that enforces the initialize-before-use contract, and transports that
//! multiplex a single logical request over four wire protocols.
//!
//! ## Overview
//!
//! Capabilities implement one of three contracts — [`ToolHandler`],
//! [`ResourceHandler`], [`PromptHandler`] — and are registered with a
//! [`Registry`], either explicitly or through discovery over
//! caller-supplied candidate units (including units annotated with
//! `@mcp_*` doc-block markers). The [`RequestEngine`] dispatches the
//! protocol's method surface against the registry, and long-running tool
//! executions stream `progress` notifications back through the
//! connection's outbound channel.
//!
//! ## Transports
//!
//! - **Stdio**: newline-delimited JSON on stdin/stdout, or bound to the
//!   standard streams of a spawned command ([`StdioTransport`]).
//! - **Plain HTTP**: one request per POST, response in the body.
//! - **SSE**: a `text/event-stream` channel with a sibling POST path.
//! - **NDJSON**: chunked streaming responses, negotiated via `Accept:
//!   application/x-ndjson` ([`HttpTransport`] serves all three HTTP
//!   protocols on one router).
//!
//! ## Example
//!
//! ```ignore
//! use mcplex::{Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::new("demo-server", "1.0.0"));
//! server.registry().register_tool(Arc::new(MyTool))?;
//! server.serve_stdio().await?;
//! ```

/// Doc-block annotation parser.
mod annotations;
/// Server configuration.
mod config;
/// Per-request context and identifier generation.
mod context;
/// JSON-RPC request engine.
mod engine;
/// Error types and Result alias.
mod error;
/// Capability contracts for tools, resources, and prompts.
mod handler;
/// HTTP transports: plain, NDJSON streaming, and SSE.
mod http;
/// Capability registry and discovery.
mod registry;
/// Server facade.
mod server;
/// Line-framed stdio transport.
mod stdio;
/// Transport abstraction and connection bookkeeping.
mod transport;

/// Public wire schema types.
pub mod schema;
pub mod testutils;

pub use annotations::{AnnotationError, ComponentMetadata, metadata_record, parse_component_doc};
pub use config::ServerConfig;
pub use context::{ContextBuilder, RequestContext, RequestIdGenerator};
pub use engine::{
    CapabilityCall, EngineReply, OverrideReply, RequestEngine, ServerOverride, StreamFn,
};
pub use error::{Error, Result};
pub use handler::{
    HandlerError, HandlerResult, ProgressSink, PromptHandler, ResourceHandler, ToolHandler,
};
pub use http::{CLIENT_ID_HEADER, HttpServerHandle, HttpTransport, NDJSON_MIME};
pub use registry::{
    AnnotatedCallback, AnnotatedUnit, CandidateKind, CandidateUnit, DiscoveryReport,
    RegisteredPrompt, RegisteredResource, RegisteredTool, Registry,
};
pub use server::Server;
pub use stdio::{STDIO_CLIENT_ID, StdioTransport};
pub use transport::{ConnectionHandle, Connections, Transport};
