//! Calculator MCP server example.
//!
//! Runs in two modes:
//! 1. Stdio mode: newline-delimited JSON-RPC on stdin/stdout
//! 2. HTTP mode: plain, NDJSON, and SSE endpoints on one port
//!
//! Usage:
//!   cargo run --example calculator_server stdio
//!   cargo run --example calculator_server http [--host 127.0.0.1] [--port 8080]

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::signal::ctrl_c;
use tracing::info;
use tracing_subscriber::fmt;

use mcplex::{
    HandlerError, HandlerResult, RequestContext, Server, ServerConfig, ToolHandler,
    schema::ParameterSpec,
};

/// Arithmetic over two operands.
struct Calculator;

#[async_trait]
impl ToolHandler for Calculator {
    fn name(&self) -> String {
        "calculate".to_string()
    }

    fn description(&self) -> String {
        "Performs basic arithmetic on two numbers".to_string()
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("operation", "string")
                .required()
                .with_choices([
                    json!("add"),
                    json!("subtract"),
                    json!("multiply"),
                    json!("divide"),
                ]),
            ParameterSpec::new("x", "number").required(),
            ParameterSpec::new("y", "number").required(),
        ]
    }

    async fn call(&self, params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("operation is required"))?;
        let x = params
            .get("x")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::invalid_params("x must be a number"))?;
        let y = params
            .get("y")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::invalid_params("y must be a number"))?;

        let result = match operation {
            "add" => x + y,
            "subtract" => x - y,
            "multiply" => x * y,
            "divide" => {
                if y == 0.0 {
                    return Err(HandlerError::message("Cannot divide by zero"));
                }
                x / y
            }
            other => {
                return Err(HandlerError::invalid_params(format!(
                    "unknown operation: {other}"
                )));
            }
        };
        Ok(json!(result))
    }
}

#[derive(Parser)]
#[command(name = "calculator_server")]
#[command(about = "Calculator MCP server", long_about = None)]
/// CLI options for the calculator server example.
struct Cli {
    #[command(subcommand)]
    /// Optional subcommand selecting server mode.
    command: Option<Commands>,
}

#[derive(Subcommand)]
/// Supported runtime modes for the server.
enum Commands {
    /// Run server in stdio mode
    Stdio,
    /// Run server in HTTP mode
    Http {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

fn build_server() -> mcplex::Result<Server> {
    let server = Server::new(ServerConfig::new("calculator-server", "1.0.0"));
    server.registry().register_tool(Arc::new(Calculator))?;
    Ok(server)
}

#[tokio::main]
async fn main() -> mcplex::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Stdio) {
        Commands::Stdio => {
            // No logging in stdio mode to avoid interfering with JSON-RPC.
            build_server()?.serve_stdio().await?;
        }
        Commands::Http { host, port } => {
            fmt::init();

            let addr = format!("{host}:{port}");
            info!("Starting HTTP MCP server on {}", addr);

            let handle = build_server()?.serve_http(&addr).await?;

            ctrl_c().await?;
            info!("Shutting down HTTP server");
            handle.stop().await?;
        }
    }

    Ok(())
}
