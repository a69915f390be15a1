//! Process-wide catalog of registered capability handlers.
//!
//! The registry is the only globally mutable structure: all mutating calls
//! serialize through a single write lock, and reads return cloned
//! snapshots so they never block writers. Entries live for the server
//! process's lifetime and are listed in insertion order; re-registering an
//! identifier replaces the handler in place (last-registered wins).

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    annotations::{ComponentMetadata, parse_component_doc},
    context::RequestContext,
    error::{Error, Result},
    handler::{
        HandlerError, HandlerResult, PromptHandler, ResourceHandler, ToolHandler,
    },
    schema::{
        ParameterSpec, PromptArgument, PromptBody, PromptDescriptor, ResourceDescriptor,
        ToolDescriptor,
    },
};

use async_trait::async_trait;

/// A registered tool: its listing descriptor plus the handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

/// A registered resource: its listing descriptor plus the handler.
#[derive(Clone)]
pub struct RegisteredResource {
    pub descriptor: ResourceDescriptor,
    pub handler: Arc<dyn ResourceHandler>,
}

/// A registered prompt: its listing descriptor plus the handler.
#[derive(Clone)]
pub struct RegisteredPrompt {
    pub descriptor: PromptDescriptor,
    pub handler: Arc<dyn PromptHandler>,
}

#[derive(Default)]
struct RegistryState {
    tools: Vec<RegisteredTool>,
    resources: Vec<RegisteredResource>,
    prompts: Vec<RegisteredPrompt>,
}

/// In-process catalog of tools, resources, and prompts.
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler. The identifier is the handler's name.
    pub fn register_tool(&self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let name = handler.name();
        if name.is_empty() {
            return Err(Error::InvalidTool("tool name is empty".to_string()));
        }
        let descriptor = ToolDescriptor::new(name, handler.description())
            .with_parameters(handler.parameters());
        let entry = RegisteredTool {
            descriptor,
            handler,
        };
        let mut state = self.write();
        match state
            .tools
            .iter_mut()
            .find(|t| t.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => *existing = entry,
            None => state.tools.push(entry),
        }
        Ok(())
    }

    /// Register a resource handler. The identifier is the handler's URI.
    pub fn register_resource(&self, handler: Arc<dyn ResourceHandler>) -> Result<()> {
        let uri = handler.uri();
        if uri.is_empty() {
            return Err(Error::InvalidResource("resource uri is empty".to_string()));
        }
        if !uri.contains(':') {
            return Err(Error::InvalidResource(format!(
                "resource uri is not scheme-qualified: {uri}"
            )));
        }
        let descriptor = ResourceDescriptor::new(uri, handler.name())
            .with_description(handler.description())
            .with_mime_type(handler.mime_type());
        let entry = RegisteredResource {
            descriptor,
            handler,
        };
        let mut state = self.write();
        match state
            .resources
            .iter_mut()
            .find(|r| r.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => *existing = entry,
            None => state.resources.push(entry),
        }
        Ok(())
    }

    /// Register a prompt handler. The identifier is the handler's name.
    pub fn register_prompt(&self, handler: Arc<dyn PromptHandler>) -> Result<()> {
        let name = handler.name();
        if name.is_empty() {
            return Err(Error::InvalidPrompt("prompt name is empty".to_string()));
        }
        let descriptor = PromptDescriptor::new(name, handler.description())
            .with_arguments(handler.arguments());
        let entry = RegisteredPrompt {
            descriptor,
            handler,
        };
        let mut state = self.write();
        match state
            .prompts
            .iter_mut()
            .find(|p| p.descriptor.id == entry.descriptor.id)
        {
            Some(existing) => *existing = entry,
            None => state.prompts.push(entry),
        }
        Ok(())
    }

    /// Register an annotated unit for every capability kind its metadata
    /// declares.
    pub fn register_annotated(&self, unit: AnnotatedUnit) -> Result<()> {
        let AnnotatedUnit { metadata, callback } = unit;
        if metadata.is_empty() {
            return Err(Error::InvalidConfiguration(
                "annotated unit declares no capability".to_string(),
            ));
        }
        if metadata.is_tool() {
            self.register_tool(Arc::new(AnnotatedTool {
                metadata: metadata.clone(),
                callback: callback.clone(),
            }))?;
        }
        if metadata.is_resource() {
            self.register_resource(Arc::new(AnnotatedResource {
                metadata: metadata.clone(),
                callback: callback.clone(),
            }))?;
        }
        if metadata.is_prompt() {
            self.register_prompt(Arc::new(AnnotatedPrompt { metadata, callback }))?;
        }
        Ok(())
    }

    /// Snapshot of all registered tools, insertion-ordered.
    pub fn tools(&self) -> Vec<RegisteredTool> {
        self.read().tools.clone()
    }

    /// Snapshot of all registered resources, insertion-ordered.
    pub fn resources(&self) -> Vec<RegisteredResource> {
        self.read().resources.clone()
    }

    /// Snapshot of all registered prompts, insertion-ordered.
    pub fn prompts(&self) -> Vec<RegisteredPrompt> {
        self.read().prompts.clone()
    }

    /// Look up a tool by name.
    pub fn tool(&self, id: &str) -> Option<RegisteredTool> {
        self.read()
            .tools
            .iter()
            .find(|t| t.descriptor.id == id)
            .cloned()
    }

    /// Look up a resource by URI.
    pub fn resource(&self, id: &str) -> Option<RegisteredResource> {
        self.read()
            .resources
            .iter()
            .find(|r| r.descriptor.id == id)
            .cloned()
    }

    /// Look up a prompt by name.
    pub fn prompt(&self, id: &str) -> Option<RegisteredPrompt> {
        self.read()
            .prompts
            .iter()
            .find(|p| p.descriptor.id == id)
            .cloned()
    }

    /// Enumerate candidate units, keep those whose path starts with
    /// `prefix` (or all if absent), and register everything that satisfies
    /// a capability contract or carries annotations.
    ///
    /// Annotation parse failures are non-fatal: the unit is skipped with a
    /// warning. Returns the identifiers of newly registered units.
    pub fn discover(
        &self,
        candidates: impl IntoIterator<Item = CandidateUnit>,
        prefix: Option<&str>,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for candidate in candidates {
            if let Some(prefix) = prefix {
                if !candidate.path.starts_with(prefix) {
                    continue;
                }
            }
            self.discover_one(candidate, &mut report);
        }
        report
    }

    fn discover_one(&self, candidate: CandidateUnit, report: &mut DiscoveryReport) {
        let path = candidate.path;
        match candidate.kind {
            CandidateKind::Tool(handler) => {
                let name = handler.name();
                match self.register_tool(handler) {
                    Ok(()) => report.tools.push(name),
                    Err(error) => warn!(%path, %error, "skipping tool candidate"),
                }
            }
            CandidateKind::Resource(handler) => {
                let uri = handler.uri();
                match self.register_resource(handler) {
                    Ok(()) => report.resources.push(uri),
                    Err(error) => warn!(%path, %error, "skipping resource candidate"),
                }
            }
            CandidateKind::Prompt(handler) => {
                let name = handler.name();
                match self.register_prompt(handler) {
                    Ok(()) => report.prompts.push(name),
                    Err(error) => warn!(%path, %error, "skipping prompt candidate"),
                }
            }
            CandidateKind::Annotated { doc, callback } => {
                let metadata = match parse_component_doc(&doc) {
                    Ok(metadata) => metadata,
                    Err(error) => {
                        warn!(%path, %error, "skipping unit with malformed annotations");
                        return;
                    }
                };
                if metadata.is_empty() {
                    debug!(%path, "unit has no MCP annotations, not discovered");
                    return;
                }
                let tool = metadata.tool_name.clone();
                let resource = metadata.resource_uri.clone();
                let prompt = metadata.prompt_name.clone();
                match self.register_annotated(AnnotatedUnit { metadata, callback }) {
                    Ok(()) => {
                        report.tools.extend(tool);
                        report.resources.extend(resource);
                        report.prompts.extend(prompt);
                    }
                    Err(error) => warn!(%path, %error, "skipping annotated unit"),
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|err| err.into_inner())
    }
}

/// Identifiers registered by one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub tools: Vec<String>,
    pub resources: Vec<String>,
    pub prompts: Vec<String>,
}

impl DiscoveryReport {
    /// Total number of registrations performed.
    pub fn total(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }
}

/// Callback invoked for annotated units, regardless of capability kind.
pub type AnnotatedCallback =
    Arc<dyn Fn(Value, RequestContext) -> BoxFuture<'static, HandlerResult<Value>> + Send + Sync>;

/// A handler unit whose metadata comes from doc-block annotations.
pub struct AnnotatedUnit {
    pub metadata: ComponentMetadata,
    pub callback: AnnotatedCallback,
}

impl AnnotatedUnit {
    /// Parse the doc block and pair it with a callback.
    pub fn from_doc(doc: &str, callback: AnnotatedCallback) -> Result<Self> {
        let metadata = parse_component_doc(doc)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        Ok(Self { metadata, callback })
    }
}

/// A unit offered to [`Registry::discover`].
pub struct CandidateUnit {
    /// Identifier used for prefix filtering, usually a module path.
    pub path: String,
    /// What the unit is.
    pub kind: CandidateKind,
}

impl CandidateUnit {
    /// A candidate that satisfies the tool contract.
    pub fn tool(path: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            path: path.into(),
            kind: CandidateKind::Tool(handler),
        }
    }

    /// A candidate that satisfies the resource contract.
    pub fn resource(path: impl Into<String>, handler: Arc<dyn ResourceHandler>) -> Self {
        Self {
            path: path.into(),
            kind: CandidateKind::Resource(handler),
        }
    }

    /// A candidate that satisfies the prompt contract.
    pub fn prompt(path: impl Into<String>, handler: Arc<dyn PromptHandler>) -> Self {
        Self {
            path: path.into(),
            kind: CandidateKind::Prompt(handler),
        }
    }

    /// A candidate carrying doc-block annotations.
    pub fn annotated(
        path: impl Into<String>,
        doc: impl Into<String>,
        callback: AnnotatedCallback,
    ) -> Self {
        Self {
            path: path.into(),
            kind: CandidateKind::Annotated {
                doc: doc.into(),
                callback,
            },
        }
    }
}

/// The capability shape of a candidate unit.
pub enum CandidateKind {
    /// Satisfies the tool contract directly.
    Tool(Arc<dyn ToolHandler>),
    /// Satisfies the resource contract directly.
    Resource(Arc<dyn ResourceHandler>),
    /// Satisfies the prompt contract directly.
    Prompt(Arc<dyn PromptHandler>),
    /// Carries `@mcp_*` annotations in a doc block.
    Annotated {
        doc: String,
        callback: AnnotatedCallback,
    },
}

struct AnnotatedTool {
    metadata: ComponentMetadata,
    callback: AnnotatedCallback,
}

#[async_trait]
impl ToolHandler for AnnotatedTool {
    fn name(&self) -> String {
        self.metadata.tool_name.clone().unwrap_or_default()
    }

    fn description(&self) -> String {
        self.metadata.description.clone()
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        self.metadata.parameters.clone()
    }

    async fn call(&self, params: Value, ctx: &RequestContext) -> HandlerResult<Value> {
        (self.callback)(params, ctx.clone()).await
    }
}

struct AnnotatedResource {
    metadata: ComponentMetadata,
    callback: AnnotatedCallback,
}

#[async_trait]
impl ResourceHandler for AnnotatedResource {
    fn uri(&self) -> String {
        self.metadata.resource_uri.clone().unwrap_or_default()
    }

    fn description(&self) -> String {
        self.metadata.description.clone()
    }

    fn mime_type(&self) -> String {
        self.metadata
            .mime_type
            .clone()
            .unwrap_or_else(|| "text/plain".to_string())
    }

    async fn read(&self, params: Value, ctx: &RequestContext) -> HandlerResult<Value> {
        (self.callback)(params, ctx.clone()).await
    }
}

struct AnnotatedPrompt {
    metadata: ComponentMetadata,
    callback: AnnotatedCallback,
}

#[async_trait]
impl PromptHandler for AnnotatedPrompt {
    fn name(&self) -> String {
        self.metadata.prompt_name.clone().unwrap_or_default()
    }

    fn description(&self) -> String {
        self.metadata.description.clone()
    }

    fn arguments(&self) -> Vec<PromptArgument> {
        self.metadata.arguments.clone()
    }

    async fn get(&self, args: Value, ctx: &RequestContext) -> HandlerResult<PromptBody> {
        let value = (self.callback)(args, ctx.clone()).await?;
        serde_json::from_value(value)
            .map_err(|e| HandlerError::internal(format!("prompt body mismatch: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::transport::ConnectionHandle;

    use super::*;

    struct FixedTool {
        name: &'static str,
        reply: Value,
    }

    #[async_trait]
    impl ToolHandler for FixedTool {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn call(&self, _params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
            Ok(self.reply.clone())
        }
    }

    struct EmptyNameTool;

    #[async_trait]
    impl ToolHandler for EmptyNameTool {
        fn name(&self) -> String {
            String::new()
        }

        async fn call(&self, _params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
            Ok(Value::Null)
        }
    }

    struct BareUriResource;

    #[async_trait]
    impl ResourceHandler for BareUriResource {
        fn uri(&self) -> String {
            "readme".to_string()
        }

        async fn read(&self, _params: Value, _ctx: &RequestContext) -> HandlerResult<Value> {
            Ok(Value::Null)
        }
    }

    fn fixed(name: &'static str, reply: Value) -> Arc<dyn ToolHandler> {
        Arc::new(FixedTool { name, reply })
    }

    fn test_ctx() -> RequestContext {
        let (handle, _rx) = ConnectionHandle::channel("test");
        RequestContext::builder(handle).build()
    }

    #[test]
    fn test_register_and_list_round_trip() {
        let registry = Registry::new();
        registry.register_tool(fixed("alpha", json!(1))).unwrap();
        registry.register_tool(fixed("beta", json!(2))).unwrap();

        let tools = registry.tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].descriptor.id, "alpha");
        assert_eq!(tools[1].descriptor.id, "beta");
        assert!(registry.tool("alpha").is_some());
    }

    #[test]
    fn test_duplicate_registration_is_idempotent_for_count() {
        let registry = Registry::new();
        registry.register_tool(fixed("alpha", json!(1))).unwrap();
        registry.register_tool(fixed("alpha", json!(2))).unwrap();

        let tools = registry.tools();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let registry = Registry::new();
        registry.register_tool(fixed("alpha", json!("old"))).unwrap();
        registry.register_tool(fixed("beta", json!("b"))).unwrap();
        registry.register_tool(fixed("alpha", json!("new"))).unwrap();

        // Replacement keeps the original list position.
        let tools = registry.tools();
        assert_eq!(tools[0].descriptor.id, "alpha");

        let entry = registry.tool("alpha").unwrap();
        let reply = entry.handler.call(Value::Null, &test_ctx()).await.unwrap();
        assert_eq!(reply, json!("new"));
    }

    #[test]
    fn test_invalid_registrations_change_nothing() {
        let registry = Registry::new();
        assert!(matches!(
            registry.register_tool(Arc::new(EmptyNameTool)),
            Err(Error::InvalidTool(_))
        ));
        assert!(matches!(
            registry.register_resource(Arc::new(BareUriResource)),
            Err(Error::InvalidResource(_))
        ));
        assert!(registry.tools().is_empty());
        assert!(registry.resources().is_empty());
    }

    #[test]
    fn test_discover_partitions_and_filters() {
        let registry = Registry::new();
        let callback: AnnotatedCallback =
            Arc::new(|params, _ctx| Box::pin(async move { Ok(params) }));

        let candidates = vec![
            CandidateUnit::tool("app.tools.alpha", fixed("alpha", json!(1))),
            CandidateUnit::tool("other.beta", fixed("beta", json!(2))),
            CandidateUnit::annotated(
                "app.docs.readme",
                "Readme resource.\n\n@mcp_resource docs://readme\n@mcp_mime_type text/markdown",
                callback.clone(),
            ),
            CandidateUnit::annotated("app.misc.plain", "No annotations here.", callback.clone()),
            CandidateUnit::annotated(
                "app.misc.broken",
                "@mcp_param x Int [oops",
                callback,
            ),
        ];

        let report = registry.discover(candidates, Some("app."));
        assert_eq!(report.tools, vec!["alpha".to_string()]);
        assert_eq!(report.resources, vec!["docs://readme".to_string()]);
        assert!(report.prompts.is_empty());
        assert_eq!(report.total(), 2);

        // The out-of-prefix candidate was not registered.
        assert!(registry.tool("beta").is_none());
        let resource = registry.resource("docs://readme").unwrap();
        assert_eq!(resource.descriptor.mime_type, "text/markdown");
    }

    #[tokio::test]
    async fn test_annotated_unit_registers_declared_kinds() {
        let registry = Registry::new();
        let callback: AnnotatedCallback = Arc::new(|_params, _ctx| {
            Box::pin(async move { Ok(json!({"messages": [{"role": "user", "content": "hi"}]})) })
        });
        let unit = AnnotatedUnit::from_doc(
            "Greeting prompt.\n\n@mcp_prompt greeting\n@mcp_arg name [required: true]",
            callback,
        )
        .unwrap();
        registry.register_annotated(unit).unwrap();

        let prompt = registry.prompt("greeting").unwrap();
        assert_eq!(prompt.descriptor.arguments.len(), 1);
        let body = prompt.handler.get(json!({}), &test_ctx()).await.unwrap();
        assert_eq!(body.messages.len(), 1);
    }
}
