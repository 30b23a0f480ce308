//! MCP server handler, shared application state, and the tool registry seam.

use std::future::Future;
use std::sync::Arc;

use rmcp::handler::server::{
    tool::{ToolCallContext, ToolRoute, ToolRouter},
    ServerHandler,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Implementation, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult, ServerCapabilities,
    ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::json;
use tracing::{info_span, Instrument};

use super::resources::widgets::{self, WidgetTemplate};
use crate::config::GlobalConfig;
use crate::widget::WidgetBundler;
use crate::Result;

/// Name advertised in the `initialize` response.
pub const SERVER_NAME: &str = "widget-relay";

/// Shared application state accessible by every session's server.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Process-wide widget bundler (owns the shell cache).
    pub bundler: Arc<WidgetBundler>,
}

/// Attaches named tools and widget resources to a fresh server.
///
/// Invoked once per new session, before the server is connected to its
/// transport.
pub trait ToolRegistry: Send + Sync + 'static {
    /// Register tools and resources on `server`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Mcp` if a tool or resource definition is invalid.
    fn register(&self, server: &mut WidgetServer) -> Result<()>;
}

/// Per-session MCP server exposing the registered tools and widgets.
pub struct WidgetServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
    widgets: Vec<WidgetTemplate>,
}

impl WidgetServer {
    /// Create an empty server bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: ToolRouter::new(),
            widgets: Vec::new(),
        }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Register a callable tool.
    pub fn add_tool_route(&mut self, route: ToolRoute<Self>) {
        self.tool_router.add_route(route);
    }

    /// Register a widget template resource.
    pub fn add_widget(&mut self, widget: WidgetTemplate) {
        self.widgets.push(widget);
    }

    /// Registered tool definitions.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    /// Registered widget templates.
    #[must_use]
    pub fn widgets(&self) -> &[WidgetTemplate] {
        &self.widgets
    }

    /// Capabilities derived from what has been registered so far.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        let mut capabilities = json!({});
        if !self.tools().is_empty() {
            capabilities["tools"] = json!({ "listChanged": true });
        }
        if !self.widgets.is_empty() {
            capabilities["resources"] = json!({ "listChanged": true });
        }
        serde_json::from_value(capabilities).unwrap_or_default()
    }
}

impl ServerHandler for WidgetServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: self.capabilities(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::from_build_env()
            },
            instructions: Some(
                "Tools return a text summary plus a self-contained HTML widget \
                 (text/html+skybridge). Widget templates are also readable as resources."
                    .into(),
            ),
            ..Default::default()
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<CallToolResult, rmcp::ErrorData>> + Send + '_ {
        let span = info_span!("call_tool", tool = %request.name);

        async move {
            self.tool_router
                .call(ToolCallContext::new(self, request, context))
                .await
        }
        .instrument(span)
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListToolsResult, rmcp::ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.tools())))
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ListResourcesResult, rmcp::ErrorData>> + Send + '_
    {
        std::future::ready(widgets::list_resources(self))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = std::result::Result<ReadResourceResult, rmcp::ErrorData>> + Send + '_
    {
        let span = info_span!("read_resource", uri = %request.uri);
        async move { widgets::read_resource(self, &request.uri).await }.instrument(span)
    }
}
