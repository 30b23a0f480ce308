//! MCP tool handlers and the bundled tool registry.

pub mod calculate;
pub mod greet;
pub mod util;

use rmcp::handler::server::tool::ToolRoute;

use super::handler::{ToolRegistry, WidgetServer};
use super::resources::widgets::{CALCULATE_KO, GREET_KO};
use crate::Result;

/// Registers `greet-ko`, `calculate-ko` and their widget templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct WidgetToolRegistry;

impl ToolRegistry for WidgetToolRegistry {
    fn register(&self, server: &mut WidgetServer) -> Result<()> {
        server.add_widget(GREET_KO);
        server.add_widget(CALCULATE_KO);

        server.add_tool_route(ToolRoute::new_dyn(greet::definition()?, |context| {
            Box::pin(greet::handle(context))
        }));
        server.add_tool_route(ToolRoute::new_dyn(calculate::definition()?, |context| {
            Box::pin(calculate::handle(context))
        }));
        Ok(())
    }
}
