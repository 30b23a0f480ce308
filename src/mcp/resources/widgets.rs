//! `ui://widget/*` template resources.
//!
//! A widget template names the source page that backs it and the host
//! metadata announced with both the resource and the tools that render it.
//! Reading a template returns the bundled shell without runtime data.

use rmcp::model::{ListResourcesResult, ReadResourceResult, Resource};
use serde_json::{json, Value};
use tracing::info;

use crate::mcp::handler::WidgetServer;
use crate::widget::WidgetRequest;

/// MIME type understood by widget hosts.
pub const WIDGET_MIME_TYPE: &str = "text/html+skybridge";

/// Static description of one widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetTemplate {
    /// Name of the tool that renders this widget.
    pub tool_name: &'static str,
    /// Human-readable title.
    pub title: &'static str,
    /// Resource URI, e.g. `ui://widget/greet-template-ko.html`.
    pub template_uri: &'static str,
    /// Page path on the widget source host.
    pub source_path: &'static str,
    /// Locale the template resource is bundled in.
    pub locale: &'static str,
    /// Status line shown while the tool runs.
    pub invoking: &'static str,
    /// Status line shown once the tool finished.
    pub invoked: &'static str,
    /// Widget description for hosts and models.
    pub description: &'static str,
}

/// Korean greeting card.
pub const GREET_KO: WidgetTemplate = WidgetTemplate {
    tool_name: "greet-ko",
    title: "인사하기 (한국어)",
    template_uri: "ui://widget/greet-template-ko.html",
    source_path: "/widgets/greet",
    locale: "ko",
    invoking: "인사 준비 중...",
    invoked: "인사 완료!",
    description: "사용자에게 한국어로 인사를 합니다",
};

/// Korean calculator card.
pub const CALCULATE_KO: WidgetTemplate = WidgetTemplate {
    tool_name: "calculate-ko",
    title: "계산기 (한국어)",
    template_uri: "ui://widget/calculate-template-ko.html",
    source_path: "/widgets/calculate",
    locale: "ko",
    invoking: "계산 중...",
    invoked: "계산 완료!",
    description: "간단한 수학 계산을 수행합니다",
};

impl WidgetTemplate {
    /// `_meta` attached to the tool definition and its results.
    #[must_use]
    pub fn tool_meta(&self) -> Value {
        json!({
            "openai/outputTemplate": self.template_uri,
            "openai/toolInvocation/invoking": self.invoking,
            "openai/toolInvocation/invoked": self.invoked,
            "openai/widgetAccessible": false,
            "openai/resultCanProduceWidget": true,
        })
    }

    /// `_meta` attached to the resource and its contents.
    ///
    /// `domain` is the widget source origin; it is allowed in the
    /// widget's content security policy.
    #[must_use]
    pub fn resource_meta(&self, domain: &str) -> Value {
        json!({
            "openai/widgetDescription": self.description,
            "openai/widgetPrefersBorder": true,
            "openai/widgetDomain": domain,
            "openai/widgetCSP": {
                "connect_domains": [domain],
                "resource_domains": [domain],
            },
        })
    }

    /// Request for the data-less template shell.
    #[must_use]
    pub fn template_request(&self) -> WidgetRequest {
        WidgetRequest::new(self.source_path, self.locale, None)
    }
}

fn widget_domain(server: &WidgetServer) -> String {
    server
        .state()
        .config
        .widgets
        .source_base_url
        .trim_end_matches('/')
        .to_owned()
}

/// Build the `ListResourcesResult` for every registered widget.
///
/// # Errors
///
/// Returns `rmcp::ErrorData::internal_error` if a resource descriptor
/// cannot be built.
pub fn list_resources(server: &WidgetServer) -> Result<ListResourcesResult, rmcp::ErrorData> {
    let domain = widget_domain(server);
    let resources = server
        .widgets()
        .iter()
        .map(|widget| {
            serde_json::from_value::<Resource>(json!({
                "uri": widget.template_uri,
                "name": widget.tool_name,
                "title": widget.title,
                "description": widget.description,
                "mimeType": WIDGET_MIME_TYPE,
                "_meta": widget.resource_meta(&domain),
            }))
            .map_err(|err| {
                rmcp::ErrorData::internal_error(
                    format!("failed to describe {}: {err}", widget.template_uri),
                    None,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ListResourcesResult::with_all_items(resources))
}

/// Handle `resources/read` for a widget template.
///
/// # Errors
///
/// Returns `rmcp::ErrorData::resource_not_found` for URIs that name no
/// registered widget. Upstream failures never surface here: the bundler
/// falls back to a synthetic document.
pub async fn read_resource(
    server: &WidgetServer,
    uri: &str,
) -> Result<ReadResourceResult, rmcp::ErrorData> {
    let Some(widget) = server
        .widgets()
        .iter()
        .find(|widget| widget.template_uri == uri)
    else {
        return Err(rmcp::ErrorData::resource_not_found(
            format!("unknown resource: {uri}"),
            None,
        ));
    };

    let html = server
        .state()
        .bundler
        .bundle(&widget.template_request())
        .await;
    info!(uri, bytes = html.len(), "widget template served");

    serde_json::from_value(json!({
        "contents": [{
            "uri": widget.template_uri,
            "mimeType": WIDGET_MIME_TYPE,
            "text": html,
            "_meta": widget.resource_meta(&widget_domain(server)),
        }],
    }))
    .map_err(|err| {
        rmcp::ErrorData::internal_error(format!("failed to build resource contents: {err}"), None)
    })
}
