use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use labmap_assist::{Assistant, ChatTurn};
use labmap_core::layouts::{
    apply_positions, now_millis, FsLayoutStore, LayoutBook, LayoutPositions, LayoutStore,
};
use labmap_core::{FlowGraph, LabDocument, LabError, Position};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct LabRequest {
    /// Name of the lab
    lab: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SetLabRequest {
    /// Name of the lab to create or overwrite
    lab: String,
    /// The complete lab document as a JSON string: {items, connections?, status?, views?, styles?}. See get_lab_schema for the exact shape.
    data: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct TopologyRequest {
    /// Name of the lab
    lab: String,
    /// View id to filter by (see list_views). Unknown views return the full topology.
    view: Option<String>,
    /// Saved layout id whose positions replace the computed ones. Without it the working layout, if any, is applied.
    layout: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveLayoutRequest {
    /// Name of the lab
    lab: String,
    /// Display name for the saved layout
    name: String,
    /// Optional view id; only the nodes visible in that view are captured
    view: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct LayoutIdRequest {
    /// Name of the lab
    lab: String,
    /// Saved layout id, e.g. "layout-1718000000000"
    id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SaveCurrentLayoutRequest {
    /// Name of the lab
    lab: String,
    /// Node positions keyed by node id. Nodes left out keep their current position.
    positions: Option<BTreeMap<String, Position>>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AskRequest {
    /// Name of the lab the question is about
    lab: String,
    /// Conversation so far, oldest first. The last message must come from the user.
    messages: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewSummary<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    include: &'a [String],
    expand_children: bool,
}

// --- Server ---

#[derive(Clone)]
pub struct LabmapServer {
    tool_router: ToolRouter<Self>,
    assistant: Arc<Assistant>,
    layouts: Arc<FsLayoutStore>,
}

fn fail(e: impl Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(e.to_string())])
}

fn json_text<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => CallToolResult::success(vec![Content::text(json)]),
        Err(e) => fail(format!("Serialization error: {}", e)),
    }
}

/// Render a lab and lay saved positions over the computed ones: the named
/// layout when given, otherwise the working layout.
fn positioned_topology<S: LayoutStore>(
    store: &S,
    lab: &str,
    doc: &LabDocument,
    view: Option<&str>,
    layout: Option<&str>,
) -> Result<FlowGraph, LabError> {
    let mut graph = labmap_core::render_lab(doc, view)?;
    let book = LayoutBook::new(store, lab);
    let positions = match layout {
        Some(id) => Some(book.load(id)?.positions),
        None => book.load_current()?,
    };
    if let Some(positions) = positions {
        apply_positions(&mut graph.nodes, &positions);
    }
    Ok(graph)
}

fn update_working_layout<S: LayoutStore>(
    store: &S,
    lab: &str,
    doc: &LabDocument,
    overrides: Option<&LayoutPositions>,
) -> Result<usize, LabError> {
    let mut graph = positioned_topology(store, lab, doc, None, None)?;
    if let Some(overrides) = overrides {
        apply_positions(&mut graph.nodes, overrides);
    }
    LayoutBook::new(store, lab).save_current(&graph.nodes)?;
    Ok(graph.nodes.len())
}

#[tool_router]
impl LabmapServer {
    pub fn new(assistant: Assistant, layouts: FsLayoutStore) -> Self {
        Self {
            tool_router: Self::tool_router(),
            assistant: Arc::new(assistant),
            layouts: Arc::new(layouts),
        }
    }

    fn read(&self, lab: &str) -> Result<LabDocument, CallToolResult> {
        labmap_core::read_lab(lab)
            .map_err(|e| fail(format!("Failed to read lab '{}': {}", lab, e)))
    }

    #[tool(description = "List all available labs")]
    fn list_labs(&self) -> Result<CallToolResult, McpError> {
        match labmap_core::list_labs() {
            Ok(names) => {
                let text = if names.is_empty() {
                    "No labs found. Use set_lab to create one.".to_string()
                } else {
                    names.join("\n")
                };
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(
        description = "Get the lab document as stored: {items: [{id, name, type, parent?, layer?, ip?, dns?, port?, network?, purpose?, tags?, links?, metadata?}], connections: [{from, to, label}], status: {id: up|down|off|unknown}, views: {id: {name, description, include, expandChildren}}, styles?}. For diagram positions use get_topology."
    )]
    fn get_lab(&self, Parameters(req): Parameters<LabRequest>) -> Result<CallToolResult, McpError> {
        match labmap_core::read_lab_raw(&req.lab) {
            Ok(raw) => Ok(CallToolResult::success(vec![Content::text(raw)])),
            Err(e) => Ok(fail(format!("Failed to read lab '{}': {}", req.lab, e))),
        }
    }

    #[tool(
        description = "Create or overwrite a lab. The document is validated first: every item needs a non-empty, unique id. Parents that point at missing items are allowed and render as roots."
    )]
    fn set_lab(&self, Parameters(req): Parameters<SetLabRequest>) -> Result<CallToolResult, McpError> {
        let doc: LabDocument = match serde_json::from_str(&req.data) {
            Ok(d) => d,
            Err(e) => return Ok(fail(format!("Invalid lab JSON: {}", e))),
        };
        match labmap_core::write_lab(&req.lab, &doc) {
            Ok(()) => {
                info!(lab = %req.lab, items = doc.items.len(), "lab saved");
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "Saved lab '{}' ({} items, {} connections)",
                    req.lab,
                    doc.items.len(),
                    doc.connections.len()
                ))]))
            }
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(description = "JSON schema of a lab document, as accepted by set_lab")]
    fn get_lab_schema(&self) -> Result<CallToolResult, McpError> {
        Ok(json_text(&schemars::schema_for!(LabDocument)))
    }

    #[tool(description = "List the views defined for a lab")]
    fn list_views(&self, Parameters(req): Parameters<LabRequest>) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        let views: Vec<ViewSummary> = doc
            .views
            .iter()
            .map(|(id, v)| ViewSummary {
                id,
                name: &v.name,
                description: &v.description,
                include: &v.include,
                expand_children: v.expand_children,
            })
            .collect();
        Ok(json_text(&views))
    }

    #[tool(
        description = "Lay out a lab as a diagram: {nodes: [{id, type, position: {x, y}, data: {label, role, color, icon, status, parent?, ip?, dns?, port?}}], edges: [{id, source, target, kind, label?, animated}]}. Parents sit centred above their children; structural edges link parent to child, connection edges are animated."
    )]
    fn get_topology(
        &self,
        Parameters(req): Parameters<TopologyRequest>,
    ) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        match positioned_topology(
            self.layouts.as_ref(),
            &req.lab,
            &doc,
            req.view.as_deref(),
            req.layout.as_deref(),
        ) {
            Ok(graph) => Ok(json_text(&graph)),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(description = "List saved layouts of a lab, newest first (at most 5 are kept)")]
    fn list_layouts(
        &self,
        Parameters(req): Parameters<LabRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = labmap_core::check_lab_name(&req.lab) {
            return Ok(fail(e));
        }
        match LayoutBook::new(self.layouts.as_ref(), &req.lab).list() {
            Ok(layouts) => Ok(json_text(&layouts)),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(
        description = "Snapshot the current node positions of a lab under a name. Saving a sixth layout drops the oldest."
    )]
    fn save_layout(
        &self,
        Parameters(req): Parameters<SaveLayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        let store = self.layouts.as_ref();
        let saved = positioned_topology(store, &req.lab, &doc, req.view.as_deref(), None)
            .and_then(|graph| {
                LayoutBook::new(store, &req.lab).save(&req.name, &graph.nodes, now_millis())
            });
        match saved {
            Ok(layout) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Saved layout '{}' as {} ({} positions)",
                layout.name,
                layout.id,
                layout.positions.len()
            ))])),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(
        description = "Apply a saved layout: it becomes the working layout and the positioned topology is returned"
    )]
    fn load_layout(
        &self,
        Parameters(req): Parameters<LayoutIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        let store = self.layouts.as_ref();
        let loaded = positioned_topology(store, &req.lab, &doc, None, Some(&req.id)).and_then(
            |graph| {
                LayoutBook::new(store, &req.lab).save_current(&graph.nodes)?;
                Ok(graph)
            },
        );
        match loaded {
            Ok(graph) => Ok(json_text(&graph)),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(description = "Delete a saved layout")]
    fn delete_layout(
        &self,
        Parameters(req): Parameters<LayoutIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = labmap_core::check_lab_name(&req.lab) {
            return Ok(fail(e));
        }
        match LayoutBook::new(self.layouts.as_ref(), &req.lab).delete(&req.id) {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Deleted layout {}",
                req.id
            ))])),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(
        description = "Update the working layout, which get_topology applies by default. Pass positions to move nodes; without them the current positions are stored as they are."
    )]
    fn save_current_layout(
        &self,
        Parameters(req): Parameters<SaveCurrentLayoutRequest>,
    ) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        match update_working_layout(self.layouts.as_ref(), &req.lab, &doc, req.positions.as_ref())
        {
            Ok(count) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Working layout of '{}' updated ({} positions)",
                req.lab, count
            ))])),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(description = "Drop the working layout so get_topology returns computed positions again")]
    fn clear_current_layout(
        &self,
        Parameters(req): Parameters<LabRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = labmap_core::check_lab_name(&req.lab) {
            return Ok(fail(e));
        }
        match LayoutBook::new(self.layouts.as_ref(), &req.lab).clear_current() {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Working layout of '{}' cleared",
                req.lab
            ))])),
            Err(e) => Ok(fail(e)),
        }
    }

    #[tool(
        description = "Ask the lab assistant a question about a lab. Off-topic or instruction-override questions are refused without calling the model. Requires LLM settings (settings.json or LLM_* environment variables)."
    )]
    async fn ask(&self, Parameters(req): Parameters<AskRequest>) -> Result<CallToolResult, McpError> {
        let doc = match self.read(&req.lab) {
            Ok(d) => d,
            Err(r) => return Ok(r),
        };
        match self.assistant.ask("stdio", &doc.items, &req.messages).await {
            Ok(answer) => Ok(CallToolResult::success(vec![Content::text(answer.text)])),
            Err(e) => {
                error!(lab = %req.lab, error = %e, "assistant failed");
                Ok(fail(e))
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for LabmapServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!(
            "{}\n\n## Assistant Rules\n{}",
            INSTRUCTIONS,
            labmap_core::rules::RULES
        );
        ServerInfo {
            instructions: Some(instructions.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"labmap renders homelab topologies. Each lab is a JSON document stored under ~/.labmap (or $LABMAP_HOME) listing infrastructure items with optional parent ids, plus connections, node status and named views.

Workflow:
1. list_labs / get_lab to inspect what exists; get_lab_schema for the document shape.
2. set_lab to write a full document. Ids must be unique; parents pointing at missing items render as roots.
3. get_topology to lay the lab out as positioned nodes and edges, optionally filtered by a view.
4. Layouts: save_layout keeps up to 5 named position snapshots per lab; load_layout makes one the working layout, which get_topology applies by default; clear_current_layout goes back to computed positions.
5. ask answers questions about a lab within the rules below."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let assistant = Assistant::from_env();
    info!(
        configured = labmap_core::assist_configured(assistant.settings()),
        home = %labmap_core::labs_dir().display(),
        "starting labmap-mcp"
    );

    let service = LabmapServer::new(assistant, FsLayoutStore::new())
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| error!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}
