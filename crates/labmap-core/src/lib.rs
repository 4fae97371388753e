pub mod error;
pub mod layout;
pub mod layouts;
pub mod rules;
pub mod style;
pub mod tree;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use error::LabError;
pub use layout::{tree_to_flow, Cursor, LayoutConfig, LayoutEngine, X_GAP, Y_GAP};
pub use style::{NodeStyle, Presentation, StyleTable};
pub use tree::{build_infra_tree, InfraTree, NodeIx, TreeNode};
pub use view::{apply_view, select_view, view_roots, WILDCARD};

// --- Input records ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Physical,
    Virtual,
    Cloud,
}

/// Ports show up both as numbers and as strings ("8080/tcp") in lab data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(untagged)]
pub enum Port {
    Number(u64),
    Text(String),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Number(n) => write!(f, "{n}"),
            Port::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Link {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One infrastructure asset as stored in a lab document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the containing asset. Unknown ids make this item a root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<Layer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Markdown documentation shown in the node panel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ItemMetadata>,
}

impl InfraItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            parent: None,
            layer: None,
            network: None,
            purpose: None,
            runtime: None,
            ip: None,
            dns: None,
            port: None,
            url: None,
            documentation: None,
            configuration: None,
            notes: None,
            tags: Vec::new(),
            links: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// A supplementary link between two assets (ssh, vpn, replication...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Up,
    Down,
    Off,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ids to show, or `"*"` for everything.
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expand_children: bool,
}

impl ViewConfig {
    pub fn is_wildcard(&self) -> bool {
        self.include.iter().any(|id| id == WILDCARD)
    }
}

/// Everything needed to draw one lab.
#[derive(Debug, Clone, Serialize, Deserialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabDocument {
    pub items: Vec<InfraItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, NodeStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub views: BTreeMap<String, ViewConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<StyleTable>,
}

impl LabDocument {
    pub fn presentation(&self) -> Presentation {
        Presentation {
            styles: self.styles.clone().unwrap_or_default(),
            status: self.status.clone(),
        }
    }
}

// --- Rendered graph (matches ReactFlow's node/edge structure) ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, schemars::JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNodeData {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub color: String,
    pub icon: String,
    pub status: NodeStatus,
    /// Structural parent. The only parent link on a rendered node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    pub position: Position,
    pub data: FlowNodeData,
}

fn default_node_type() -> String {
    "infra".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Structural,
    Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Generate a structural edge ID from parent and child node IDs.
pub fn structural_edge_id(parent: &str, child: &str) -> String {
    format!("{}-{}", parent, child)
}

/// Generate a connection edge ID from its endpoints.
pub fn connection_edge_id(from: &str, to: &str) -> String {
    format!("link-{}-{}", from, to)
}

/// Build, lay out and optionally filter a lab in one go.
///
/// An unknown view name leaves the full graph in place.
pub fn render_lab(doc: &LabDocument, view: Option<&str>) -> Result<FlowGraph, LabError> {
    let tree = build_infra_tree(&doc.items);
    let presentation = doc.presentation();
    let graph = tree_to_flow(&tree, &doc.connections, &presentation)?;
    match view {
        Some(name) => Ok(select_view(&graph, &doc.views, name).unwrap_or(graph)),
        None => Ok(graph),
    }
}

/// Reject documents that break id uniqueness. Softer issues are only logged.
pub fn validate_lab(doc: &LabDocument) -> Result<(), LabError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for item in &doc.items {
        if item.id.trim().is_empty() {
            return Err(LabError::Invalid(format!(
                "item '{}' has an empty id",
                item.name
            )));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(LabError::Invalid(format!("duplicate item id '{}'", item.id)));
        }
    }

    for (view_id, view) in &doc.views {
        for id in &view.include {
            if id != WILDCARD && !seen.contains(id.as_str()) {
                warn!(view = %view_id, id = %id, "view includes unknown item");
            }
        }
    }
    for id in doc.status.keys() {
        if !seen.contains(id.as_str()) {
            warn!(id = %id, "status entry for unknown item");
        }
    }
    Ok(())
}

// --- Storage ---

/// Resolve the labmap home directory ($LABMAP_HOME or ~/.labmap/).
pub fn labs_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("LABMAP_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".labmap")
}

/// Lab names become file names: no separators, no leading dot.
pub fn check_lab_name(name: &str) -> Result<(), LabError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(LabError::Invalid(format!("invalid lab name '{}'", name)))
    }
}

fn lab_path(name: &str) -> Result<PathBuf, LabError> {
    check_lab_name(name)?;
    Ok(labs_dir().join(format!("{}.lab.json", name)))
}

/// List all lab names (without .lab.json extension), sorted.
pub fn list_labs() -> Result<Vec<String>, LabError> {
    let dir = labs_dir();
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_suffix(".lab.json").map(|n| n.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Read a lab as raw JSON string.
pub fn read_lab_raw(name: &str) -> Result<String, LabError> {
    match fs::read_to_string(lab_path(name)?) {
        Ok(raw) => Ok(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LabError::NotFound(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read a lab as a typed document.
pub fn read_lab(name: &str) -> Result<LabDocument, LabError> {
    let raw = read_lab_raw(name)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write a lab from raw JSON string.
///
/// Uses atomic write (temp file + rename) so readers never see a
/// half-written document.
pub fn write_lab_raw(name: &str, data: &str) -> Result<(), LabError> {
    let path = lab_path(name)?;
    let dir = labs_dir();
    fs::create_dir_all(&dir)?;
    let tmp = dir.join(format!(".{}.lab.json.tmp", name));
    write_atomic(&tmp, &path, data)?;
    debug!(lab = name, bytes = data.len(), "lab written");
    Ok(())
}

/// Write through `tmp`, then rename over `path`. The temp file never
/// outlives a failed rename.
fn write_atomic(tmp: &Path, path: &Path, data: &str) -> Result<(), LabError> {
    fs::write(tmp, data)?;
    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Validate and write a typed lab document.
pub fn write_lab(name: &str, doc: &LabDocument) -> Result<(), LabError> {
    validate_lab(doc)?;
    let json = serde_json::to_string_pretty(doc)?;
    write_lab_raw(name, &json)
}

/// Delete a lab by name.
pub fn delete_lab(name: &str) -> Result<(), LabError> {
    let path = lab_path(name)?;
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}

// --- Assistant settings ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistSettings {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// OpenAI-compatible endpoint (LiteLLM, a local proxy...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    500
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            provider: String::new(),
            api_key: String::new(),
            model: String::new(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl AssistSettings {
    /// Overlay `LLM_*` variables looked up through `var`.
    pub fn with_env_overrides<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("LLM_PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = var("LLM_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = var("LLM_MODEL") {
            self.model = v;
        }
        if let Some(v) = var("LLM_API_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = var("LLM_TEMPERATURE") {
            match v.parse() {
                Ok(t) => self.temperature = t,
                Err(_) => warn!(value = %v, "ignoring invalid LLM_TEMPERATURE"),
            }
        }
        if let Some(v) = var("LLM_MAX_TOKENS") {
            match v.parse() {
                Ok(n) => self.max_tokens = n,
                Err(_) => warn!(value = %v, "ignoring invalid LLM_MAX_TOKENS"),
            }
        }
        self
    }
}

fn settings_path() -> PathBuf {
    labs_dir().join("settings.json")
}

/// Settings from disk with environment overrides applied. Missing or
/// unreadable files fall back to defaults.
pub fn read_settings() -> AssistSettings {
    let path = settings_path();
    let from_file = if path.exists() {
        fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        AssistSettings::default()
    };
    from_file.with_env_overrides(|key| std::env::var(key).ok())
}

pub fn write_settings(settings: &AssistSettings) -> Result<(), LabError> {
    fs::create_dir_all(labs_dir())?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(), json)?;
    Ok(())
}

pub fn assist_configured(settings: &AssistSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama"
            || settings.base_url.is_some()
            || !settings.api_key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, parent: Option<&str>) -> InfraItem {
        let item = InfraItem::new(id, id.to_uppercase(), "vm");
        match parent {
            Some(p) => item.with_parent(p),
            None => item,
        }
    }

    #[test]
    fn item_json_uses_wire_names() {
        let raw = r#"{"id":"kali","name":"Kali Linux","type":"vm","parent":"proxmox","layer":"virtual","port":8080}"#;
        let item: InfraItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.kind, "vm");
        assert_eq!(item.parent.as_deref(), Some("proxmox"));
        assert_eq!(item.layer, Some(Layer::Virtual));
        assert_eq!(item.port, Some(Port::Number(8080)));

        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["type"], "vm");
        assert!(back.get("tags").is_none());
    }

    #[test]
    fn string_ports_are_accepted() {
        let raw = r#"{"id":"npm","name":"NPM","type":"service","port":"81/tcp"}"#;
        let item: InfraItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.port.unwrap().to_string(), "81/tcp");
    }

    #[test]
    fn failed_rename_cleans_up_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".home.lab.json.tmp");
        // a non-empty directory in the way makes the rename fail
        let target = dir.path().join("home.lab.json");
        fs::create_dir_all(target.join("blocker")).unwrap();

        assert!(matches!(write_atomic(&tmp, &target, "{}"), Err(LabError::Io(_))));
        assert!(!tmp.exists());
    }

    #[test]
    fn atomic_write_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".home.lab.json.tmp");
        let target = dir.path().join("home.lab.json");
        write_atomic(&tmp, &target, "old").unwrap();
        write_atomic(&tmp, &target, "new").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(!tmp.exists());
    }

    #[test]
    fn out_of_range_port_does_not_reject_the_item() {
        let raw = r#"{"id":"sim","name":"Sim","type":"service","port":70000}"#;
        let item: InfraItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.port, Some(Port::Number(70000)));
        assert_eq!(item.port.unwrap().to_string(), "70000");
    }

    #[test]
    fn unknown_status_strings_become_unknown() {
        let status: BTreeMap<String, NodeStatus> =
            serde_json::from_str(r#"{"a":"up","b":"rebooting","c":"off"}"#).unwrap();
        assert_eq!(status["a"], NodeStatus::Up);
        assert_eq!(status["b"], NodeStatus::Unknown);
        assert_eq!(status["c"], NodeStatus::Off);
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let doc = LabDocument {
            items: vec![item("a", None), item("a", None)],
            ..Default::default()
        };
        assert!(matches!(validate_lab(&doc), Err(LabError::Invalid(_))));
    }

    #[test]
    fn lab_names_stay_inside_home() {
        assert!(check_lab_name("home-lab_2").is_ok());
        assert!(check_lab_name("v1.2").is_ok());
        for bad in ["", "../etc", ".hidden", "a/b", "a\\b"] {
            assert!(matches!(check_lab_name(bad), Err(LabError::Invalid(_))), "{bad}");
        }
    }

    #[test]
    fn validate_rejects_blank_ids() {
        let doc = LabDocument {
            items: vec![item(" ", None)],
            ..Default::default()
        };
        assert!(validate_lab(&doc).is_err());
    }

    #[test]
    fn render_lab_with_unknown_view_keeps_full_graph() {
        let doc = LabDocument {
            items: vec![item("a", None), item("b", Some("a"))],
            ..Default::default()
        };
        let full = render_lab(&doc, None).unwrap();
        let missing = render_lab(&doc, Some("nope")).unwrap();
        assert_eq!(full, missing);
        assert_eq!(full.nodes.len(), 2);
    }

    #[test]
    fn render_lab_applies_named_view() {
        let mut doc = LabDocument {
            items: vec![item("a", None), item("b", Some("a")), item("c", None)],
            ..Default::default()
        };
        doc.views.insert(
            "only-c".into(),
            ViewConfig {
                name: "Only C".into(),
                description: String::new(),
                include: vec!["c".into()],
                expand_children: false,
            },
        );
        let graph = render_lab(&doc, Some("only-c")).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].id, "c");
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let base = AssistSettings {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            ..Default::default()
        };
        let settings = base.with_env_overrides(|key| match key {
            "LLM_MODEL" => Some("qwen3".into()),
            "LLM_API_URL" => Some("http://localhost:4000/v1".into()),
            "LLM_MAX_TOKENS" => Some("not-a-number".into()),
            _ => None,
        });
        assert_eq!(settings.model, "qwen3");
        assert_eq!(settings.base_url.as_deref(), Some("http://localhost:4000/v1"));
        assert_eq!(settings.max_tokens, 500);
        assert!(assist_configured(&settings));
    }

    #[test]
    fn assist_needs_a_key_unless_local() {
        let mut settings = AssistSettings {
            provider: "anthropic".into(),
            model: "claude".into(),
            ..Default::default()
        };
        assert!(!assist_configured(&settings));
        settings.provider = "ollama".into();
        assert!(assist_configured(&settings));
    }
}
