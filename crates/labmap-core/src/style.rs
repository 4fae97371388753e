//! Icon, color and status lookup tables.
//!
//! These carry no layout weight; the only contract is the lookup order:
//! item id first, then item type, then the table default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::NodeStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStyle {
    pub color: String,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StyleTable {
    /// Keyed by item id or item type.
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    /// Icon names, keyed by item id or item type.
    #[serde(default)]
    pub icons: BTreeMap<String, String>,
    #[serde(default = "default_color")]
    pub default_color: String,
    #[serde(default = "default_icon")]
    pub default_icon: String,
}

fn default_color() -> String {
    "#64748b".to_string()
}

fn default_icon() -> String {
    "server".to_string()
}

impl StyleTable {
    pub fn color_for(&self, id: &str, kind: &str) -> &str {
        lookup(&self.colors, id, kind).unwrap_or(self.default_color.as_str())
    }

    pub fn icon_for(&self, id: &str, kind: &str) -> &str {
        lookup(&self.icons, id, kind).unwrap_or(self.default_icon.as_str())
    }

    pub fn resolve(&self, id: &str, kind: &str) -> NodeStyle {
        NodeStyle {
            color: self.color_for(id, kind).to_string(),
            icon: self.icon_for(id, kind).to_string(),
        }
    }
}

fn lookup<'a>(table: &'a BTreeMap<String, String>, id: &str, kind: &str) -> Option<&'a str> {
    table
        .get(id)
        .or_else(|| table.get(kind))
        .map(String::as_str)
}

const BUILTIN_COLORS: &[(&str, &str)] = &[
    // hosts
    ("laptop", "#60a5fa"),
    ("host", "#60a5fa"),
    // cloud
    ("oci", "#f97316"),
    ("cloud-host", "#f97316"),
    // hypervisors
    ("proxmox", "#ef4444"),
    ("vmware", "#a855f7"),
    ("hypervisor", "#a855f7"),
    // vms
    ("kali", "#a855f7"),
    ("windows-11", "#22d3ee"),
    ("pfsense", "#10b981"),
    ("wazuh", "#f59e0b"),
    ("ubuntu-server", "#f97316"),
    ("vm", "#64748b"),
    // containers
    ("docker-local", "#3b82f6"),
    ("docker-oci", "#3b82f6"),
    ("container-runtime", "#3b82f6"),
    // services
    ("npm", "#10b981"),
    ("n8n", "#f97316"),
    ("portainer", "#22d3ee"),
    ("service", "#10b981"),
    // subnets
    ("ceh-subnet", "#a855f7"),
    ("subnet", "#64748b"),
];

const BUILTIN_ICONS: &[(&str, &str)] = &[
    ("laptop", "laptop"),
    ("oci", "cloud"),
    ("kali", "terminal"),
    ("windows-11", "monitor"),
    ("proxmox", "server"),
    ("docker-local", "container"),
    ("docker-oci", "container"),
    ("pfsense", "shield"),
    ("host", "laptop"),
    ("hypervisor", "hard-drive"),
    ("vm", "monitor"),
    ("container-runtime", "container"),
    ("cloud-host", "cloud"),
    ("service", "network"),
    ("subnet", "server"),
];

fn owned(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for StyleTable {
    fn default() -> Self {
        Self {
            colors: owned(BUILTIN_COLORS),
            icons: owned(BUILTIN_ICONS),
            default_color: default_color(),
            default_icon: default_icon(),
        }
    }
}

/// Presentation hints injected into the layout engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presentation {
    pub styles: StyleTable,
    pub status: BTreeMap<String, NodeStatus>,
}

impl Presentation {
    pub fn status_of(&self, id: &str) -> NodeStatus {
        self.status.get(id).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_wins_over_type() {
        let styles = StyleTable::default();
        // kali is a vm, but has its own entry
        assert_eq!(styles.color_for("kali", "vm"), "#a855f7");
        assert_eq!(styles.icon_for("kali", "vm"), "terminal");
    }

    #[test]
    fn type_is_used_when_id_has_no_entry() {
        let styles = StyleTable::default();
        assert_eq!(styles.color_for("grafana", "service"), "#10b981");
        assert_eq!(styles.icon_for("grafana", "service"), "network");
    }

    #[test]
    fn default_when_nothing_matches() {
        let styles = StyleTable::default();
        let style = styles.resolve("mystery", "toaster");
        assert_eq!(style.color, "#64748b");
        assert_eq!(style.icon, "server");
    }

    #[test]
    fn partial_table_from_json_keeps_defaults() {
        let styles: StyleTable = serde_json::from_str(r##"{"colors":{"nas":"#000000"}}"##).unwrap();
        assert_eq!(styles.color_for("nas", "storage"), "#000000");
        assert_eq!(styles.icon_for("nas", "storage"), "server");
        assert!(styles.icons.is_empty());
    }

    #[test]
    fn missing_status_is_unknown() {
        let mut presentation = Presentation::default();
        presentation.status.insert("oci".into(), NodeStatus::Up);
        assert_eq!(presentation.status_of("oci"), NodeStatus::Up);
        assert_eq!(presentation.status_of("kali"), NodeStatus::Unknown);
    }
}
