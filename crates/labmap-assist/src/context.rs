//! Topology context handed to the model alongside the question.

use labmap_core::InfraItem;

const NETWORK_WORDS: &[&str] = &["vlan", "red", "network", "subred"];
const SERVICE_WORDS: &[&str] = &[
    "servicio",
    "service",
    "docker",
    "container",
    "aplicacion",
    "vm",
    "virtual",
];
const IP_WORDS: &[&str] = &["ip", "direccion", "address"];
const NODE_WORDS: &[&str] = &["nodo", "node", "servidor", "server", "maquina", "host"];

const FULL_CONTEXT_WORDS: &[&str] = &[
    "todo",
    "all",
    "completo",
    "full",
    "entire",
    "topology",
    "topologia",
    "diagrama",
    "diagram",
    "estructura completa",
    "export",
    "show all",
];

const SERVICE_KINDS: &[&str] = &["vm", "container", "hypervisor", "service"];

fn mentions(query: &str, words: &[&str]) -> bool {
    words.iter().any(|w| query.contains(w))
}

/// Compact overview: counts per type, networks and configured IPs.
pub fn infrastructure_summary(items: &[InfraItem]) -> String {
    let mut kinds: Vec<(&str, usize)> = Vec::new();
    let mut networks: Vec<&str> = Vec::new();
    for item in items {
        match kinds.iter_mut().find(|(k, _)| *k == item.kind) {
            Some((_, count)) => *count += 1,
            None => kinds.push((item.kind.as_str(), 1)),
        }
        if let Some(net) = item.network.as_deref() {
            if !networks.contains(&net) {
                networks.push(net);
            }
        }
    }
    let ips = items.iter().filter(|i| i.ip.is_some()).count();

    let kinds = kinds
        .iter()
        .map(|(k, n)| format!("{k} ({n})"))
        .collect::<Vec<_>>()
        .join(", ");
    let networks = if networks.is_empty() {
        "None".to_string()
    } else {
        networks.join(", ")
    };

    format!(
        "Infrastructure Summary:\n\
         - Total nodes: {}\n\
         - Node types: {}\n\
         - Networks: {}\n\
         - IP addresses: {} configured",
        items.len(),
        kinds,
        networks,
        ips
    )
}

/// Only the lines the question seems to be about. Falls back to the
/// summary when no keyword matches or nothing relevant is found.
pub fn relevant_context(query: &str, items: &[InfraItem]) -> String {
    let query = query.to_lowercase();
    let wants_network = mentions(&query, NETWORK_WORDS);
    let wants_service = mentions(&query, SERVICE_WORDS);
    let wants_ip = mentions(&query, IP_WORDS);
    let wants_node = mentions(&query, NODE_WORDS);

    if !(wants_network || wants_service || wants_ip || wants_node) {
        return infrastructure_summary(items);
    }

    let mut out = String::from("Relevant Infrastructure Data:\n\n");
    let mut found = false;
    for item in items {
        let head = format!("- {} ({})", item.name, item.kind);

        if wants_network {
            if let Some(net) = &item.network {
                out.push_str(&format!("{head}: Network {net}\n"));
                found = true;
            }
        }
        if wants_ip {
            if let Some(ip) = &item.ip {
                let port = item.port.as_ref().map(|p| format!(":{p}")).unwrap_or_default();
                out.push_str(&format!("{head}: IP {ip}{port}\n"));
                found = true;
            }
        }
        if wants_service && SERVICE_KINDS.contains(&item.kind.as_str()) {
            out.push_str(&head);
            if let Some(purpose) = &item.purpose {
                out.push_str(&format!(": {purpose}"));
            }
            if let Some(ip) = &item.ip {
                out.push_str(&format!(" - IP: {ip}"));
            }
            out.push('\n');
            found = true;
        }
        if wants_node {
            out.push_str(&head);
            if let Some(purpose) = &item.purpose {
                out.push_str(&format!(": {purpose}"));
            }
            if let Some(parent) = &item.parent {
                out.push_str(&format!(" - Parent: {parent}"));
            }
            out.push('\n');
            found = true;
        }
    }

    if found {
        out
    } else {
        infrastructure_summary(items)
    }
}

/// Case-insensitive substring match on item names.
pub fn find_item_by_name<'a>(name: &str, items: &'a [InfraItem]) -> Option<&'a InfraItem> {
    let name = name.to_lowercase();
    items.iter().find(|i| i.name.to_lowercase().contains(&name))
}

pub fn full_context(items: &[InfraItem]) -> String {
    serde_json::to_string_pretty(items).unwrap_or_else(|e| format!("Serialization error: {e}"))
}

pub fn needs_full_context(query: &str) -> bool {
    mentions(&query.to_lowercase(), FULL_CONTEXT_WORDS)
}

/// Full JSON for whole-topology questions, otherwise the relevant slice.
pub fn build_context(query: &str, items: &[InfraItem]) -> String {
    if needs_full_context(query) {
        full_context(items)
    } else {
        relevant_context(query, items)
    }
}
