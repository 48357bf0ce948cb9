//! Graph export: DOT, Mermaid, and JSON renderings of a [`KnowledgeGraph`].

use std::str::FromStr;

use kgrag_core::KnowledgeGraph;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Dot,
    Mermaid,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "dot" | "graphviz" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

impl ExportFormat {
    #[must_use]
    pub fn render(self, graph: &KnowledgeGraph) -> String {
        match self {
            Self::Json => format_json(graph),
            Self::Dot => format_dot(graph),
            Self::Mermaid => format_mermaid(graph),
        }
    }
}

/// Format a graph as DOT (Graphviz) output.
#[must_use]
pub fn format_dot(graph: &KnowledgeGraph) -> String {
    let mut out = String::from("digraph kgrag {\n  rankdir=LR;\n  node [shape=box];\n\n");

    for node in &graph.nodes {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\"];\n",
            dot_text(&node.id),
            dot_text(display_label(node))
        ));
    }

    out.push('\n');

    for edge in &graph.edges {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
            dot_text(&edge.source),
            dot_text(&edge.target),
            dot_text(&edge.edge_type)
        ));
    }

    if graph.is_truncated {
        out.push_str("\n  // truncated\n");
    }
    out.push_str("}\n");
    out
}

/// Format a graph as a Mermaid diagram.
#[must_use]
pub fn format_mermaid(graph: &KnowledgeGraph) -> String {
    let mut out = String::from("graph LR\n");

    for node in &graph.nodes {
        out.push_str(&format!(
            "  {}[\"{}\"]\n",
            mermaid_id(&node.id),
            mermaid_text(display_label(node))
        ));
    }

    out.push('\n');

    for edge in &graph.edges {
        out.push_str(&format!(
            "  {} -->|{}| {}\n",
            mermaid_id(&edge.source),
            mermaid_text(&edge.edge_type),
            mermaid_id(&edge.target)
        ));
    }

    out
}

/// Format a graph as pretty-printed JSON.
#[must_use]
pub fn format_json(graph: &KnowledgeGraph) -> String {
    serde_json::to_string_pretty(graph).unwrap_or_else(|_| "{}".to_string())
}

fn display_label(node: &kgrag_core::GraphNode) -> &str {
    node.labels.first().map_or(node.id.as_str(), String::as_str)
}

/// Contents of a double-quoted DOT string.
fn dot_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Label text with Mermaid's delimiters replaced by entity codes.
fn mermaid_text(text: &str) -> String {
    text.replace('"', "#quot;").replace('|', "#124;")
}

/// Mermaid node ids may only contain word characters.
fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
