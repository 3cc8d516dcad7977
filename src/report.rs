//! Throughput report
//!
//! Collects one cell per (client node, server node) pair and renders them as
//! an HTML table. Rows are client nodes, columns are server nodes, and every
//! measurement for a pair is appended to its cell separated by `|`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ThroughputReport {
    nodes: Vec<String>,
    cells: BTreeMap<String, BTreeMap<String, String>>,
    server_cmd: String,
    client_cmd: String,
    memory_limit: String,
    generated_at: DateTime<Utc>,
}

/// Last `.`-separated component of a node name
pub fn short_name(node: &str) -> &str {
    node.rsplit('.').next().unwrap_or(node)
}

impl ThroughputReport {
    pub fn new(nodes: &[String], server_cmd: &str, client_cmd: &str, memory_limit: &str) -> Self {
        Self {
            nodes: nodes.to_vec(),
            cells: BTreeMap::new(),
            server_cmd: server_cmd.to_string(),
            client_cmd: client_cmd.to_string(),
            memory_limit: memory_limit.to_string(),
            generated_at: Utc::now(),
        }
    }

    /// Append a measurement of traffic from `client` to `server`
    pub fn add(&mut self, client: &str, server: &str, result: &str) {
        self.cells
            .entry(client.to_string())
            .or_default()
            .entry(server.to_string())
            .and_modify(|cell| {
                cell.push('|');
                cell.push_str(result);
            })
            .or_insert_with(|| result.to_string());
    }

    pub fn cell(&self, client: &str, server: &str) -> Option<&str> {
        self.cells
            .get(client)
            .and_then(|row| row.get(server))
            .map(String::as_str)
    }

    pub fn render_html(&self) -> String {
        format!(
            r#"<style>
table, th, td {{
    border: 1px solid black;
    border-collapse: collapse;
}}
tr:nth-child(even) {{background: #CCC}}
tr:nth-child(odd) {{background: #FFF}}
</style>
<H1>Pod to Pod network throughput, single connection. (MBytes/sec)</H1>
Cell format: <b><i>[bw via ip]|[bw via service]</i></b>
<br>
CPU limit: <b>no limit</b>
<br>
Memory Limit: <b>{memory_limit}</b>
<br>
Server cmd: <b>{server_cmd}</b>
<br>
Client cmd: <b>{client_cmd}</b>
<br>
Generated: <b>{generated_at}</b>
<br>
<br>
<table><tr><th>From/To</th>
{header}</tr>
{rows}</table>
"#,
            memory_limit = self.memory_limit,
            server_cmd = self.server_cmd,
            client_cmd = self.client_cmd,
            generated_at = self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            header = self.render_header(),
            rows = self.render_rows(),
        )
    }

    fn render_header(&self) -> String {
        self.nodes
            .iter()
            .map(|n| format!("<th>{}</th>\n", short_name(n)))
            .collect()
    }

    fn render_rows(&self) -> String {
        let mut html = String::new();
        for client in &self.nodes {
            let Some(row) = self.cells.get(client) else {
                continue;
            };
            html.push_str(&format!("<tr><td>{}</td>\n", short_name(client)));
            for server in &self.nodes {
                let cell = row.get(server).map(String::as_str).unwrap_or("-");
                html.push_str(&format!("<td>{}</td>\n", cell));
            }
            html.push_str("</tr>\n");
        }
        html
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_html())?;
        info!(path = %path.display(), "Wrote throughput report");
        Ok(())
    }
}
