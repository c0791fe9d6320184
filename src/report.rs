//! Reporting (spec §4.E): renders a cluster snapshot as a self-describing
//! document and as a fixed-column human-readable table.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::model::NodeRecord;

/// One row of a cluster report (spec §4.E / §6 "Report document keys").
#[derive(Debug, Clone)]
pub struct NodeReportEntry {
    pub id: String,
    pub name: String,
    pub status: String,
    pub last_access: DateTime<Utc>,
    pub address: String,
    pub db_timestamp: DateTime<Utc>,
    pub last_access_age: chrono::Duration,
}

/// Builds an ordered report from a node snapshot (already ordered by
/// `node_id` ascending by `list_nodes`) and the database's current time.
pub fn build_report(nodes: &[NodeRecord], db_time: DateTime<Utc>) -> Vec<NodeReportEntry> {
    nodes
        .iter()
        .map(|node| NodeReportEntry {
            id: node.node_id.as_str().to_string(),
            name: node.name.clone(),
            status: node.status.as_str().to_string(),
            last_access: node.last_access,
            address: format!("{}:{}", node.address, node.port),
            db_timestamp: db_time,
            last_access_age: db_time - node.last_access,
        })
        .collect()
}

/// Serializes the report as a self-describing JSON array (spec §6: keys
/// `id`, `name`, `status`, `lastaccess`, `address`, `db_timestamp`,
/// `lastaccess_age`).
pub fn report_to_json(entries: &[NodeReportEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "name": e.name,
                    "status": e.status,
                    "lastaccess": e.last_access.to_rfc3339(),
                    "address": e.address,
                    "db_timestamp": e.db_timestamp.to_rfc3339(),
                    "lastaccess_age": e.last_access_age.num_seconds(),
                })
            })
            .collect(),
    )
}

/// Human-readable age, e.g. `"1h23m"`, matching the compact rendering the
/// original's report line uses for the age column.
fn humanize_age(age: chrono::Duration) -> String {
    let total_secs = age.num_seconds().max(0);
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}d{hours}h")
    } else if hours > 0 {
        format!("{hours}h{minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Renders one fixed-column table line per record, matching the original
/// report's `"%-25s %-25s %-30s %-11s %s"` column layout (index, id, name,
/// address, status, age).
pub fn format_table(entries: &[NodeReportEntry]) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .map(|(index, e)| {
            format!(
                "{:<4}{:<26}{:<26}{:<31}{:<12}{}",
                index,
                truncate(&e.id, 25),
                truncate(&e.name, 25),
                truncate(&e.address, 30),
                e.status,
                humanize_age(e.last_access_age),
            )
        })
        .collect()
}

/// Logs the table at INFO level, one line per call site per record,
/// matching `ha_report_cluster_status`'s one-log-line-per-node loop.
pub fn log_report(entries: &[NodeReportEntry]) {
    for line in format_table(entries) {
        tracing::info!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeId, NodeStatus};
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn sample_nodes() -> Vec<NodeRecord> {
        vec![
            NodeRecord {
                node_id: NodeId::generate(),
                name: "alpha".to_string(),
                status: NodeStatus::Active,
                last_access: ts(0),
                address: "10.0.0.1".to_string(),
                port: 10051,
            },
            NodeRecord {
                node_id: NodeId::generate(),
                name: "beta".to_string(),
                status: NodeStatus::Standby,
                last_access: ts(30),
                address: "10.0.0.2".to_string(),
                port: 10051,
            },
        ]
    }

    #[test]
    fn report_preserves_node_order() {
        let nodes = sample_nodes();
        let report = build_report(&nodes, ts(60));
        assert_eq!(report[0].name, "alpha");
        assert_eq!(report[1].name, "beta");
    }

    #[test]
    fn json_round_trips_structurally() {
        let nodes = sample_nodes();
        let report = build_report(&nodes, ts(60));
        let value = report_to_json(&report);
        let reparsed: Value = serde_json::from_str(&value.to_string()).unwrap();
        assert_eq!(value, reparsed);
        assert_eq!(reparsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn age_is_computed_from_db_time() {
        let nodes = sample_nodes();
        let report = build_report(&nodes, ts(90));
        assert_eq!(report[0].last_access_age.num_seconds(), 90);
        assert_eq!(report[1].last_access_age.num_seconds(), 60);
    }

    #[test]
    fn table_rows_match_entry_count() {
        let nodes = sample_nodes();
        let report = build_report(&nodes, ts(60));
        let table = format_table(&report);
        assert_eq!(table.len(), 2);
        assert!(table[0].contains("alpha"));
    }
}
