//! End-to-end seed-case scenarios from the spec's testable properties,
//! exercised against the pure decision functions (no database).

use chrono::{DateTime, TimeZone, Utc};
use ha_node_manager::election::{
    active_peer_check, handle_commit_outcome, validate_cluster, CommitEffect, Info,
};
use ha_node_manager::error::DbOutcome;
use ha_node_manager::model::{NodeId, NodeRecord, NodeStatus};

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

fn node(name: &str, status: NodeStatus, last_access: DateTime<Utc>) -> NodeRecord {
    NodeRecord {
        node_id: NodeId::generate(),
        name: name.to_string(),
        status,
        last_access,
        address: String::new(),
        port: 0,
    }
}

/// Seed case 1: bootstrap against an empty table activates immediately.
#[test]
fn bootstrap_empty_table_activates() {
    let nodes: Vec<NodeRecord> = Vec::new();
    let activate = validate_cluster("alpha", &nodes).unwrap();
    assert!(activate);
}

/// Seed case 2: a second node joining while alpha is fresh-active becomes standby.
#[test]
fn second_node_joins_as_standby() {
    let nodes = vec![node("alpha", NodeStatus::Active, ts(1_000))];
    let activate = validate_cluster("beta", &nodes).unwrap();
    assert!(!activate);
}

/// Seed case 3: active dies and stays stale while the standby keeps
/// polling; once enough genuine stale ticks accumulate past the +1 margin,
/// the standby promotes itself and reaps the stale active row.
#[test]
fn active_dies_and_standby_promotes_after_failover_delay() {
    let own_id = NodeId::generate();
    let stale_active = node("alpha", NodeStatus::Active, ts(0));
    let nodes = vec![stale_active];

    let mut info = Info::new("beta".to_string());
    info.ha_status = NodeStatus::Standby;
    info.failover_delay = std::time::Duration::from_secs(60);

    // The first call only establishes the last_access_active baseline
    // (offline_ticks_active stays 0); each call after that is one genuine
    // stale tick. failover_ticks() == 12, so 14 total calls (13 genuine
    // stale ticks) must still NOT promote (13 does not exceed 13).
    let mut result = (NodeStatus::Standby, None);
    for _ in 0..14 {
        result = active_peer_check(&own_id, &nodes, &mut info);
        assert_eq!(result.0, NodeStatus::Standby, "must not promote before the margin");
    }

    // The 15th call reaches 14 genuine stale ticks, exceeding
    // failover_ticks() + 1 == 13, so it promotes now.
    result = active_peer_check(&own_id, &nodes, &mut info);
    assert_eq!(result.0, NodeStatus::Active);
    assert!(result.1.is_some());
}

/// Seed case 4: transient DB outage on the active node for 7 ticks
/// (35s < failover_delay=60s ⇒ failover_ticks()=12) does not self-demote,
/// and offline_ticks resets to 0 once the connection recovers.
#[test]
fn transient_outage_recovers_without_demotion() {
    let mut info = Info::new("alpha".to_string());
    info.ha_status = NodeStatus::Active;
    info.failover_delay = std::time::Duration::from_secs(60);

    let mut effect = CommitEffect {
        notify: false,
        stop: false,
    };
    for _ in 0..7 {
        effect = handle_commit_outcome(&mut info, &DbOutcome::Down, NodeStatus::Active);
    }
    assert_eq!(info.offline_ticks, 7);
    assert_eq!(info.ha_status, NodeStatus::Active);
    assert!(!effect.notify);

    let recovery = handle_commit_outcome(&mut info, &DbOutcome::Ok(()), NodeStatus::Active);
    assert_eq!(info.offline_ticks, 0);
    assert_eq!(info.ha_status, NodeStatus::Active);
    assert!(!recovery.notify);
}

/// Seed case 6: clean shutdown restores invariant P5 by writing the own
/// row to STOPPED (exercised here at the status-transition level; the
/// actual row write is covered by `shutdown_finalizer`, which requires a
/// live pool and is not exercised in this pure-function test).
#[test]
fn clean_shutdown_status_is_terminal() {
    let mut info = Info::new("alpha".to_string());
    info.ha_status = NodeStatus::Active;
    // The control loop sets ha_status to Stopped only via the registry
    // write in shutdown_finalizer; here we assert Stopped is distinct
    // from every active-cluster state so dispatch code cannot confuse it.
    assert_ne!(NodeStatus::Stopped, NodeStatus::Active);
    assert_ne!(NodeStatus::Stopped, NodeStatus::Standby);
    info.ha_status = NodeStatus::Stopped;
    assert_eq!(info.ha_status, NodeStatus::Stopped);
}
