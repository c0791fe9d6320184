//! Election & Failover Engine (spec §4.B): decides node HA status from a
//! locked registry snapshot, enforces failover-delay policy, and updates
//! the local node's own row.
//!
//! The decision logic is written as pure functions over `NodeSnapshot` +
//! `Info` so it can be property-tested without a database connection; the
//! `async fn` wrappers at the bottom of the file are the only part that
//! touches `RegistryTx`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::error::{DbOutcome, HaError};
use crate::model::{NodeId, NodeRecord, NodeStatus};
use crate::registry::NodeRegistry;

pub const POLL_PERIOD: Duration = Duration::from_secs(5);

/// In-memory worker state carried across ticks (spec §3 "In-memory worker
/// state").
#[derive(Debug, Clone)]
pub struct Info {
    pub node_id: Option<NodeId>,
    pub name: String,
    pub ha_status: NodeStatus,
    pub failover_delay: Duration,
    pub ticks: u64,
    pub offline_ticks: u64,
    pub offline_ticks_active: u64,
    pub last_access_active: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Info {
    pub fn new(name: String) -> Self {
        Info {
            node_id: None,
            name,
            ha_status: NodeStatus::Unknown,
            failover_delay: crate::registry::DEFAULT_FAILOVER_DELAY,
            ticks: 0,
            offline_ticks: 0,
            offline_ticks_active: 0,
            last_access_active: None,
            error: None,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.name.is_empty()
    }

    /// `failover_delay/POLL_PERIOD`, the tick-count threshold used by both
    /// the standby reaper and the self-demotion rule.
    pub fn failover_ticks(&self) -> u64 {
        (self.failover_delay.as_secs() / POLL_PERIOD.as_secs()).max(1)
    }
}

/// Outcome of `register_node` / `check_nodes`: the status the caller
/// should adopt plus any ids the standby reaper wants marked unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub next_status: NodeStatus,
    pub unavailable: Vec<NodeId>,
}

/// Validate a standalone-mode snapshot: every existing row must be
/// `STOPPED` (spec §4.B step 3).
pub fn validate_standalone(nodes: &[NodeRecord]) -> Result<(), HaError> {
    for node in nodes {
        if node.status != NodeStatus::Stopped {
            return Err(HaError::StandaloneViolation {
                status: node.status.as_log_str().to_string(),
            });
        }
    }
    Ok(())
}

/// Validate a cluster-mode snapshot against `name`: no row may have an
/// empty name unless `STOPPED`; no other row may share our name unless
/// `STOPPED`. Returns whether this node should activate (no other row is
/// currently `ACTIVE`).
pub fn validate_cluster(name: &str, nodes: &[NodeRecord]) -> Result<bool, HaError> {
    let mut activate = true;
    for node in nodes {
        if node.name != name && node.is_standalone_row() && node.status != NodeStatus::Stopped {
            return Err(HaError::ClusterStandaloneRow {
                status: node.status.as_log_str().to_string(),
            });
        }
        if node.name == name && node.status != NodeStatus::Stopped {
            return Err(HaError::DuplicateNode {
                status: node.status.as_log_str().to_string(),
                name: name.to_string(),
            });
        }
        if node.name != name && node.status == NodeStatus::Active {
            activate = false;
        }
    }
    Ok(activate)
}

/// Finds the row matching `node_id` if already adopted, else by `name`.
pub fn find_own_row<'a>(
    nodes: &'a [NodeRecord],
    node_id: Option<&NodeId>,
    name: &str,
) -> Option<&'a NodeRecord> {
    if let Some(id) = node_id {
        if let Some(row) = nodes.iter().find(|n| &n.node_id == id) {
            return Some(row);
        }
    }
    nodes.iter().find(|n| n.name == name)
}

/// Standby Reaper (spec §4.B step 4, active branch): every `STANDBY` row
/// whose `last_access + failover_delay <= db_now` is stale. Exactly equal
/// is NOT stale (spec §8 boundary behavior).
pub fn standby_reaper(
    nodes: &[NodeRecord],
    failover_delay: Duration,
    db_now: DateTime<Utc>,
) -> Vec<NodeId> {
    let delay = chrono::Duration::from_std(failover_delay).unwrap_or(chrono::Duration::zero());
    nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Standby)
        .filter(|n| n.last_access + delay <= db_now)
        .map(|n| n.node_id.clone())
        .collect()
}

/// Active Peer Check (spec §4.B step 4, non-active branch). Mutates
/// `info`'s offline-tick counters; returns the next status and, if the
/// stale active peer must be reaped, its id.
pub fn active_peer_check(
    own_id: &NodeId,
    nodes: &[NodeRecord],
    info: &mut Info,
) -> (NodeStatus, Option<NodeId>) {
    let mut next = if info.ha_status == NodeStatus::Unknown {
        NodeStatus::Standby
    } else {
        info.ha_status
    };

    let active_row = nodes.iter().find(|n| n.status == NodeStatus::Active);

    match active_row {
        None => {
            next = NodeStatus::Active;
            info.offline_ticks_active = 0;
            info.last_access_active = None;
        }
        Some(row) if &row.node_id == own_id => {
            next = NodeStatus::Active;
            info.offline_ticks_active = 0;
            info.last_access_active = None;
        }
        Some(row) => {
            if info.last_access_active == Some(row.last_access) {
                info.offline_ticks_active += 1;
            } else {
                info.last_access_active = Some(row.last_access);
                info.offline_ticks_active = 0;
            }

            // "+1" anti-flap margin must be preserved verbatim (spec §4.B
            // step 4, §9 DESIGN NOTES).
            if info.offline_ticks_active > info.failover_ticks() + 1 {
                next = NodeStatus::Active;
                return (next, Some(row.node_id.clone()));
            }
        }
    }

    (next, None)
}

/// Commit-outcome handling (spec §4.B "Commit-outcome handling"). Given
/// the outcome of the tick's commit, updates `info` and returns the
/// status to adopt, if any changed, plus whether the loop must stop.
pub fn handle_commit_outcome(
    info: &mut Info,
    outcome: &DbOutcome<()>,
    next_status: NodeStatus,
) -> CommitEffect {
    match outcome {
        DbOutcome::Ok(()) => {
            info.offline_ticks = 0;
            let changed = info.ha_status != next_status;
            info.ha_status = next_status;
            CommitEffect {
                notify: changed && next_status != NodeStatus::Unknown,
                stop: false,
            }
        }
        DbOutcome::Down => {
            info.offline_ticks += 1;
            if !info.is_standalone()
                && info.ha_status == NodeStatus::Active
                && info.offline_ticks > info.failover_ticks()
            {
                info.ha_status = NodeStatus::Standby;
                return CommitEffect {
                    notify: true,
                    stop: false,
                };
            }
            CommitEffect {
                notify: false,
                stop: false,
            }
        }
        DbOutcome::Fail(err) => {
            info.ha_status = NodeStatus::Error;
            info.error = Some(err.to_string());
            CommitEffect {
                notify: true,
                stop: true,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEffect {
    pub notify: bool,
    pub stop: bool,
}

/// `register_node` (spec §4.B "Registration"). Two-phase: unlocked
/// existence check + insert, then a locking re-validation + promotion.
pub async fn register_node(
    registry: &NodeRegistry,
    info: &mut Info,
    settings: &Settings,
) -> DbOutcome<NodeStatus> {
    let mut tx = match registry.begin().await {
        DbOutcome::Ok(tx) => tx,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let nodes = match tx.list_nodes(false).await {
        DbOutcome::Ok(nodes) => nodes,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let existing = nodes.iter().find(|n| n.name == info.name);
    let node_id = if let Some(row) = existing {
        row.node_id.clone()
    } else {
        if let Err(e) = validate_for_mode(info, &nodes) {
            let _ = tx.rollback().await;
            return DbOutcome::Fail(e);
        }
        let new_id = NodeId::generate();
        match tx.insert_node(&info.name, &new_id).await {
            DbOutcome::Ok(()) => {}
            DbOutcome::Down => return DbOutcome::Down,
            DbOutcome::Fail(e) => return DbOutcome::Fail(e),
        }
        new_id
    };

    match tx.commit().await {
        DbOutcome::Ok(()) => {}
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    }

    let mut tx = match registry.begin().await {
        DbOutcome::Ok(tx) => tx,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let nodes = match tx.list_nodes(true).await {
        DbOutcome::Ok(nodes) => nodes,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    info.failover_delay = match tx.load_config().await {
        DbOutcome::Ok(delay) => delay,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let activate = match validate_for_mode(info, &nodes) {
        Ok(activate) => activate,
        Err(e) => {
            let _ = tx.rollback().await;
            return DbOutcome::Fail(e);
        }
    };

    let (address, port) = settings.resolve_external_address();
    let status = if activate {
        NodeStatus::Active
    } else {
        NodeStatus::Standby
    };

    match tx.update_self(&node_id, status, &address, port as i32).await {
        DbOutcome::Ok(()) => {}
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    }

    match tx.commit().await {
        DbOutcome::Ok(()) => {
            info.node_id = Some(node_id);
            DbOutcome::Ok(status)
        }
        DbOutcome::Down => DbOutcome::Down,
        DbOutcome::Fail(e) => DbOutcome::Fail(e),
    }
}

fn validate_for_mode(info: &Info, nodes: &[NodeRecord]) -> Result<bool, HaError> {
    if info.is_standalone() {
        validate_standalone(nodes)?;
        Ok(true)
    } else {
        validate_cluster(&info.name, nodes)
    }
}

/// `check_nodes` (spec §4.B "Periodic check"), run every `POLL_PERIOD`
/// with the table locked.
pub async fn check_nodes(registry: &NodeRegistry, info: &mut Info) -> DbOutcome<NodeStatus> {
    let mut tx = match registry.begin().await {
        DbOutcome::Ok(tx) => tx,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let nodes = match tx.list_nodes(true).await {
        DbOutcome::Ok(nodes) => nodes,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let own_row = match find_own_row(&nodes, info.node_id.as_ref(), &info.name) {
        Some(row) => row.clone(),
        None => {
            let _ = tx.rollback().await;
            return DbOutcome::Fail(HaError::OwnNodeMissing {
                name: info.name.clone(),
            });
        }
    };
    if info.node_id.is_none() {
        info.node_id = Some(own_row.node_id.clone());
    }

    info.failover_delay = match tx.load_config().await {
        DbOutcome::Ok(delay) => delay,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let db_now = match tx.db_now().await {
        DbOutcome::Ok(now) => now,
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    };

    let next_status;
    let mut unavailable = Vec::new();

    if info.is_standalone() {
        next_status = info.ha_status;
    } else if info.ha_status == NodeStatus::Active {
        unavailable = standby_reaper(&nodes, info.failover_delay, db_now);
        next_status = NodeStatus::Active;
        if !unavailable.is_empty() {
            match tx.mark_unavailable(&unavailable).await {
                DbOutcome::Ok(()) => {}
                DbOutcome::Down => return DbOutcome::Down,
                DbOutcome::Fail(e) => return DbOutcome::Fail(e),
            }
        }
    } else {
        let own_id = own_row.node_id.clone();
        let (next, reap) = active_peer_check(&own_id, &nodes, info);
        next_status = next;
        if let Some(id) = reap {
            unavailable.push(id.clone());
            match tx.mark_unavailable(std::slice::from_ref(&id)).await {
                DbOutcome::Ok(()) => {}
                DbOutcome::Down => return DbOutcome::Down,
                DbOutcome::Fail(e) => return DbOutcome::Fail(e),
            }
        }
    }

    let status_to_write = if next_status != own_row.status {
        Some(next_status)
    } else {
        None
    };

    match tx.update_self_tick(&own_row.node_id, status_to_write).await {
        DbOutcome::Ok(()) => {}
        DbOutcome::Down => return DbOutcome::Down,
        DbOutcome::Fail(e) => return DbOutcome::Fail(e),
    }

    match tx.commit().await {
        DbOutcome::Ok(()) => DbOutcome::Ok(next_status),
        DbOutcome::Down => DbOutcome::Down,
        DbOutcome::Fail(e) => DbOutcome::Fail(e),
    }
}

/// Shutdown finalizer (spec §4.B "Shutdown finalizer"). Best-effort: any
/// error is swallowed, matching the original's "errors are swallowed".
pub async fn shutdown_finalizer(registry: &NodeRegistry, info: &Info) {
    if !matches!(info.ha_status, NodeStatus::Active | NodeStatus::Standby) {
        return;
    }
    let Some(node_id) = &info.node_id else {
        return;
    };

    let mut tx = match registry.begin().await {
        DbOutcome::Ok(tx) => tx,
        _ => return,
    };

    if let DbOutcome::Fail(_) | DbOutcome::Down = tx.lock_nodes().await {
        return;
    }

    let _ = tx.update_self(node_id, NodeStatus::Stopped, "", 0).await;
    let _ = tx.commit().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

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

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn standalone_with_only_stopped_rows_is_valid() {
        let nodes = vec![node("", NodeStatus::Stopped, ts(0))];
        assert!(validate_standalone(&nodes).is_ok());
    }

    #[test]
    fn standalone_with_active_row_fails_with_exact_message() {
        let nodes = vec![node("", NodeStatus::Active, ts(0))];
        let err = validate_standalone(&nodes).unwrap_err();
        assert_eq!(err.to_string(), "found active node in standalone mode");
    }

    #[test]
    fn cluster_activates_when_no_peer_active() {
        let nodes = vec![node("beta", NodeStatus::Standby, ts(0))];
        assert!(validate_cluster("alpha", &nodes).unwrap());
    }

    #[test]
    fn cluster_does_not_activate_when_peer_active() {
        let nodes = vec![node("beta", NodeStatus::Active, ts(0))];
        assert!(!validate_cluster("alpha", &nodes).unwrap());
    }

    #[test]
    fn cluster_rejects_duplicate_active_name() {
        let nodes = vec![node("alpha", NodeStatus::Active, ts(0))];
        let err = validate_cluster("alpha", &nodes).unwrap_err();
        assert_eq!(err.to_string(), "found active duplicate \"alpha\" node");
    }

    #[test]
    fn standby_reaper_boundary_exactly_equal_is_not_reaped() {
        let delay = Duration::from_secs(60);
        let last_access = ts(0);
        let db_now = ts(60);
        let nodes = vec![node("beta", NodeStatus::Standby, last_access)];
        assert!(standby_reaper(&nodes, delay, db_now).is_empty());
    }

    #[test]
    fn standby_reaper_boundary_strictly_greater_is_reaped() {
        let delay = Duration::from_secs(60);
        let last_access = ts(0);
        let db_now = ts(61);
        let nodes = vec![node("beta", NodeStatus::Standby, last_access)];
        assert_eq!(standby_reaper(&nodes, delay, db_now).len(), 1);
    }

    #[test]
    fn active_peer_check_promotes_when_no_active_row() {
        let own_id = NodeId::generate();
        let mut info = Info::new("beta".to_string());
        info.ha_status = NodeStatus::Standby;
        let (next, reap) = active_peer_check(&own_id, &[], &mut info);
        assert_eq!(next, NodeStatus::Active);
        assert!(reap.is_none());
    }

    #[test]
    fn active_peer_check_anti_flap_margin_exact_ticks_does_not_promote() {
        let own_id = NodeId::generate();
        let peer = node("alpha", NodeStatus::Active, ts(0));
        let peer_id = peer.node_id.clone();
        let nodes = vec![peer];

        let mut info = Info::new("beta".to_string());
        info.ha_status = NodeStatus::Standby;
        info.failover_delay = Duration::from_secs(60);
        // The first call only establishes the last_access_active baseline
        // (offline_ticks_active stays 0); each call after that is one
        // genuine stale tick. failover_ticks() == 12, so 13 total calls
        // (12 genuine stale ticks) must NOT promote.
        for _ in 0..13 {
            let (next, reap) = active_peer_check(&own_id, &nodes, &mut info);
            assert_eq!(next, NodeStatus::Standby);
            assert!(reap.is_none());
        }
        let _ = peer_id;
    }

    #[test]
    fn active_peer_check_anti_flap_margin_plus_two_promotes() {
        let own_id = NodeId::generate();
        let peer = node("alpha", NodeStatus::Active, ts(0));
        let nodes = vec![peer];

        let mut info = Info::new("beta".to_string());
        info.ha_status = NodeStatus::Standby;
        info.failover_delay = Duration::from_secs(60);
        let mut last = (NodeStatus::Standby, None);
        // First call establishes the baseline; failover_ticks() + 2 == 14
        // genuine stale ticks needs 15 total calls.
        for _ in 0..15 {
            last = active_peer_check(&own_id, &nodes, &mut info);
        }
        assert_eq!(last.0, NodeStatus::Active);
        assert!(last.1.is_some());
    }

    #[test]
    fn self_demotion_after_sustained_outage() {
        let mut info = Info::new("alpha".to_string());
        info.ha_status = NodeStatus::Active;
        info.failover_delay = Duration::from_secs(60);
        // failover_ticks() == 12; offline_ticks must exceed 12 to demote.
        let mut effect = CommitEffect {
            notify: false,
            stop: false,
        };
        for _ in 0..13 {
            effect = handle_commit_outcome(&mut info, &DbOutcome::Down, NodeStatus::Active);
        }
        assert_eq!(info.ha_status, NodeStatus::Standby);
        assert!(effect.notify);
        assert!(!effect.stop);
    }

    #[test]
    fn fatal_commit_outcome_stops_loop() {
        let mut info = Info::new("alpha".to_string());
        info.ha_status = NodeStatus::Standby;
        let effect = handle_commit_outcome(
            &mut info,
            &DbOutcome::Fail(HaError::OwnNodeMissing {
                name: "alpha".to_string(),
            }),
            NodeStatus::Standby,
        );
        assert_eq!(info.ha_status, NodeStatus::Error);
        assert!(effect.stop);
        assert!(effect.notify);
    }

    proptest! {
        #[test]
        fn p5_standalone_never_has_two_non_stopped_rows(
            n in 0usize..6,
            active_idx in proptest::option::of(0usize..6),
        ) {
            let mut nodes = Vec::new();
            for i in 0..n {
                let status = if Some(i) == active_idx {
                    NodeStatus::Active
                } else {
                    NodeStatus::Stopped
                };
                nodes.push(node("", status, ts(0)));
            }
            let result = validate_standalone(&nodes);
            let has_non_stopped = nodes.iter().any(|n| n.status != NodeStatus::Stopped);
            prop_assert_eq!(result.is_err(), has_non_stopped);
        }

        #[test]
        fn p3_register_adopts_same_id_for_same_name(
            name in "[a-z]{1,8}",
        ) {
            let existing_id = NodeId::generate();
            let nodes = vec![node(&name, NodeStatus::Standby, ts(0))];
            let found = find_own_row(&nodes, None, &name);
            prop_assert!(found.is_some());
            let adopted = found.unwrap().node_id.clone();
            // Re-running the lookup with the adopted id must find the same row.
            let found_again = find_own_row(&nodes, Some(&adopted), &name);
            prop_assert_eq!(found_again.unwrap().node_id.clone(), adopted);
            let _ = existing_id;
        }
    }
}
