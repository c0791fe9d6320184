//! HA Control Loop (spec §4.C): owns `Info` and the main scheduler,
//! orchestrating the Election & Failover Engine and the Control Channel.
//!
//! Modeled as a single-threaded `tokio::select!` over a dynamic timer
//! deadline and the inbound message channel, per the original's
//! periodic-loop-plus-message-pump design — a fixed `tokio::time::interval`
//! cannot express the catch-up rescheduling this loop requires.

use tokio::time::{Duration, Instant};

use crate::config::Settings;
use crate::election::{self, Info, POLL_PERIOD};
use crate::error::DbOutcome;
use crate::model::NodeStatus;
use crate::registry::NodeRegistry;

use super::channel::{ControlRequest, ControlService, StatusPayload};

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Runs the HA worker to completion (process exit or channel closed).
/// `carried_over_status` models a supervised restart with state
/// carry-over (spec §4.C "Initial nextcheck"): when present, the first
/// tick is delayed a full minute instead of firing a registration
/// immediately.
pub async fn run(
    registry: NodeRegistry,
    settings: Settings,
    mut service: ControlService,
    carried_over_status: Option<NodeStatus>,
) {
    let mut info = Info::new(settings.ha.node_name.clone());
    let lastcheck = Instant::now();
    let mut nextcheck;

    match carried_over_status {
        Some(status) if status != NodeStatus::Unknown => {
            info.ha_status = status;
            nextcheck = lastcheck + ONE_MINUTE;
        }
        _ => {
            let outcome = election::register_node(&registry, &mut info, &settings).await;
            match outcome {
                DbOutcome::Ok(status) => {
                    info.ha_status = status;
                    service.notify_status(status, "").await;
                    nextcheck = lastcheck + POLL_PERIOD;
                }
                DbOutcome::Down => {
                    nextcheck = lastcheck + POLL_PERIOD;
                }
                DbOutcome::Fail(e) => {
                    info.ha_status = NodeStatus::Error;
                    info.error = Some(e.to_string());
                    service.notify_status(NodeStatus::Error, &e.to_string()).await;
                    return pause_loop(&mut service, &registry, &mut info).await;
                }
            }
        }
    }

    loop {
        let timeout = nextcheck.saturating_duration_since(Instant::now());

        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                if Instant::now() < nextcheck {
                    continue;
                }
                if info.ha_status != NodeStatus::Error {
                    let tick_result = if info.ha_status == NodeStatus::Unknown {
                        election::register_node(&registry, &mut info, &settings).await
                    } else {
                        election::check_nodes(&registry, &mut info).await
                    };

                    let (commit_outcome, next_status) = match tick_result {
                        DbOutcome::Ok(status) => (DbOutcome::Ok(()), status),
                        DbOutcome::Down => (DbOutcome::Down, info.ha_status),
                        DbOutcome::Fail(e) => (DbOutcome::Fail(e), info.ha_status),
                    };

                    let effect = election::handle_commit_outcome(&mut info, &commit_outcome, next_status);
                    if effect.notify {
                        let message = info.error.clone().unwrap_or_default();
                        service.notify_status(info.ha_status, &message).await;
                    }
                    if effect.stop {
                        return pause_loop(&mut service, &registry, &mut info).await;
                    }
                }

                let mut next = nextcheck + POLL_PERIOD;
                while next <= Instant::now() {
                    next += POLL_PERIOD;
                }
                nextcheck = next;
            }
            message = service.recv() => {
                match message {
                    Some(ControlRequest::Register) => {}
                    Some(ControlRequest::Status { reply }) => {
                        let message = info.error.clone().unwrap_or_default();
                        let _ = reply.send(StatusPayload::from_status(info.ha_status, &message));
                    }
                    Some(ControlRequest::Pause) => {
                        return pause_loop(&mut service, &registry, &mut info).await;
                    }
                    Some(ControlRequest::Stop) => {
                        election::shutdown_finalizer(&registry, &info).await;
                        return;
                    }
                    Some(ControlRequest::ReportNodes) => {
                        report_nodes(&registry).await;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Second loop entered after `PAUSE` or a fatal error: services only
/// `REGISTER`, `STATUS`, `STOP`, waiting indefinitely between messages
/// (spec §4.C "After PAUSE").
async fn pause_loop(service: &mut ControlService, registry: &NodeRegistry, info: &mut Info) {
    loop {
        match service.recv().await {
            Some(ControlRequest::Register) => {}
            Some(ControlRequest::Status { reply }) => {
                let message = info.error.clone().unwrap_or_default();
                let _ = reply.send(StatusPayload::from_status(info.ha_status, &message));
            }
            Some(ControlRequest::Stop) => {
                election::shutdown_finalizer(registry, info).await;
                return;
            }
            Some(ControlRequest::Pause) | Some(ControlRequest::ReportNodes) => {}
            None => return,
        }
    }
}

/// `REPORT_NODES`: reads database time and the full node list with no
/// lock, then logs the fixed-column table (spec §4.E).
async fn report_nodes(registry: &NodeRegistry) {
    let mut tx = match registry.begin().await {
        DbOutcome::Ok(tx) => tx,
        _ => return,
    };

    let nodes = match tx.list_nodes(false).await {
        DbOutcome::Ok(nodes) => nodes,
        _ => {
            let _ = tx.rollback().await;
            return;
        }
    };

    let db_now = match tx.db_now().await {
        DbOutcome::Ok(now) => now,
        _ => {
            let _ = tx.rollback().await;
            return;
        }
    };

    let _ = tx.rollback().await;

    let report = crate::report::build_report(&nodes, db_now);
    crate::report::log_report(&report);
}
