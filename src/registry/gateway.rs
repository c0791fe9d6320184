use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use super::duration::parse_failover_delay;
use crate::error::DbOutcome;
use crate::model::{NodeId, NodeRecord, NodeStatus};

/// Owns the pool; hands out transactional handles. All reads/writes of the
/// `ha_node` table and the `config` row go through this type (spec §4.A).
#[derive(Clone)]
pub struct NodeRegistry {
    pool: PgPool,
}

impl NodeRegistry {
    pub fn new(pool: PgPool) -> Self {
        NodeRegistry { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens a connection on demand and starts a transaction.
    pub async fn begin(&self) -> DbOutcome<RegistryTx> {
        DbOutcome::from_sqlx_result(self.pool.begin().await).map(|tx| RegistryTx { tx })
    }
}

/// A single open transaction against the registry. Every method takes
/// `&mut self` and aborts the whole logical operation on the first
/// `Down`/`Fail`, matching the original's "abort on first bad result"
/// control flow.
pub struct RegistryTx {
    tx: Transaction<'static, Postgres>,
}

impl RegistryTx {
    /// Returns the complete table ordered by `node_id`. With `lock=true`
    /// this is the vendor-equivalent of `SELECT ... FOR UPDATE`, giving
    /// cross-transaction mutual exclusion on leadership decisions.
    pub async fn list_nodes(&mut self, lock: bool) -> DbOutcome<Vec<NodeRecord>> {
        let query = if lock {
            "SELECT ha_nodeid, name, status, lastaccess, address, port \
             FROM ha_node ORDER BY ha_nodeid FOR UPDATE"
        } else {
            "SELECT ha_nodeid, name, status, lastaccess, address, port \
             FROM ha_node ORDER BY ha_nodeid"
        };

        let rows = match sqlx::query(query).fetch_all(&mut *self.tx).await {
            Ok(rows) => rows,
            Err(err) => return DbOutcome::from_sqlx_result(Err(err)),
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_record(&row) {
                Ok(record) => records.push(record),
                Err(e) => return DbOutcome::Fail(e),
            }
        }
        DbOutcome::Ok(records)
    }

    /// Acquires the table lock without returning rows, used at shutdown.
    pub async fn lock_nodes(&mut self) -> DbOutcome<()> {
        match sqlx::query("SELECT ha_nodeid FROM ha_node FOR UPDATE")
            .fetch_all(&mut *self.tx)
            .await
        {
            Ok(_) => DbOutcome::Ok(()),
            Err(err) => DbOutcome::from_sqlx_result(Err(err)),
        }
    }

    /// Reads `config.ha_failover_delay` and parses it; falls back to the
    /// 60 s default if the row is absent.
    pub async fn load_config(&mut self) -> DbOutcome<Duration> {
        let row = sqlx::query("SELECT ha_failover_delay FROM config LIMIT 1")
            .fetch_optional(&mut *self.tx)
            .await;

        match row {
            Ok(Some(row)) => {
                let raw: Option<String> = row.try_get("ha_failover_delay").ok();
                DbOutcome::Ok(parse_failover_delay(raw.as_deref()))
            }
            Ok(None) => DbOutcome::Ok(parse_failover_delay(None)),
            Err(err) => DbOutcome::from_sqlx_result(Err(err)),
        }
    }

    /// The database's current timestamp; never the local clock (spec §9:
    /// "Strictly separate two clocks").
    pub async fn db_now(&mut self) -> DbOutcome<DateTime<Utc>> {
        let result = sqlx::query("SELECT NOW() AS now").fetch_one(&mut *self.tx).await;
        match result {
            Ok(row) => match row.try_get::<DateTime<Utc>, _>("now") {
                Ok(now) => DbOutcome::Ok(now),
                Err(err) => DbOutcome::from_sqlx_result(Err(err)),
            },
            Err(err) => DbOutcome::from_sqlx_result(Err(err)),
        }
    }

    /// Inserts a new row with `status=STOPPED`, `last_access=NOW()`.
    pub async fn insert_node(&mut self, name: &str, id: &NodeId) -> DbOutcome<()> {
        let result = sqlx::query(
            "INSERT INTO ha_node (ha_nodeid, name, status, lastaccess, address, port) \
             VALUES ($1, $2, $3, NOW(), '', 0)",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(i32::from(NodeStatus::Stopped))
        .execute(&mut *self.tx)
        .await;

        DbOutcome::from_sqlx_result(result).map(|_| ())
    }

    /// Sets status/address/port and `last_access=NOW()` for own row.
    pub async fn update_self(
        &mut self,
        id: &NodeId,
        status: NodeStatus,
        address: &str,
        port: i32,
    ) -> DbOutcome<()> {
        let result = sqlx::query(
            "UPDATE ha_node SET status = $1, address = $2, port = $3, lastaccess = NOW() \
             WHERE ha_nodeid = $4",
        )
        .bind(i32::from(status))
        .bind(address)
        .bind(port)
        .bind(id.as_str())
        .execute(&mut *self.tx)
        .await;

        DbOutcome::from_sqlx_result(result).map(|_| ())
    }

    /// Refreshes only `last_access`, optionally also `status` when it
    /// differs from the row's current value (spec §4.B step 6: a single
    /// composite update per tick).
    pub async fn update_self_tick(
        &mut self,
        id: &NodeId,
        new_status: Option<NodeStatus>,
    ) -> DbOutcome<()> {
        let result = if let Some(status) = new_status {
            sqlx::query("UPDATE ha_node SET status = $1, lastaccess = NOW() WHERE ha_nodeid = $2")
                .bind(i32::from(status))
                .bind(id.as_str())
                .execute(&mut *self.tx)
                .await
        } else {
            sqlx::query("UPDATE ha_node SET lastaccess = NOW() WHERE ha_nodeid = $1")
                .bind(id.as_str())
                .execute(&mut *self.tx)
                .await
        };

        DbOutcome::from_sqlx_result(result).map(|_| ())
    }

    /// Batch update to `UNAVAILABLE`.
    pub async fn mark_unavailable(&mut self, ids: &[NodeId]) -> DbOutcome<()> {
        if ids.is_empty() {
            return DbOutcome::Ok(());
        }
        let id_strs: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
        let result = sqlx::query(
            "UPDATE ha_node SET status = $1 WHERE ha_nodeid = ANY($2)",
        )
        .bind(i32::from(NodeStatus::Unavailable))
        .bind(&id_strs as &[&str])
        .execute(&mut *self.tx)
        .await;

        DbOutcome::from_sqlx_result(result).map(|_| ())
    }

    pub async fn commit(self) -> DbOutcome<()> {
        DbOutcome::from_sqlx_result(self.tx.commit().await)
    }

    pub async fn rollback(self) -> DbOutcome<()> {
        DbOutcome::from_sqlx_result(self.tx.rollback().await)
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<NodeRecord, crate::error::HaError> {
    let status_code: i32 = row
        .try_get("status")
        .map_err(|e| crate::error::HaError::Database(e.to_string()))?;
    let status = NodeStatus::try_from(status_code)?;

    Ok(NodeRecord {
        node_id: NodeId::from_stored(
            row.try_get::<String, _>("ha_nodeid")
                .map_err(|e| crate::error::HaError::Database(e.to_string()))?,
        ),
        name: row
            .try_get("name")
            .map_err(|e| crate::error::HaError::Database(e.to_string()))?,
        status,
        last_access: row
            .try_get("lastaccess")
            .map_err(|e| crate::error::HaError::Database(e.to_string()))?,
        address: row
            .try_get("address")
            .map_err(|e| crate::error::HaError::Database(e.to_string()))?,
        port: row
            .try_get("port")
            .map_err(|e| crate::error::HaError::Database(e.to_string()))?,
    })
}
