//! Mutable state threaded through one dispatch, and the dependencies its
//! router and `crate::batch` need to do I/O.

use destiny_blob::BlobGateway;
use destiny_common::{DestinyError, Result};
use destiny_store::{RelationalStore, SearchIndex};
use destiny_taskbus::TaskBus;
use sqlx::PgPool;

use crate::events::RequestOutcome;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorState {
    pub outcome: Option<RequestOutcome>,
}

pub struct OrchestratorDeps {
    pub store: RelationalStore,
    pub search: SearchIndex,
    pub blob: BlobGateway,
    pub taskbus: TaskBus,
    /// Orchestrator-local tables (`pending_rebuilds`, `batch_validation`) —
    /// the same Postgres instance as `store`, but migrated and queried
    /// directly here rather than through the shared gateway, same as
    /// `destiny-taskbus` owns its own `tasks` table in this database.
    pub pool: PgPool,
    /// Robot request signature replay window (spec §5), from
    /// `Config::robot_auth_replay_window_secs`.
    pub replay_window_secs: i64,
}

impl OrchestratorDeps {
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
