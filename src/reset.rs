//! Forced reset of live counters
//!
//! Deliberately unsafe escape hatch for drift recovery: it bypasses the
//! aggregation claim entirely on the admission that current counter values
//! cannot be trusted. Every invocation leaves an audit entry, including
//! no-op resets of already-zero counters.

use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::store::{CounterStore, ResetAudit, ResetId, ResetScope};

/// Executes forced resets against the counter store
pub struct ResetCoordinator {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl ResetCoordinator {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Zero every live counter in `scope`, capturing pre-reset values into
    /// an audit entry attributed to `actor`. Archived counters are never
    /// touched; their days are already final.
    pub async fn force_reset(&self, scope: ResetScope, actor: &str) -> EngineResult<ResetAudit> {
        let now = self.clock.now();
        let counters = self.store.zero_counters(&scope, now).await?;

        let audit = ResetAudit {
            id: ResetId::new(),
            at: now,
            actor: actor.to_string(),
            scope,
            counters,
        };
        self.store.append_reset_audit(audit.clone()).await?;

        info!(
            reset = %audit.id,
            actor = %audit.actor,
            counters = audit.counters.len(),
            "forced reset applied"
        );
        Ok(audit)
    }
}
