//! Subsystem health states, cached for the liveness endpoints.
//!
//! Subsystems write their state through a [`HealthReporter`] whenever it
//! changes; `/api/health` and `/api/status` read the registry snapshot and
//! never touch the subsystems themselves. The llm subsystem refreshes its
//! entry from a periodic reachability probe; memory and agents report at
//! startup and flip to unhealthy on store failures.
//!
//! State is a handful of small structs behind a `std` RwLock — reads and
//! writes are sync, so reporters work from both async tasks and blocking
//! store code.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

// ── Health state ──────────────────────────────────────────────────────────────

/// Typed per-subsystem detail recorded alongside the healthy flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthDetail {
    /// Result of the last provider reachability probe.
    Llm { model: String, last_check: String },
    /// Document store size at the last successful stats query.
    Memory { documents: usize, chunks: usize },
    /// Agents registered at startup.
    Agents { agents: Vec<String> },
}

/// One subsystem's last-reported health state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    /// Subsystem identifier (matches the handler's bus prefix).
    pub id: String,
    pub healthy: bool,
    /// Human-readable status, `"ok"` when healthy.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<HealthDetail>,
}

// ── HealthRegistry ────────────────────────────────────────────────────────────

/// Shared registry of per-subsystem health states.
///
/// Clone freely — it is backed by an `Arc` and is `Send + Sync`.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    states: Arc<RwLock<HashMap<String, SubsystemHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the write handle for one subsystem.
    pub fn reporter(&self, id: impl Into<String>) -> HealthReporter {
        HealthReporter { id: id.into(), registry: self.clone() }
    }

    /// All recorded states, sorted by id.
    pub fn snapshot(&self) -> Vec<SubsystemHealth> {
        let mut states: Vec<_> = self.read().values().cloned().collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// `false` as soon as any subsystem reported unhealthy.
    pub fn all_healthy(&self) -> bool {
        self.read().values().all(|s| s.healthy)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SubsystemHealth>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SubsystemHealth>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── HealthReporter ────────────────────────────────────────────────────────────

/// Per-subsystem write handle into the [`HealthRegistry`].
#[derive(Clone)]
pub struct HealthReporter {
    id: String,
    registry: HealthRegistry,
}

impl HealthReporter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record the subsystem as healthy, no detail.
    pub fn healthy(&self) {
        self.record(true, "ok", None);
    }

    /// Record healthy with a typed detail block.
    pub fn healthy_with(&self, detail: HealthDetail) {
        self.record(true, "ok", Some(detail));
    }

    /// Record unhealthy with a reason; any previous detail is dropped.
    pub fn unhealthy(&self, message: impl Into<String>) {
        self.record(false, message, None);
    }

    /// Last recorded state for this subsystem, `None` before the first write.
    pub fn current(&self) -> Option<SubsystemHealth> {
        self.registry.read().get(&self.id).cloned()
    }

    fn record(&self, healthy: bool, message: impl Into<String>, detail: Option<HealthDetail>) {
        let state = SubsystemHealth {
            id: self.id.clone(),
            healthy,
            message: message.into(),
            detail,
        };
        self.registry.write().insert(self.id.clone(), state);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_writes_show_in_snapshot() {
        let registry = HealthRegistry::new();
        registry.reporter("llm").healthy();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "llm");
        assert!(snapshot[0].healthy);
        assert_eq!(snapshot[0].message, "ok");
        assert!(snapshot[0].detail.is_none());
    }

    #[test]
    fn unhealthy_replaces_state_and_drops_detail() {
        let registry = HealthRegistry::new();
        let reporter = registry.reporter("llm");

        reporter.healthy_with(HealthDetail::Llm {
            model: "gpt-4o-mini".into(),
            last_check: "2026-08-04T12:00:00Z".into(),
        });
        reporter.unhealthy("connection refused");

        let current = reporter.current().unwrap();
        assert!(!current.healthy);
        assert_eq!(current.message, "connection refused");
        assert!(current.detail.is_none());
    }

    #[test]
    fn all_healthy_false_when_one_down() {
        let registry = HealthRegistry::new();
        registry.reporter("llm").healthy();
        registry.reporter("agents").unhealthy("agents down");

        assert!(!registry.all_healthy());
    }

    #[test]
    fn snapshot_sorted_by_id() {
        let registry = HealthRegistry::new();
        registry.reporter("memory").healthy();
        registry.reporter("agents").healthy();
        registry.reporter("llm").healthy();

        let ids: Vec<_> = registry.snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["agents", "llm", "memory"]);
    }

    #[test]
    fn empty_registry_counts_as_healthy() {
        let registry = HealthRegistry::new();
        assert!(registry.all_healthy());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn llm_detail_serialises_model_and_check_time() {
        let registry = HealthRegistry::new();
        let reporter = registry.reporter("llm");
        reporter.healthy_with(HealthDetail::Llm {
            model: "gpt-4o-mini".into(),
            last_check: "2026-08-04T12:00:00Z".into(),
        });

        let json = serde_json::to_string(&reporter.current().unwrap()).unwrap();
        assert!(json.contains(r#""kind":"llm""#));
        assert!(json.contains(r#""model":"gpt-4o-mini""#));
    }

    #[test]
    fn memory_detail_round_trips() {
        let state = SubsystemHealth {
            id: "memory".into(),
            healthy: true,
            message: "ok".into(),
            detail: Some(HealthDetail::Memory { documents: 2, chunks: 17 }),
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: SubsystemHealth = serde_json::from_str(&json).unwrap();
        assert_eq!(back.detail, Some(HealthDetail::Memory { documents: 2, chunks: 17 }));
    }
}
