//! Per-symbol admission control
//!
//! Two concurrent maps guard the orchestrator: an in-flight registry that
//! allows at most one running request per symbol, and a circuit breaker that
//! blocks symbols whose recent requests kept failing. Both are keyed by
//! symbol, so unrelated symbols never contend for the same entry.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Rejection;

/// One in-flight request
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub active: bool,
    pub started_at: Instant,
    /// Identifies the run that owns the entry
    pub token: Uuid,
}

/// Failure history of one symbol
#[derive(Debug, Clone)]
pub struct BreakerEntry {
    pub failure_count: u32,
    pub last_failure_at: Instant,
}

/// Settings the controller needs from [`EngineConfig`]
#[derive(Debug, Clone)]
struct AdmissionPolicy {
    failure_threshold: u32,
    cooldown: Duration,
    stale_after: Duration,
    retry_after: Duration,
}

/// In-flight registry plus circuit breaker
#[derive(Debug)]
pub struct AdmissionController {
    registry: DashMap<String, RegistryEntry>,
    breakers: DashMap<String, BreakerEntry>,
    policy: AdmissionPolicy,
}

impl AdmissionController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: DashMap::new(),
            breakers: DashMap::new(),
            policy: AdmissionPolicy {
                failure_threshold: config.failure_threshold,
                cooldown: config.circuit_cooldown,
                stale_after: config.stale_after,
                retry_after: config.in_flight_retry_after,
            },
        }
    }

    /// Admit a request for `symbol` or explain why not
    ///
    /// On success the symbol is marked in flight until the returned permit is
    /// completed, abandoned or dropped.
    pub fn try_admit(self: &Arc<Self>, symbol: &str) -> Result<AdmissionPermit, Rejection> {
        self.check_circuit(symbol)?;

        let token = Uuid::new_v4();
        match self.registry.entry(symbol.to_string()) {
            Entry::Occupied(entry) if entry.get().active => {
                debug!("Rejecting {}: already in flight", symbol);
                return Err(Rejection::AlreadyInFlight {
                    retry_after: self.policy.retry_after,
                });
            }
            Entry::Occupied(mut entry) => {
                entry.insert(RegistryEntry {
                    active: true,
                    started_at: Instant::now(),
                    token,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(RegistryEntry {
                    active: true,
                    started_at: Instant::now(),
                    token,
                });
            }
        }

        info!("Admitted analysis for {}", symbol);
        Ok(AdmissionPermit {
            controller: Arc::clone(self),
            symbol: symbol.to_string(),
            token,
            released: false,
        })
    }

    fn check_circuit(&self, symbol: &str) -> Result<(), Rejection> {
        let expired = {
            let Some(entry) = self.breakers.get(symbol) else {
                return Ok(());
            };
            if entry.failure_count < self.policy.failure_threshold {
                return Ok(());
            }
            let elapsed = entry.last_failure_at.elapsed();
            if elapsed < self.policy.cooldown {
                warn!(
                    "Circuit open for {} ({} failures)",
                    symbol, entry.failure_count
                );
                return Err(Rejection::CircuitOpen {
                    failures: entry.failure_count,
                    retry_after: self.policy.cooldown - elapsed,
                });
            }
            entry.last_failure_at
        };

        // cooldown elapsed: reset unless a newer failure landed meanwhile
        self.breakers
            .remove_if(symbol, |_, entry| entry.last_failure_at == expired);
        info!("Circuit reset for {}", symbol);
        Ok(())
    }

    /// Release the in-flight entry owned by `token`
    ///
    /// `outcome` updates the breaker: `Some(true)` clears it, `Some(false)`
    /// records a failure, `None` leaves it alone.
    fn release(&self, symbol: &str, token: Uuid, outcome: Option<bool>) {
        let removed = self
            .registry
            .remove_if(symbol, |_, entry| entry.token == token)
            .is_some();
        if !removed {
            debug!("Registry entry for {} already reclaimed", symbol);
        }

        match outcome {
            Some(true) => {
                if self.breakers.remove(symbol).is_some() {
                    info!("Circuit cleared for {}", symbol);
                }
            }
            Some(false) => self.record_failure(symbol),
            None => {}
        }
    }

    fn record_failure(&self, symbol: &str) {
        let now = Instant::now();
        let mut entry = self
            .breakers
            .entry(symbol.to_string())
            .or_insert(BreakerEntry {
                failure_count: 0,
                last_failure_at: now,
            });
        entry.failure_count += 1;
        entry.last_failure_at = now;
        warn!("Recorded failure {} for {}", entry.failure_count, symbol);
    }

    /// Delete active entries older than the stale age
    ///
    /// Returns the number of entries removed.
    pub fn sweep_stale(&self) -> usize {
        let stale_after = self.policy.stale_after;
        let mut swept = 0;

        self.registry.retain(|symbol, entry| {
            let stale = entry.active && entry.started_at.elapsed() > stale_after;
            if stale {
                warn!("Cleaning up stale processing entry for {}", symbol);
                swept += 1;
            }
            !stale
        });

        swept
    }

    /// Run [`AdmissionController::sweep_stale`] periodically
    ///
    /// The task stops on its own once the controller is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                let swept = controller.sweep_stale();
                if swept > 0 {
                    info!("Swept {} stale entries", swept);
                }
            }
        })
    }

    /// Whether a request for `symbol` is in flight
    pub fn in_flight(&self, symbol: &str) -> bool {
        self.registry.get(symbol).is_some_and(|entry| entry.active)
    }

    /// Number of in-flight requests
    pub fn in_flight_count(&self) -> usize {
        self.registry.len()
    }

    /// Recorded failures for `symbol`
    pub fn failure_count(&self, symbol: &str) -> u32 {
        self.breakers
            .get(symbol)
            .map_or(0, |entry| entry.failure_count)
    }
}

/// Proof of admission for one request
///
/// Completing the permit releases the symbol and updates the breaker.
/// Dropping it without completing releases the symbol only.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    symbol: String,
    token: Uuid,
    released: bool,
}

impl AdmissionPermit {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Release with an outcome that feeds the circuit breaker
    pub fn complete(mut self, succeeded: bool) {
        self.released = true;
        self.controller
            .release(&self.symbol, self.token, Some(succeeded));
    }

    /// Release without touching the circuit breaker
    pub fn abandon(mut self) {
        self.released = true;
        self.controller.release(&self.symbol, self.token, None);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.released {
            warn!("Admission permit for {} dropped without completion", self.symbol);
            self.controller.release(&self.symbol, self.token, None);
        }
    }
}
