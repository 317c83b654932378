//! Liveness tracking of panel targets
//!
//! The [`DashboardObserver`] remembers when each target (by uid) was last
//! requested. Targets that change definition trigger
//! [`TargetListener::on_target_update`]; targets that were not requested for
//! longer than the inactivity timeout are evicted on [`DashboardObserver::cleanup`]
//! and trigger [`TargetListener::on_target_inactive`], so their metrics stop
//! being polled.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::ResolvedTarget;

#[async_trait]
pub trait TargetListener: Send + Sync {
    /// A known target reappeared with a different definition
    async fn on_target_update(&self, previous: &ResolvedTarget, current: &ResolvedTarget);

    /// A target was not requested within the inactivity timeout
    async fn on_target_inactive(&self, target: &ResolvedTarget);
}

struct TrackedTarget {
    target: ResolvedTarget,
    last_active: Instant,
}

pub struct DashboardObserver {
    inactivity_timeout: Duration,
    targets: Mutex<HashMap<String, TrackedTarget>>,
}

impl DashboardObserver {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Mark all `targets` as active now
    pub async fn refresh<L>(&self, targets: &[ResolvedTarget], listener: &L)
    where
        L: TargetListener + ?Sized,
    {
        let now = Instant::now();
        let mut updates = Vec::new();

        {
            let mut tracked = self.targets.lock().await;
            for target in targets {
                let previous = tracked.insert(
                    target.uid.clone(),
                    TrackedTarget {
                        target: target.clone(),
                        last_active: now,
                    },
                );

                if let Some(previous) = previous {
                    if !previous.target.same_definition(target) {
                        updates.push((previous.target, target.clone()));
                    }
                }
            }
        }

        for (previous, current) in &updates {
            debug!("target {} changed", current.uid);
            listener.on_target_update(previous, current).await;
        }
    }

    /// Evict every target not seen within the inactivity timeout
    pub async fn cleanup<L>(&self, listener: &L) -> usize
    where
        L: TargetListener + ?Sized,
    {
        let now = Instant::now();
        let mut inactive = Vec::new();

        {
            let mut tracked = self.targets.lock().await;
            tracked.retain(|_, entry| {
                let alive = now.duration_since(entry.last_active) <= self.inactivity_timeout;
                if !alive {
                    inactive.push(entry.target.clone());
                }
                alive
            });
        }

        for target in &inactive {
            debug!("target {} became inactive", target.uid);
            listener.on_target_inactive(target).await;
        }
        inactive.len()
    }

    pub async fn is_tracked(&self, uid: &str) -> bool {
        self.targets.lock().await.contains_key(uid)
    }

    pub async fn len(&self) -> usize {
        self.targets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.lock().await.is_empty()
    }
}
