//! Connection-quality tracker
//!
//! Counts consecutive network failures across all outbound calls. Crossing
//! the threshold downgrades quality to `poor`; a single successful call
//! upgrades it straight back to `good`. The health monitor reads the quality
//! to pick its polling cadence.

use chrono::Utc;
use jukebox_common::events::{ConnectionQuality, EventBus, JukeboxEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

pub struct ConnectionTracker {
    threshold: u32,
    consecutive_failures: AtomicU32,
    quality_tx: watch::Sender<ConnectionQuality>,
    events: EventBus,
}

impl ConnectionTracker {
    pub fn new(threshold: u32, events: EventBus) -> Self {
        let (quality_tx, _) = watch::channel(ConnectionQuality::Good);
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            quality_tx,
            events,
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let quality = self.quality_for(failures);
        if quality != self.quality() {
            warn!(failures, quality = %quality, "Connection quality degraded");
        }
        self.publish(quality);
    }

    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous > 0 && self.quality() != ConnectionQuality::Good {
            info!(previous_failures = previous, "Connection quality recovered");
        }
        self.publish(ConnectionQuality::Good);
    }

    pub fn quality(&self) -> ConnectionQuality {
        *self.quality_tx.borrow()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionQuality> {
        self.quality_tx.subscribe()
    }

    fn quality_for(&self, failures: u32) -> ConnectionQuality {
        if failures == 0 {
            ConnectionQuality::Good
        } else if failures < self.threshold {
            ConnectionQuality::Unstable
        } else {
            ConnectionQuality::Poor
        }
    }

    fn publish(&self, quality: ConnectionQuality) {
        let mut old = quality;
        let changed = self.quality_tx.send_if_modified(|current| {
            if *current == quality {
                false
            } else {
                old = *current;
                *current = quality;
                true
            }
        });

        if changed {
            self.events.emit_lossy(JukeboxEvent::ConnectionQualityChanged {
                old_quality: old,
                new_quality: quality,
                timestamp: Utc::now(),
            });
        }
    }
}
