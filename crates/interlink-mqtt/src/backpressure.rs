//! Backpressure observer
//!
//! Process-wide count of inbound messages accepted but not yet processed,
//! shared by every skeleton of the process. While the count stays within the
//! upper threshold (`max_incoming_requests - backend_count * receive_maximum`)
//! messages are acknowledged as soon as they are processed. Crossing it
//! engages backpressure: acknowledgements are deferred, which stops the broker
//! from sending more once its receive maximum is exhausted. When the count
//! falls to the lower threshold, backpressure disengages and every registered
//! skeleton flushes its deferred acknowledgements.
//!
//! ```text
//!            count > upper
//!   ┌──────┐ ──────────────▶ ┌─────────┐
//!   │ idle │                 │ engaged │
//!   └──────┘ ◀────────────── └─────────┘
//!            count <= lower   (flush skeletons)
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use tracing::{debug, info, trace};
use crate::config::MqttConfig;
use crate::error::Result;

/// Skeleton side of a backpressure flush
pub trait OutstandingPublishes: Send + Sync {
    /// Acknowledge every deferred publish
    fn acknowledge_outstanding_publishes(&self);
}

#[derive(Default)]
struct ObserverState {
    in_progress: HashSet<String>,
    engaged: bool,
}

pub struct MessageInProgressObserver {
    enabled: bool,
    upper_threshold: usize,
    lower_threshold: usize,
    state: Mutex<ObserverState>,
    skeletons: Mutex<Vec<Weak<dyn OutstandingPublishes>>>,
}

impl MessageInProgressObserver {
    /// Create an observer; invalid thresholds are rejected here
    pub fn new(config: &MqttConfig) -> Result<Self> {
        config.validate()?;
        let observer = Self {
            enabled: config.backpressure_enabled,
            upper_threshold: config.backpressure_upper_threshold(),
            lower_threshold: config.backpressure_lower_threshold,
            state: Mutex::new(ObserverState::default()),
            skeletons: Mutex::new(Vec::new()),
        };
        if observer.enabled {
            info!(
                "backpressure enabled: upper threshold {}, lower threshold {}",
                observer.upper_threshold, observer.lower_threshold
            );
        }
        Ok(observer)
    }

    /// Observer that acknowledges everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            upper_threshold: 0,
            lower_threshold: 0,
            state: Mutex::new(ObserverState::default()),
            skeletons: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn upper_threshold(&self) -> usize {
        self.upper_threshold
    }

    pub fn lower_threshold(&self) -> usize {
        self.lower_threshold
    }

    /// Register a skeleton to be flushed on disengage
    pub fn register_skeleton(&self, skeleton: &Arc<dyn OutstandingPublishes>) {
        let mut skeletons = self.skeletons.lock();
        skeletons.retain(|s| s.strong_count() > 0);
        skeletons.push(Arc::downgrade(skeleton));
    }

    /// Admit a message; `true` if it may be acknowledged right away
    pub fn can_message_be_acknowledged(&self, message_id: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let mut state = self.state.lock();
        state.in_progress.insert(message_id.to_string());
        let count = state.in_progress.len();
        if count <= self.upper_threshold && !state.engaged {
            return true;
        }
        if !state.engaged {
            info!(
                "backpressure engaged: {} messages in progress (upper threshold {})",
                count, self.upper_threshold
            );
            state.engaged = true;
        }
        trace!("acknowledgement of {} deferred", message_id);
        false
    }

    /// Complete a message admitted by [`can_message_be_acknowledged`](Self::can_message_be_acknowledged)
    pub fn decrement_messages_in_progress(&self, message_id: &str) {
        if !self.enabled {
            return;
        }
        let disengaged = {
            let mut state = self.state.lock();
            if !state.in_progress.remove(message_id) {
                return;
            }
            let count = state.in_progress.len();
            if state.engaged && count <= self.lower_threshold {
                state.engaged = false;
                info!(
                    "backpressure disengaged: {} messages in progress (lower threshold {})",
                    count, self.lower_threshold
                );
                true
            } else {
                false
            }
        };

        if disengaged {
            let skeletons: Vec<Arc<dyn OutstandingPublishes>> = self
                .skeletons
                .lock()
                .iter()
                .filter_map(Weak::upgrade)
                .collect();
            debug!("flushing deferred acknowledgements of {} skeleton(s)", skeletons.len());
            for skeleton in skeletons {
                skeleton.acknowledge_outstanding_publishes();
            }
        }
    }

    pub fn messages_in_progress(&self) -> usize {
        self.state.lock().in_progress.len()
    }

    pub fn is_engaged(&self) -> bool {
        self.state.lock().engaged
    }
}
