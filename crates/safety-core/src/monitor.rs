//! Runtime Safety Monitor: a cooperative background task spawned alongside
//! the vehicle's event loop, exactly as the teacher spawns `run_event_loop`.
//! Samples telemetry on a 500 ms tick and dispatches violations through a
//! type-keyed callback registry.

use mavkit::{SafetyLimits, Vehicle, VehicleSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    BatteryLow,
    BatteryCritical,
    SpeedTooHigh,
    VerticalSpeedTooHigh,
    GpsPoor,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub snapshot: VehicleSnapshot,
    pub message: String,
}

pub type Callback = Arc<dyn Fn(&Violation) + Send + Sync>;

/// Background telemetry watchdog. Construct with [`SafetyMonitor::new`],
/// register callbacks with [`SafetyMonitor::on`], then [`SafetyMonitor::spawn`].
pub struct SafetyMonitor {
    vehicle: Vehicle,
    limits: Mutex<SafetyLimits>,
    callbacks: Mutex<HashMap<ViolationKind, Vec<Callback>>>,
}

impl SafetyMonitor {
    pub fn new(vehicle: Vehicle, limits: SafetyLimits) -> Arc<Self> {
        Arc::new(Self {
            vehicle,
            limits: Mutex::new(limits),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_limits(&self, limits: SafetyLimits) {
        *self.limits.lock().expect("safety limits lock poisoned") = limits;
    }

    /// Register a callback for a violation kind. Multiple callbacks per kind
    /// all fire, but at most once per 500 ms tick even if the condition
    /// persists across several ticks.
    pub fn on(self: &Arc<Self>, kind: ViolationKind, callback: Callback) {
        self.callbacks
            .lock()
            .expect("callback registry lock poisoned")
            .entry(kind)
            .or_default()
            .push(callback);
    }

    fn dispatch(&self, violation: Violation) {
        let callbacks = self.callbacks.lock().expect("callback registry lock poisoned");
        if let Some(handlers) = callbacks.get(&violation.kind) {
            for handler in handlers {
                handler(&violation);
            }
        }
    }

    /// Spawns the monitor loop. Returns a `CancellationToken` the caller can
    /// trigger to stop monitoring (e.g. on `disconnect`).
    pub fn spawn(self: Arc<Self>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            self.run(loop_cancel).await;
        });
        cancel
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("safety monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }

    async fn check_once(&self) {
        let snapshot = self.vehicle.snapshot().borrow().clone();
        let limits = *self.limits.lock().expect("safety limits lock poisoned");

        if let Some(pct) = snapshot.battery.percentage {
            if (pct as f64) < limits.critical_battery_percent {
                self.dispatch(Violation {
                    kind: ViolationKind::BatteryCritical,
                    snapshot: snapshot.clone(),
                    message: format!("battery critical at {pct:.1}%"),
                });
                if limits.enable_battery_failsafe {
                    warn!(percentage = pct, "battery critical, triggering RTL");
                    if let Err(err) = self.vehicle.rtl(false).await {
                        warn!(%err, "safety monitor RTL failed");
                    }
                }
            } else if (pct as f64) < limits.min_battery_percent {
                self.dispatch(Violation {
                    kind: ViolationKind::BatteryLow,
                    snapshot: snapshot.clone(),
                    message: format!("battery low at {pct:.1}%"),
                });
            }
        }

        if limits.enable_speed_limits {
            let horizontal = snapshot.velocity.horizontal_magnitude();
            if horizontal > limits.max_speed_mps {
                self.dispatch(Violation {
                    kind: ViolationKind::SpeedTooHigh,
                    snapshot: snapshot.clone(),
                    message: format!("speed {horizontal:.1} m/s exceeds {}", limits.max_speed_mps),
                });
            }
            if snapshot.velocity.down.abs() > limits.max_vertical_speed_mps {
                self.dispatch(Violation {
                    kind: ViolationKind::VerticalSpeedTooHigh,
                    snapshot: snapshot.clone(),
                    message: format!(
                        "vertical speed {:.1} m/s exceeds {}",
                        snapshot.velocity.down.abs(),
                        limits.max_vertical_speed_mps
                    ),
                });
            }
        }

        if limits.require_gps_fix && snapshot.gps.satellites_visible < limits.min_satellites {
            let message = format!(
                "{} satellites visible, need {}",
                snapshot.gps.satellites_visible, limits.min_satellites
            );
            self.dispatch(Violation {
                kind: ViolationKind::GpsPoor,
                snapshot,
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callback_registry_groups_by_kind() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let callbacks: Mutex<HashMap<ViolationKind, Vec<Callback>>> = Mutex::new(HashMap::new());
        callbacks
            .lock()
            .unwrap()
            .entry(ViolationKind::BatteryLow)
            .or_default()
            .push(Arc::new(move |_: &Violation| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }));

        let registry = callbacks.lock().unwrap();
        let handlers = registry.get(&ViolationKind::BatteryLow).unwrap();
        let violation = Violation {
            kind: ViolationKind::BatteryLow,
            snapshot: VehicleSnapshot::default(),
            message: String::from("test"),
        };
        for handler in handlers {
            handler(&violation);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
