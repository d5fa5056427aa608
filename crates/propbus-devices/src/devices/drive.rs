/*!
 * Virtual single-axis drive.
 *
 * The reference spec-driven device: a writable `force` input, read-only
 * `position` and `velocity` outputs, and a `reset` action. A periodic
 * integration loop on the device scope advances the simulated body and
 * pushes the resulting state into the logical cache, so observers see
 * ordinary property-change notifications.
 */
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use propbus_core::convert::FloatConverter;
use propbus_core::types::Value;

use crate::spec::{DeviceRef, DeviceSpec, SpecDevice};

/// Default integration tick
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default)]
struct DriveState {
    force: f64,
    position: f64,
    velocity: f64,
}

/// Simulated single-axis body driven by a constant force between ticks
#[derive(Debug)]
pub struct VirtualDrive {
    mass: f64,
    state: Mutex<DriveState>,
}

impl VirtualDrive {
    /// Create a new body at rest at the origin
    pub fn new(mass: f64) -> Self {
        Self {
            mass: if mass > 0.0 { mass } else { 1.0 },
            state: Mutex::new(DriveState::default()),
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current applied force
    pub fn force(&self) -> f64 {
        self.state_guard().force
    }

    /// Apply a new force, effective from the next tick
    pub fn set_force(&self, force: f64) {
        self.state_guard().force = force;
    }

    /// Current position
    pub fn position(&self) -> f64 {
        self.state_guard().position
    }

    /// Current velocity
    pub fn velocity(&self) -> f64 {
        self.state_guard().velocity
    }

    /// Advance the body by `dt` seconds and return (position, velocity)
    pub fn step(&self, dt: f64) -> (f64, f64) {
        let mut state = self.state_guard();
        state.velocity += state.force / self.mass * dt;
        state.position += state.velocity * dt;
        (state.position, state.velocity)
    }

    /// Return the body to rest at the origin, keeping the applied force
    pub fn reset(&self) {
        let mut state = self.state_guard();
        state.position = 0.0;
        state.velocity = 0.0;
    }
}

/// Build the drive device spec with the given integration tick
pub fn drive_spec(tick: Duration) -> DeviceSpec<VirtualDrive> {
    let mut spec = DeviceSpec::new();

    spec.mutable_property(
        FloatConverter,
        "force",
        |device: DeviceRef<VirtualDrive>| async move { Ok(Some(device.driver().force())) },
        |device: DeviceRef<VirtualDrive>, value: f64| async move {
            device.driver().set_force(value);
            Ok(())
        },
    );

    spec.property(
        FloatConverter,
        "position",
        |device: DeviceRef<VirtualDrive>| async move { Ok(Some(device.driver().position())) },
    );

    spec.property(
        FloatConverter,
        "velocity",
        |device: DeviceRef<VirtualDrive>| async move { Ok(Some(device.driver().velocity())) },
    );

    spec.unit_action("reset", |device: DeviceRef<VirtualDrive>| async move {
        device.driver().reset();
        device.update_logical("position", Value::Float(0.0));
        device.update_logical("velocity", Value::Float(0.0));
        Ok(())
    });

    spec.on_open(move |device: DeviceRef<VirtualDrive>| async move {
        let tick = tick_from_meta(device.meta()).unwrap_or(tick);
        debug!("Starting drive integration loop at {:?}", tick);
        device.emit_log("integration loop started", None);
        let weak = Arc::downgrade(&device);
        device.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // first tick fires immediately; skip it so dt stays uniform
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(device) = weak.upgrade() else { break };
                let (position, velocity) = device.driver().step(tick.as_secs_f64());
                device.update_logical("position", Value::Float(position));
                device.update_logical("velocity", Value::Float(velocity));
            }
            Ok(())
        });
        Ok(())
    });

    spec
}

fn tick_from_meta(meta: &Value) -> Option<Duration> {
    meta.get("tick_ms")
        .and_then(Value::as_integer)
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64))
}

/// Build a drive device. Mass defaults to 1.0 and the tick to
/// [`DEFAULT_TICK`]; both may be overridden through the `mass` and
/// `tick_ms` meta entries.
pub fn virtual_drive(meta: Value) -> Arc<SpecDevice<VirtualDrive>> {
    let mass = meta.get("mass").and_then(Value::as_float).unwrap_or(1.0);
    SpecDevice::new(drive_spec(DEFAULT_TICK), VirtualDrive::new(mass), meta)
}
