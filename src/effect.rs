//! The switch client's local effect (§4.5): a degenerate agent with no
//! traffic generator. `RECONFIGURE` becomes a call to the opaque
//! `apply_mode(mode, experiment_number, counter)` effect (§1: deliberately
//! out of scope as a feature, specified only at this interface).

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use crate::agent::ClientEffects;
use crate::clock::Timestamp;

/// The external side effect of a mode change on a switch client. The core
/// protocol only needs this to be callable; what it actually does (shell out
/// to a device-specific script, program a TC qdisc, ...) is deployment
/// specific and out of scope here.
pub trait ModeApplier: Send + Sync {
    fn apply_mode(&self, mode: u8, experiment_number: u32, counter: u64);
}

/// Logs the call it would otherwise make. Used until a deployment supplies
/// its own `ModeApplier`.
pub struct LoggingModeApplier;

impl ModeApplier for LoggingModeApplier {
    fn apply_mode(&self, mode: u8, experiment_number: u32, counter: u64) {
        info!(mode, experiment_number, counter, "apply_mode");
    }
}

pub struct SwitchHandle<A: ModeApplier> {
    applier: A,
    experiment_number: u32,
    counter: AtomicU64,
}

impl<A: ModeApplier> SwitchHandle<A> {
    pub fn new(applier: A, experiment_number: u32) -> Self {
        SwitchHandle {
            applier,
            experiment_number,
            counter: AtomicU64::new(0),
        }
    }

    fn apply(&self, mode: u8) {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        self.applier.apply_mode(mode, self.experiment_number, counter);
    }
}

impl<A: ModeApplier> ClientEffects for SwitchHandle<A> {
    fn transmission(&self) {}

    fn stop(&self) {}

    fn paused(&self) {}

    fn reconfigure(&self, mode: u8) {
        self.apply(mode);
    }

    /// Only reached for the sync-object HW variant (the plain soft variant
    /// is ACK-only and never calls this, see `agent.rs`'s dispatch). The
    /// switch client has no "object boundary" to absorb a reconfigure
    /// across, so it applies the mode immediately rather than waiting.
    fn reconfigure_finish_object(&self, mode: u8, _anchor: Option<Timestamp>) {
        self.apply(mode);
    }
}

/// Startup diagnostic (§4.5): warns if the local link is observed running
/// below the expected line rate. Not a protocol message — a log line only.
pub fn probe_link_rate(interface: &str) {
    const EXPECTED_MBPS: u64 = 100;
    let path = format!("/sys/class/net/{interface}/speed");
    match std::fs::read_to_string(&path) {
        Ok(contents) => match contents.trim().parse::<u64>() {
            Ok(mbps) if mbps < EXPECTED_MBPS => {
                warn!(interface, mbps, expected = EXPECTED_MBPS, "link running below expected line rate");
            }
            Ok(mbps) => {
                info!(interface, mbps, "link rate probe");
            }
            Err(_) => {
                warn!(interface, "could not parse link speed");
            }
        },
        Err(err) => {
            warn!(interface, error = %err, "could not read link speed");
        }
    }
}
