//! Traffic generator (§4.7): one thread per service, producing paced,
//! fragmented "objects" on the data plane.
//!
//! Its only synchronization with the owning client agent is the
//! `(mutex, condition)` pair in [`GeneratorHandle`] (§5); the agent thread
//! never touches the socket directly.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::agent::ClientEffects;
use crate::clock::{busy_wait_until, precise_wait_us, Timestamp};
use crate::config::{Config, ServiceSettings};
use crate::data::{fragment_payload, total_fragments, DataMessage};

/// The generator's control state (§4.7, §5). `Transmission` and
/// `TransmissionFinishObject` are both "active" states the fragment loop may
/// send in; the latter additionally unlocks the inter-object wait's early
/// exit (step 4) and is how a soft reconfigure is absorbed across an object
/// boundary without an observable `Paused` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Transmission,
    TransmissionFinishObject,
    Paused,
    Stop,
}

impl GeneratorState {
    fn is_active(self) -> bool {
        matches!(
            self,
            GeneratorState::Transmission | GeneratorState::TransmissionFinishObject
        )
    }
}

struct Shared {
    state: GeneratorState,
    requested_mode: u8,
    anchor_override: Option<Timestamp>,
}

/// Shared between the client agent (writer) and the generator thread
/// (reader). Cloned as an `Arc` into both.
pub struct GeneratorHandle {
    shared: Mutex<Shared>,
    cv: Condvar,
}

impl GeneratorHandle {
    pub fn new(initial_mode: u8) -> Arc<Self> {
        Arc::new(GeneratorHandle {
            shared: Mutex::new(Shared {
                state: GeneratorState::Idle,
                requested_mode: initial_mode,
                anchor_override: None,
            }),
            cv: Condvar::new(),
        })
    }

    fn set_state(&self, state: GeneratorState) {
        let mut shared = self.shared.lock().unwrap();
        shared.state = state;
        drop(shared);
        self.cv.notify_all();
    }

    /// Blocks until `state` is one of the two active variants or `Stop`,
    /// then returns a snapshot (§4.7 step 1 / step 3).
    pub fn wait_until_active(&self) -> (GeneratorState, u8, Option<Timestamp>) {
        let mut shared = self.shared.lock().unwrap();
        while !shared.state.is_active() && shared.state != GeneratorState::Stop {
            shared = self.cv.wait(shared).unwrap();
        }
        (shared.state, shared.requested_mode, shared.anchor_override)
    }

    /// Non-blocking snapshot, used for the asynchronous-mode variant's
    /// fragment-granularity mode check (§4.7).
    pub fn peek(&self) -> (GeneratorState, u8, Option<Timestamp>) {
        let shared = self.shared.lock().unwrap();
        (shared.state, shared.requested_mode, shared.anchor_override)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().unwrap().state != GeneratorState::Stop
    }

    pub fn state_is_finish_object(&self) -> bool {
        self.shared.lock().unwrap().state == GeneratorState::TransmissionFinishObject
    }

    fn clear_anchor_override(&self) {
        self.shared.lock().unwrap().anchor_override = None;
    }
}

impl ClientEffects for GeneratorHandle {
    fn transmission(&self) {
        self.set_state(GeneratorState::Transmission);
    }

    fn stop(&self) {
        self.set_state(GeneratorState::Stop);
    }

    fn paused(&self) {
        self.set_state(GeneratorState::Paused);
    }

    fn reconfigure(&self, mode: u8) {
        let mut shared = self.shared.lock().unwrap();
        shared.requested_mode = mode;
        drop(shared);
        self.cv.notify_all();
    }

    fn reconfigure_finish_object(&self, mode: u8, anchor: Option<Timestamp>) {
        let mut shared = self.shared.lock().unwrap();
        shared.requested_mode = mode;
        shared.anchor_override = anchor;
        shared.state = GeneratorState::TransmissionFinishObject;
        drop(shared);
        self.cv.notify_all();
    }
}

/// Everything the generator loop needs that does not change once the
/// client agent starts it.
pub struct GeneratorConfig {
    pub service_id: u64,
    pub source_id: u32,
    pub priority: u8,
    pub initial_mode: u8,
    pub config: Arc<Config>,
}

fn resolve(settings: &ServiceSettings) -> anyhow::Result<SocketAddr> {
    Ok(format!("{}:{}", settings.ip, settings.port).parse()?)
}

/// The generator main loop (§4.7). Runs until `handle` reaches `Stop`.
pub fn run(handle: Arc<GeneratorHandle>, socket: UdpSocket, gen: GeneratorConfig) -> anyhow::Result<()> {
    let mut current_mode = gen.initial_mode;
    let mut settings = gen.config.service_settings(gen.service_id, current_mode)?.clone();
    let mut dest = resolve(&settings)?;
    let mut object_number: u32 = 1;
    let mut local_period_anchor = Timestamp::now();

    'objects: loop {
        let (state, requested_mode, anchor_override) = handle.wait_until_active();
        if state == GeneratorState::Stop {
            return Ok(());
        }

        if requested_mode != current_mode {
            apply_mode_change(
                &gen,
                &handle,
                requested_mode,
                anchor_override,
                &mut current_mode,
                &mut settings,
                &mut dest,
                &mut local_period_anchor,
            );
        }

        let object_size_bytes = settings.object_size_kb as u64 * 1024;
        let total = total_fragments(object_size_bytes);

        let mut fragment_number = 1u32;
        while fragment_number <= total {
            let (state, requested_mode, anchor_override) = handle.peek();
            if state == GeneratorState::Stop {
                return Ok(());
            }
            if !state.is_active() {
                // Paused mid-object: re-enter the blocking wait and resume
                // the same fragment once active again.
                let (state, _, _) = handle.wait_until_active();
                if state == GeneratorState::Stop {
                    return Ok(());
                }
            }
            if requested_mode != current_mode {
                // Asynchronous-mode variant (§4.7): intra-object reconfigure.
                apply_mode_change(
                    &gen,
                    &handle,
                    requested_mode,
                    anchor_override,
                    &mut current_mode,
                    &mut settings,
                    &mut dest,
                    &mut local_period_anchor,
                );
                continue 'objects;
            }

            let object_size_bytes = settings.object_size_kb as u64 * 1024;
            let payload = fragment_payload(object_size_bytes, fragment_number);
            let msg = DataMessage {
                priority: gen.priority,
                source_id: gen.source_id,
                service_id: gen.service_id,
                object_number,
                fragment_number,
                total_fragments: total,
                timestamp: Timestamp::now(),
                send_time_point: Timestamp::now(),
                payload,
            };
            let bytes = msg.serialize();
            if let Err(err) = socket.send_to(&bytes, dest) {
                warn!(service_id = gen.service_id, error = %err, "data fragment send failed");
            }

            precise_wait_us(settings.inter_packet_gap.as_micros() as u64);
            fragment_number += 1;
        }

        let target = local_period_anchor.add_duration(Duration::from_millis(settings.deadline_ms as u64));
        busy_wait_until(target, || handle.state_is_finish_object() || !handle.is_running());
        if !handle.is_running() {
            return Ok(());
        }

        local_period_anchor = target;
        object_number += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_mode_change(
    gen: &GeneratorConfig,
    handle: &GeneratorHandle,
    requested_mode: u8,
    anchor_override: Option<Timestamp>,
    current_mode: &mut u8,
    settings: &mut ServiceSettings,
    dest: &mut SocketAddr,
    local_period_anchor: &mut Timestamp,
) {
    match gen.config.service_settings(gen.service_id, requested_mode) {
        Ok(new_settings) => {
            *current_mode = requested_mode;
            *settings = new_settings.clone();
            match resolve(settings) {
                Ok(addr) => *dest = addr,
                Err(err) => warn!(service_id = gen.service_id, error = %err, "could not resolve new mode destination"),
            }
            if let Some(anchor) = anchor_override {
                *local_period_anchor = anchor;
            }
            handle.clear_anchor_override();
            info!(service_id = gen.service_id, mode = *current_mode, "generator switched mode");
        }
        Err(err) => {
            warn!(service_id = gen.service_id, mode = requested_mode, error = %err, "unknown mode requested, keeping current settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn wait_until_active_blocks_then_returns_on_transmission() {
        let handle = GeneratorHandle::new(0);
        let h2 = handle.clone();
        let started = Arc::new(AtomicBool::new(false));
        let s2 = started.clone();
        let thread = std::thread::spawn(move || {
            s2.store(true, Ordering::SeqCst);
            h2.wait_until_active()
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.transmission();
        let (state, _, _) = thread.join().unwrap();
        assert_eq!(state, GeneratorState::Transmission);
    }

    #[test]
    fn reconfigure_finish_object_sets_active_finish_state() {
        let handle = GeneratorHandle::new(0);
        handle.reconfigure_finish_object(1, Some(Timestamp::new(10, 0)));
        assert!(handle.state_is_finish_object());
        let (_, mode, anchor) = handle.peek();
        assert_eq!(mode, 1);
        assert_eq!(anchor, Some(Timestamp::new(10, 0)));
    }

    #[test]
    fn stop_unblocks_waiter() {
        let handle = GeneratorHandle::new(0);
        let h2 = handle.clone();
        let thread = std::thread::spawn(move || h2.wait_until_active());
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
        let (state, _, _) = thread.join().unwrap();
        assert_eq!(state, GeneratorState::Stop);
    }
}
