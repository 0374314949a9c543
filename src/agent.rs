//! The client control agent (§4.4, §4.5): receives commands, dispatches by
//! kind, drives a local effect (traffic generator or switch reconfiguration),
//! and acknowledges back to the orchestrator.
//!
//! The effect itself — "what does RECONFIGURE mean locally" — is abstracted
//! behind [`ClientEffects`] so the endnode and switch binaries share one
//! state machine and one three-phase wait implementation (§4.5: "all
//! timestamp bookkeeping is identical to §4.4").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::carriers::InboundQueue;
use crate::clock::{busy_wait_until, Timestamp};
use crate::error::TimestampError;
use crate::transport::ControlTransport;
use crate::wire::{ControlMessage, MessageKind, ProtocolId, RmPayload};

/// The local effect a client agent drives in response to protocol commands.
/// Implemented by [`crate::generator::GeneratorHandle`] (endnode) and
/// [`crate::effect::SwitchHandle`] (switch).
pub trait ClientEffects: Send + Sync {
    fn transmission(&self);
    fn stop(&self);
    fn paused(&self);
    /// Apply `mode` now; called after the full three-phase wait pauses the
    /// effect first (§4.4).
    fn reconfigure(&self, mode: u8);
    /// Apply `mode` without an explicit pause, optionally re-anchoring the
    /// generator's period clock (§4.4 "soft" variant, §4.7 step 2).
    fn reconfigure_finish_object(&self, mode: u8, anchor: Option<Timestamp>);
}

/// An `Arc`-wrapped effect is itself a valid effect: this is what lets the
/// endnode binary share one `GeneratorHandle` between the client agent
/// (which drives it through this trait) and the generator thread (which
/// polls it directly for its own state machine).
impl<T: ClientEffects> ClientEffects for Arc<T> {
    fn transmission(&self) {
        (**self).transmission()
    }
    fn stop(&self) {
        (**self).stop()
    }
    fn paused(&self) {
        (**self).paused()
    }
    fn reconfigure(&self, mode: u8) {
        (**self).reconfigure(mode)
    }
    fn reconfigure_finish_object(&self, mode: u8, anchor: Option<Timestamp>) {
        (**self).reconfigure_finish_object(mode, anchor)
    }
}

/// Coarse state used only for logging (§3 lifecycle); transitions are not
/// strictly enforced since the protocol itself is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Registered,
    Running,
    Reconfiguring,
    Paused,
    Stopping,
    Exited,
}

pub struct ClientAgent<E: ClientEffects> {
    control: Arc<ControlTransport>,
    rm_addr: SocketAddr,
    host_name: String,
    client_id: u32,
    service_id: u64,
    effects: E,
    state: Mutex<AgentState>,
    running: AtomicBool,
}

impl<E: ClientEffects> ClientAgent<E> {
    pub fn new(
        control: Arc<ControlTransport>,
        rm_addr: SocketAddr,
        host_name: String,
        client_id: u32,
        service_id: u64,
        effects: E,
    ) -> Arc<Self> {
        Arc::new(ClientAgent {
            control,
            rm_addr,
            host_name,
            client_id,
            service_id,
            effects,
            state: Mutex::new(AgentState::Idle),
            running: AtomicBool::new(true),
        })
    }

    fn set_state(&self, state: AgentState) {
        *self.state.lock().unwrap() = state;
    }

    /// The effect this agent drives; exposed for callers (and tests) that
    /// need to observe it directly rather than through the wire protocol.
    pub fn effects(&self) -> &E {
        &self.effects
    }

    /// Sends a `SYNC_REQUEST` announcing this client to the orchestrator
    /// (§3 lifecycle: "created on receipt of SYNC_REQUEST").
    pub fn register(&self) -> anyhow::Result<()> {
        let msg = ControlMessage {
            kind: MessageKind::RmClientSyncRequest,
            priority: 0,
            source_id: self.client_id,
            destination_id: 0,
            service_id: self.service_id,
            mode: 0,
            send_time_point: Timestamp::now(),
            protocol_id: ProtocolId::None,
            payload: RmPayload::default(),
        };
        self.control.send_to(&msg, self.rm_addr)?;
        self.set_state(AgentState::Registered);
        Ok(())
    }

    /// Runs the receive loop on the calling thread until `stop()` is
    /// called from another thread (§5 shutdown contract).
    pub fn run(self: &Arc<Self>) {
        let queue = Arc::new(InboundQueue::new());
        let receiver_queue = queue.clone();
        let receiver_self = self.clone();
        let receive_thread = std::thread::spawn(move || {
            while receiver_self.running.load(Ordering::Relaxed) {
                match receiver_self.control.recv_from() {
                    Ok(Some((msg, peer))) => receiver_queue.enqueue((msg, peer)),
                    Ok(None) => continue,
                    Err(err) => {
                        if receiver_self.running.load(Ordering::Relaxed) {
                            warn!(error = %err, "control receive failed, stopping receive loop");
                        }
                        break;
                    }
                }
            }
        });

        while self.running.load(Ordering::Relaxed) {
            match queue.dequeue_timeout() {
                Some(Some((msg, peer))) => self.handle_message(msg, peer),
                Some(None) => continue,
                None => break,
            }
        }

        let _ = receive_thread.join();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn send_ack(&self, kind: MessageKind, reply_to: &ControlMessage) {
        let ack = ControlMessage {
            kind,
            priority: reply_to.priority,
            source_id: self.client_id,
            destination_id: reply_to.source_id,
            service_id: self.service_id,
            mode: reply_to.mode,
            send_time_point: Timestamp::now(),
            protocol_id: ProtocolId::None,
            payload: RmPayload::default(),
        };
        if let Err(err) = self.control.send_to(&ack, self.rm_addr) {
            warn!(error = %err, "failed to send acknowledgement");
        }
    }

    fn handle_message(&self, msg: ControlMessage, peer: SocketAddr) {
        use MessageKind::*;
        match msg.kind {
            RmClientStart => {
                self.effects.transmission();
                self.set_state(AgentState::Running);
            }
            RmClientStop => {
                self.effects.stop();
                self.set_state(AgentState::Stopping);
                self.send_ack(RmClientSyncReceive, &msg);
            }
            RmClientPause => {
                self.effects.paused();
                self.set_state(AgentState::Paused);
                self.send_ack(RmClientSyncReceive, &msg);
            }
            RmClientReconfigure => {
                self.set_state(AgentState::Reconfiguring);
                if msg.payload.ts_stop.is_zero()
                    && msg.payload.ts_reconfig.is_zero()
                    && msg.payload.ts_start.is_zero()
                {
                    self.effects.reconfigure(msg.mode);
                    self.effects.transmission();
                } else {
                    self.three_phase_wait(&msg.payload, msg.mode);
                }
                self.send_ack(RmClientSyncReceive, &msg);
                self.send_ack(RmClientSyncReconfigureDone, &msg);
                self.set_state(AgentState::Running);
            }
            RmClientSyncTimestampStart => {
                busy_wait_until(msg.payload.ts_start, || !self.running.load(Ordering::Relaxed));
                self.effects.transmission();
                self.set_state(AgentState::Running);
                self.send_ack(RmClientSyncReceive, &msg);
            }
            RmClientSyncTimestampStop => {
                busy_wait_until(msg.payload.ts_stop, || !self.running.load(Ordering::Relaxed));
                self.effects.stop();
                self.set_state(AgentState::Stopping);
                self.send_ack(RmClientSyncReceive, &msg);
            }
            RmClientSyncTimestampPause => {
                busy_wait_until(msg.payload.ts_stop, || !self.running.load(Ordering::Relaxed));
                self.effects.paused();
                self.set_state(AgentState::Paused);
                self.send_ack(RmClientSyncReceive, &msg);
            }
            RmClientSyncTimestampReconfigure | RmClientSyncTimestampReconfigureHw => {
                self.set_state(AgentState::Reconfiguring);
                self.three_phase_wait(&msg.payload, msg.mode);
                self.send_ack(RmClientSyncReceive, &msg);
                self.send_ack(RmClientSyncReconfigureDone, &msg);
                self.set_state(AgentState::Running);
            }
            // §9 decision: the soft variant is ACK-only — no busy-wait, no
            // generator/mode-apply side effect (matches the reference's
            // `wired_rm_client_endnode.cpp` soft case).
            RmClientSyncTimestampReconfigureSoft => {
                self.send_ack(RmClientSyncReceive, &msg);
                self.send_ack(RmClientSyncReconfigureDone, &msg);
            }
            RmClientSyncTimestampReconfigureSyncObjectHw => {
                self.set_state(AgentState::Reconfiguring);
                busy_wait_until(msg.payload.ts_reconfig, || !self.running.load(Ordering::Relaxed));
                self.effects
                    .reconfigure_finish_object(msg.mode, Some(msg.payload.ts_start).filter(|t| !t.is_zero()));
                self.send_ack(RmClientSyncReceive, &msg);
                self.send_ack(RmClientSyncReconfigureDone, &msg);
                self.set_state(AgentState::Running);
            }
            RmClientExit | RmClientSyncTimestampExit => {
                self.effects.stop();
                self.send_ack(RmClientSyncReceive, &msg);
                self.set_state(AgentState::Exited);
                self.stop();
            }
            RmClientReconfigureHw => {
                self.set_state(AgentState::Reconfiguring);
                self.effects.reconfigure(msg.mode);
                self.send_ack(RmClientSyncReceive, &msg);
                self.send_ack(RmClientSyncReconfigureDone, &msg);
                self.set_state(AgentState::Running);
            }
            RmClientRelease => {
                info!(host = %self.host_name, "RM_CLIENT_RELEASE received, ignoring (§9 decision)");
            }
            other => {
                info!(host = %self.host_name, peer = %peer, kind = ?other, "ignoring message kind");
            }
        }
    }

    /// The three-phase wait (§4.4): validate, then pause → reconfigure →
    /// restart in sequence. Always returns; acknowledgements are sent by the
    /// caller regardless of whether the round actually executed (§7,
    /// Scenario C: a stale timestamp still gets a `SYNC_RECONFIGURE_DONE`).
    fn three_phase_wait(&self, payload: &RmPayload, mode: u8) {
        let now = Timestamp::now();
        if let Some(err) = Self::validate(payload, now) {
            warn!(error = %err, "timestamps invalid, aborting reconfiguration round");
            return;
        }

        busy_wait_until(payload.ts_stop, || !self.running.load(Ordering::Relaxed));
        self.effects.paused();

        busy_wait_until(payload.ts_reconfig, || !self.running.load(Ordering::Relaxed));
        self.effects.reconfigure(mode);

        busy_wait_until(payload.ts_start, || !self.running.load(Ordering::Relaxed));
        self.effects.transmission();
    }

    fn validate(payload: &RmPayload, now: Timestamp) -> Option<TimestampError> {
        for (field, value) in [
            ("ts_stop", payload.ts_stop),
            ("ts_reconfig", payload.ts_reconfig),
            ("ts_start", payload.ts_start),
        ] {
            if !value.is_valid_for_wait(now) {
                return Some(TimestampError { field, value, now });
            }
        }
        None
    }
}
