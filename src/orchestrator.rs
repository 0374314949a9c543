//! The central RM orchestrator (§4.3): collects registrations, drives the
//! global start, iterates mode-change rounds, and drives the final
//! shutdown round.
//!
//! Long-running phases (`experiment_mode_change`'s inter-round sleeps)
//! never run on the timer-manager worker thread (§4.2's warning that
//! long callbacks block subsequent timers); each phase is dispatched onto
//! its own thread from a short timer callback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::carriers::{InboundQueue, ServiceRegistry};
use crate::clock::Timestamp;
use crate::config::Config;
use crate::slot::choose_service_slot;
use crate::timer::TimerManager;
use crate::transport::ControlTransport;
use crate::wire::{ControlMessage, MessageKind, ProtocolId, RmCommand, RmPayload};

pub struct Orchestrator {
    control: Arc<ControlTransport>,
    queue: Arc<InboundQueue>,
    registry: Arc<ServiceRegistry>,
    timer: TimerManager,
    config: Arc<Config>,
    source_id: u32,
    rm_active_timestamp_last: Mutex<Timestamp>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Binds the control socket, starts the receive/dispatch threads, and
    /// registers the boot timer (§4.3 "on construction").
    pub fn spawn(config: Arc<Config>, bind_addr: SocketAddr, source_id: u32) -> anyhow::Result<Arc<Self>> {
        let control = Arc::new(ControlTransport::bind(bind_addr)?);
        let orchestrator = Arc::new(Orchestrator {
            control,
            queue: Arc::new(InboundQueue::new()),
            registry: Arc::new(ServiceRegistry::new()),
            timer: TimerManager::start(),
            config,
            source_id,
            rm_active_timestamp_last: Mutex::new(Timestamp::ZERO),
            running: AtomicBool::new(true),
        });
        orchestrator.spawn_receive_thread();
        orchestrator.spawn_dispatch_thread();
        orchestrator.schedule_boot();
        Ok(orchestrator)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// The control socket's bound local address; used by callers (and
    /// tests) that spawn the orchestrator on an ephemeral port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.control.local_addr()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn spawn_receive_thread(self: &Arc<Self>) {
        let s = self.clone();
        std::thread::spawn(move || {
            while s.running.load(Ordering::Relaxed) {
                match s.control.recv_from() {
                    Ok(Some((msg, peer))) => s.queue.enqueue((msg, peer)),
                    Ok(None) => continue,
                    Err(err) => {
                        if s.running.load(Ordering::Relaxed) {
                            warn!(error = %err, "orchestrator control receive failed");
                        }
                        break;
                    }
                }
            }
        });
    }

    fn spawn_dispatch_thread(self: &Arc<Self>) {
        let s = self.clone();
        std::thread::spawn(move || {
            while s.running.load(Ordering::Relaxed) {
                match s.queue.dequeue_timeout() {
                    Some(Some((msg, peer))) => s.handle_message(msg, peer),
                    Some(None) => continue,
                    None => break,
                }
            }
        });
    }

    /// The dispatch loop's branch on inbound `kind` (§4.3).
    fn handle_message(&self, msg: ControlMessage, peer: SocketAddr) {
        use MessageKind::*;
        match msg.kind {
            RmClientSyncRequest => {
                let first_sight = self.registry.observe(msg.service_id, msg.clone(), peer);
                info!(
                    service_id = msg.service_id,
                    source_id = msg.source_id,
                    first_sight,
                    "client sync request"
                );
            }
            RmClientSyncReceive => {
                info!(service_id = msg.service_id, source_id = msg.source_id, "client sync receive ack");
            }
            RmClientSyncReconfigureDone => {
                info!(service_id = msg.service_id, source_id = msg.source_id, "client reconfigure done");
            }
            RmClientRelease => {
                info!(service_id = msg.service_id, "RM_CLIENT_RELEASE received, ignoring (§9 decision)");
            }
            other => {
                info!(kind = ?other, peer = %peer, "ignoring message kind");
            }
        }
    }

    fn schedule_boot(self: &Arc<Self>) {
        let s = self.clone();
        self.timer.register(
            Uuid::new_v4(),
            self.config.experiment.client_init_time,
            false,
            Box::new(move || {
                let s2 = s.clone();
                std::thread::spawn(move || s2.initial_start_handler());
            }),
        );
    }

    fn schedule_mode_change(self: &Arc<Self>, after: Duration) {
        let s = self.clone();
        self.timer.register(
            Uuid::new_v4(),
            after,
            false,
            Box::new(move || {
                let s2 = s.clone();
                std::thread::spawn(move || s2.experiment_mode_change());
            }),
        );
    }

    fn schedule_stopping(self: &Arc<Self>, after: Duration) {
        let s = self.clone();
        self.timer.register(
            Uuid::new_v4(),
            after,
            false,
            Box::new(move || {
                let s2 = s.clone();
                std::thread::spawn(move || s2.stopping_experiment());
            }),
        );
    }

    /// Sends a command to `service_id`'s last-registered peer address,
    /// using the retained template's `source_id` as `destination_id`
    /// (§4.3, §9). Silently skips unregistered services.
    fn send_command(&self, service_id: u64, kind: MessageKind, mode: u8, payload: RmPayload) {
        let Some((template, peer)) = self.registry.last_seen(service_id) else {
            warn!(service_id, "no registered client to send command to");
            return;
        };
        let msg = ControlMessage {
            kind,
            priority: template.priority,
            source_id: self.source_id,
            destination_id: template.source_id,
            service_id,
            mode,
            send_time_point: Timestamp::now(),
            protocol_id: ProtocolId::Rm,
            payload,
        };
        if let Err(err) = self.control.send_to(&msg, peer) {
            warn!(service_id, error = %err, "failed to send command");
        }
    }

    /// `initial_start_handler` (§4.3): synchronous or asynchronous global
    /// start, followed by scheduling the mode-change core loop.
    fn initial_start_handler(self: Arc<Self>) {
        let now = Timestamp::now();
        let exp = self.config.experiment.clone();

        if exp.synchronous_start_mode {
            let start_ts = now
                .round_up_to_next_second()
                .add_duration(exp.mc_distribution_phase_duration);
            let mut last = start_ts;
            for service_id in self.registry.ordered_service_ids() {
                let client_id = self
                    .registry
                    .last_seen(service_id)
                    .map(|(template, _)| template.source_id)
                    .unwrap_or(0);
                let startup_mode = exp.resolve_startup_mode(client_id);
                let slot_offset_ms = self
                    .config
                    .service_settings(service_id, startup_mode)
                    .map(|s| s.slot_offset_ms)
                    .unwrap_or(0);
                let per_client_ts = start_ts.add_duration(Duration::from_millis(slot_offset_ms as u64));
                self.send_command(
                    service_id,
                    MessageKind::RmClientSyncTimestampStart,
                    0,
                    RmPayload {
                        command: RmCommand::SyncTimestampStart,
                        ts_start: per_client_ts,
                        ..RmPayload::default()
                    },
                );
                last = per_client_ts;
            }
            *self.rm_active_timestamp_last.lock().unwrap() = last;
        } else {
            for service_id in self.registry.ordered_service_ids() {
                self.send_command(
                    service_id,
                    MessageKind::RmClientStart,
                    0,
                    RmPayload {
                        command: RmCommand::Start,
                        ..RmPayload::default()
                    },
                );
            }
            *self.rm_active_timestamp_last.lock().unwrap() = now;
        }

        self.schedule_mode_change(exp.experiment_begin_offset);
    }

    fn reference_slot_offset_ms(&self, network_mode: u8) -> u32 {
        self.registry
            .ordered_service_ids()
            .into_iter()
            .find_map(|service_id| self.config.service_settings(service_id, network_mode).ok())
            .map(|s| s.slot_offset_ms)
            .unwrap_or(0)
    }

    /// `experiment_mode_change` (§4.3). Runs on its own thread (see
    /// `schedule_mode_change`); its inter-round sleeps must never block the
    /// timer-manager worker.
    fn experiment_mode_change(self: Arc<Self>) {
        let exp = self.config.experiment.clone();

        for _iteration in 0..exp.experiment_iterations {
            for &network_mode in &exp.reconfiguration_order {
                let now = Timestamp::now();
                let last = *self.rm_active_timestamp_last.lock().unwrap();

                // The "hybrid" variant (§4.3): synchronous mode-change
                // payload, but no hyperperiod alignment, and the three
                // offsets are cumulative rather than parallel. Selected
                // when rounds carry timestamps but the global start itself
                // was asynchronous (SPEC_FULL §4.3 naming: "synchronous
                // objects / asynchronous start").
                let hybrid = exp.synchronous_mode && !exp.synchronous_start_mode;

                let (ts_stop, ts_reconfig, ts_start) = if hybrid {
                    let mc_begin = now.add_duration(exp.mc_distribution_phase_duration);
                    let ts_stop = mc_begin.add_duration(exp.mc_client_stop_offset);
                    let ts_reconfig = ts_stop.add_duration(exp.mc_client_reconfig_offset);
                    let ts_start = ts_reconfig.add_duration(exp.mc_client_start_offset);
                    (ts_stop, ts_reconfig, ts_start)
                } else if exp.synchronous_mode {
                    let diff = now.saturating_sub(last);
                    let hyperperiod_duration = exp.hyperperiod_duration;
                    let hyperperiod_unit = exp.hyperperiod_unit();
                    let k1 = diff.as_nanos() / hyperperiod_duration.as_nanos().max(1) + 1;
                    let k2 = exp.mc_distribution_phase_duration.as_nanos() / hyperperiod_duration.as_nanos().max(1) + 1;
                    let factor = (k1 + k2).min(u32::MAX as u128) as u32;
                    let target_hyperperiod = last.add_duration(hyperperiod_unit.saturating_mul(factor));
                    let service_offset_ms = self.reference_slot_offset_ms(network_mode);
                    let (_slot, slot_offset) =
                        choose_service_slot(service_offset_ms, hyperperiod_duration, exp.hyperperiod_slots);
                    let mc_begin = target_hyperperiod.add_duration(slot_offset);
                    let ts_stop = mc_begin.add_duration(exp.mc_client_stop_offset);
                    let ts_reconfig = mc_begin.add_duration(exp.mc_client_reconfig_offset);
                    let ts_start = mc_begin.add_duration(exp.mc_client_start_offset);
                    (ts_stop, ts_reconfig, ts_start)
                } else {
                    (Timestamp::ZERO, Timestamp::ZERO, Timestamp::ZERO)
                };

                for service_id in self.registry.ordered_service_ids() {
                    let Some((template, _peer)) = self.registry.last_seen(service_id) else {
                        continue;
                    };
                    let client_id = template.source_id;
                    let Some(&configured_mode) = exp
                        .reconfiguration_map
                        .get(&network_mode)
                        .and_then(|by_client| by_client.get(&client_id))
                    else {
                        continue;
                    };

                    if exp.synchronous_mode {
                        self.send_command(
                            service_id,
                            MessageKind::RmClientSyncTimestampReconfigure,
                            configured_mode,
                            RmPayload {
                                command: RmCommand::SyncTimestampReconfigure,
                                ts_stop,
                                ts_reconfig,
                                ts_start,
                                ..RmPayload::default()
                            },
                        );
                    } else {
                        self.send_command(
                            service_id,
                            MessageKind::RmClientReconfigureHw,
                            configured_mode,
                            RmPayload {
                                command: RmCommand::Reconfigure,
                                ..RmPayload::default()
                            },
                        );
                    }
                }

                if exp.synchronous_mode && !hybrid {
                    *self.rm_active_timestamp_last.lock().unwrap() = ts_start;
                }

                let gap = random_duration_in(exp.inter_mc_gap_min, exp.inter_mc_gap_max);
                std::thread::sleep(gap);
            }
        }

        self.schedule_stopping(exp.experiment_end_offset);
    }

    /// `stopping_experiment` (§4.3): `mode = 10` is the shutdown sentinel.
    fn stopping_experiment(self: Arc<Self>) {
        const SHUTDOWN_MODE: u8 = 10;
        let exp = self.config.experiment.clone();

        if exp.synchronous_mode {
            let mc_begin = Timestamp::now()
                .round_up_to_next_second()
                .add_duration(exp.mc_distribution_phase_duration);
            let ts_stop = mc_begin.add_duration(Duration::from_millis(10));
            let ts_reconfig_start = mc_begin.add_duration(Duration::from_millis(20));
            for service_id in self.registry.ordered_service_ids() {
                self.send_command(
                    service_id,
                    MessageKind::RmClientSyncTimestampReconfigure,
                    SHUTDOWN_MODE,
                    RmPayload {
                        command: RmCommand::SyncTimestampReconfigure,
                        ts_stop,
                        ts_reconfig: ts_reconfig_start,
                        ts_start: ts_reconfig_start,
                        ..RmPayload::default()
                    },
                );
            }
        } else {
            for service_id in self.registry.ordered_service_ids() {
                self.send_command(
                    service_id,
                    MessageKind::RmClientStop,
                    SHUTDOWN_MODE,
                    RmPayload {
                        command: RmCommand::Stop,
                        ..RmPayload::default()
                    },
                );
            }
        }
    }
}

fn random_duration_in(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
