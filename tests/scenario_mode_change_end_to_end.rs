//! Scenario B (synchronized mode change): a full endnode stack — a real
//! `ClientAgent` driving a real `GeneratorHandle`/generator thread over
//! loopback UDP — receives a `SYNC_TIMESTAMP_RECONFIGURE` command and ends
//! up sending data-plane fragments to the new mode's destination.
//!
//! Scenario D (soft reconfigure): the `...ReconfigureSoft` wire kind acks
//! without ever driving the local effect (§9 decision), unlike the full
//! three-phase wait above.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rscmng::agent::{ClientAgent, ClientEffects};
use rscmng::clock::Timestamp;
use rscmng::config::Config;
use rscmng::generator::{self, GeneratorConfig, GeneratorHandle};
use rscmng::transport::ControlTransport;
use rscmng::wire::{ControlMessage, MessageKind, ProtocolId, RmCommand, RmPayload};

fn write_config(dir: &tempfile::TempDir, mode0_port: u16, mode1_port: u16) -> Arc<Config> {
    let json = format!(
        r#"{{
            "UNIT_SETTINGS": [],
            "SERVICE_SETTINGS": [
                {{
                    "SERVICE_ID": 1, "MODE": 0, "SERVICE_IP": "127.0.0.1", "PORT": {mode0_port},
                    "DEADLINE [ms]": 40, "OBJECT_SIZE [KByte]": 1, "PRIORITY": 1,
                    "SLOT_OFFSET [ms]": 0, "SLOT_LENGTH [ms]": 10,
                    "INTER_PACKET_GAP[us]": 100, "INTER_OBJECT_GAP[us]": 1000
                }},
                {{
                    "SERVICE_ID": 1, "MODE": 1, "SERVICE_IP": "127.0.0.1", "PORT": {mode1_port},
                    "DEADLINE [ms]": 40, "OBJECT_SIZE [KByte]": 1, "PRIORITY": 1,
                    "SLOT_OFFSET [ms]": 0, "SLOT_LENGTH [ms]": 10,
                    "INTER_PACKET_GAP[us]": 100, "INTER_OBJECT_GAP[us]": 1000
                }}
            ],
            "EXPERIMENT_SETTINGS": {{
                "EXPERIMENT_NUMBER": 1,
                "CLIENT_INIT_TIME[ms]": 60000,
                "EXPERIMENT_BEGIN_OFFSET[ms]": 60000,
                "EXPERIMENT_END_OFFSET[ms]": 60000,
                "EXPERIMENT_ITERATIONS": 0,
                "EXPERIMENT_SYNCHRONOUS_START_FLAG": true,
                "EXPERIMENT_SYNCHRONOUS_FLAG": true,
                "MC_DISTRIBUTION_PHASE_DURATION[ms]": 200,
                "MC_CLIENT_STOP_OFFSET[ms]": 10,
                "MC_CLIENT_RECONFIG_OFFSET[ms]": 20,
                "MC_CLIENT_START_OFFSET[ms]": 40,
                "INTER_MC_GAP_MIN[ms]": 100,
                "INTER_MC_GAP_MAX[ms]": 200,
                "HYPERPERIOD_DURATION[ms]": 100,
                "HYPERPERIOD_SLOTS": 10,
                "EXPERIMENT_STARTUP_MODE": 0,
                "EXPERIMENT_RECONFIGURATION_ORDER": []
            }}
        }}"#
    );
    let path = dir.path().join("config.json");
    std::fs::write(&path, json).unwrap();
    Arc::new(Config::load(&path).unwrap())
}

fn recv_message(socket: &UdpSocket) -> ControlMessage {
    let mut buf = [0u8; rscmng::wire::MAX_LENGTH];
    let (len, _peer) = socket.recv_from(&mut buf).expect("expected an ack before the timeout");
    ControlMessage::deserialize(&buf[..len]).expect("valid control message")
}

#[test]
fn reconfigure_switches_generator_destination_after_three_phase_wait() {
    let mode0_sink = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mode1_sink = UdpSocket::bind("127.0.0.1:0").unwrap();
    mode0_sink.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    mode1_sink.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mode0_port = mode0_sink.local_addr().unwrap().port();
    let mode1_port = mode1_sink.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, mode0_port, mode1_port);

    let data_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let handle = GeneratorHandle::new(0);
    let gen_config = GeneratorConfig {
        service_id: 1,
        source_id: 7,
        priority: 1,
        initial_mode: 0,
        config: config.clone(),
    };
    let handle_for_thread = handle.clone();
    let generator_thread = std::thread::spawn(move || generator::run(handle_for_thread, data_socket, gen_config));

    let control = Arc::new(ControlTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap());
    let control_addr = control.local_addr().unwrap();
    let agent = ClientAgent::new(control, "127.0.0.1:0".parse().unwrap(), "endnode-a".into(), 7, 1, handle.clone());
    let agent_for_thread = agent.clone();
    let agent_thread = std::thread::spawn(move || agent_for_thread.run());

    handle.transmission();

    // Confirm mode-0 traffic is actually flowing before reconfiguring.
    let mut saw_mode0 = false;
    for _ in 0..20 {
        let mut buf = [0u8; 2048];
        if mode0_sink.recv_from(&mut buf).is_ok() {
            saw_mode0 = true;
            break;
        }
    }
    assert!(saw_mode0, "expected at least one mode-0 data fragment before reconfiguring");

    // Fake RM: drive the three-phase wait with near-future timestamps.
    let rm_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    rm_socket.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let now = Timestamp::now();
    let msg = ControlMessage {
        kind: MessageKind::RmClientSyncTimestampReconfigure,
        priority: 0,
        source_id: 0,
        destination_id: 7,
        service_id: 1,
        mode: 1,
        send_time_point: now,
        protocol_id: ProtocolId::None,
        payload: RmPayload {
            command: RmCommand::SyncTimestampReconfigure,
            ts_stop: now.add_duration(Duration::from_millis(50)),
            ts_reconfig: now.add_duration(Duration::from_millis(100)),
            ts_start: now.add_duration(Duration::from_millis(150)),
            ..RmPayload::default()
        },
    };
    rm_socket.send_to(&msg.serialize().unwrap(), control_addr).unwrap();

    let ack1 = recv_message(&rm_socket);
    assert_eq!(ack1.kind, MessageKind::RmClientSyncReceive);
    let ack2 = recv_message(&rm_socket);
    assert_eq!(ack2.kind, MessageKind::RmClientSyncReconfigureDone);

    // After ts_start the generator must be emitting to the mode-1 socket.
    let mut saw_mode1 = false;
    for _ in 0..50 {
        let mut buf = [0u8; 2048];
        if mode1_sink.recv_from(&mut buf).is_ok() {
            saw_mode1 = true;
            break;
        }
    }
    assert!(saw_mode1, "expected mode-1 data fragments after the reconfigure completed");

    agent.stop();
    handle.stop();
    let _ = agent_thread.join();
    let _ = generator_thread.join();
}

#[derive(Default)]
struct RecordingEffects {
    calls: Mutex<Vec<&'static str>>,
}

impl ClientEffects for RecordingEffects {
    fn transmission(&self) {
        self.calls.lock().unwrap().push("transmission");
    }
    fn stop(&self) {
        self.calls.lock().unwrap().push("stop");
    }
    fn paused(&self) {
        self.calls.lock().unwrap().push("paused");
    }
    fn reconfigure(&self, _mode: u8) {
        self.calls.lock().unwrap().push("reconfigure");
    }
    fn reconfigure_finish_object(&self, _mode: u8, _anchor: Option<Timestamp>) {
        self.calls.lock().unwrap().push("reconfigure_finish_object");
    }
}

#[test]
fn soft_reconfigure_acks_without_driving_any_effect() {
    let control = Arc::new(ControlTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap());
    let agent_addr = control.local_addr().unwrap();
    let rm_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    rm_socket.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let rm_addr = rm_socket.local_addr().unwrap();

    let agent = ClientAgent::new(
        control,
        rm_addr,
        "endnode-soft".into(),
        11,
        1,
        RecordingEffects::default(),
    );
    let agent_for_thread = agent.clone();
    let agent_thread = std::thread::spawn(move || agent_for_thread.run());

    let now = Timestamp::now();
    let msg = ControlMessage {
        kind: MessageKind::RmClientSyncTimestampReconfigureSoft,
        priority: 0,
        source_id: 0,
        destination_id: 11,
        service_id: 1,
        mode: 1,
        send_time_point: now,
        protocol_id: ProtocolId::None,
        payload: RmPayload {
            command: RmCommand::SyncTimestampReconfigureSoft,
            ts_stop: now.add_duration(Duration::from_millis(50)),
            ts_reconfig: now.add_duration(Duration::from_millis(100)),
            ts_start: now.add_duration(Duration::from_millis(150)),
            ..RmPayload::default()
        },
    };
    rm_socket.send_to(&msg.serialize().unwrap(), agent_addr).unwrap();

    let ack1 = recv_message(&rm_socket);
    assert_eq!(ack1.kind, MessageKind::RmClientSyncReceive);
    let ack2 = recv_message(&rm_socket);
    assert_eq!(ack2.kind, MessageKind::RmClientSyncReconfigureDone);

    assert!(
        agent.effects().calls.lock().unwrap().is_empty(),
        "the soft variant must ack without ever calling into the local effect"
    );

    agent.stop();
    let _ = agent_thread.join();
}
