//! Scenario A (synchronous start of two clients): two services register
//! with the orchestrator, which must send each a `SYNC_TIMESTAMP_START`
//! whose `ts_start` is staggered by the services' configured slot offsets.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use rscmng::clock::Timestamp;
use rscmng::config::Config;
use rscmng::orchestrator::Orchestrator;
use rscmng::wire::{ControlMessage, MessageKind, ProtocolId, RmPayload};

fn write_config(dir: &tempfile::TempDir) -> Arc<Config> {
    let json = r#"{
        "UNIT_SETTINGS": [],
        "SERVICE_SETTINGS": [
            {
                "SERVICE_ID": 1, "MODE": 0, "SERVICE_IP": "127.0.0.1", "PORT": 20001,
                "DEADLINE [ms]": 100, "OBJECT_SIZE [KByte]": 1, "PRIORITY": 1,
                "SLOT_OFFSET [ms]": 0, "SLOT_LENGTH [ms]": 10,
                "INTER_PACKET_GAP[us]": 200, "INTER_OBJECT_GAP[us]": 1000
            },
            {
                "SERVICE_ID": 2, "MODE": 0, "SERVICE_IP": "127.0.0.1", "PORT": 20002,
                "DEADLINE [ms]": 100, "OBJECT_SIZE [KByte]": 1, "PRIORITY": 1,
                "SLOT_OFFSET [ms]": 50, "SLOT_LENGTH [ms]": 10,
                "INTER_PACKET_GAP[us]": 200, "INTER_OBJECT_GAP[us]": 1000
            }
        ],
        "EXPERIMENT_SETTINGS": {
            "EXPERIMENT_NUMBER": 1,
            "CLIENT_INIT_TIME[ms]": 500,
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
        }
    }"#;
    let path = dir.path().join("config.json");
    std::fs::write(&path, json).unwrap();
    Arc::new(Config::load(&path).unwrap())
}

fn sync_request(source_id: u32, service_id: u64) -> ControlMessage {
    ControlMessage {
        kind: MessageKind::RmClientSyncRequest,
        priority: 0,
        source_id,
        destination_id: 0,
        service_id,
        mode: 0,
        send_time_point: Timestamp::now(),
        protocol_id: ProtocolId::None,
        payload: RmPayload::default(),
    }
}

fn recv_message(socket: &UdpSocket) -> ControlMessage {
    let mut buf = [0u8; rscmng::wire::MAX_LENGTH];
    let (len, _peer) = socket.recv_from(&mut buf).expect("expected a reply before the timeout");
    ControlMessage::deserialize(&buf[..len]).expect("valid control message")
}

#[test]
fn two_clients_receive_slot_staggered_start_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    let orchestrator = Orchestrator::spawn(config, "127.0.0.1:0".parse().unwrap(), 0).unwrap();
    let rm_addr = orchestrator.local_addr().unwrap();

    let client_a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let client_b = UdpSocket::bind("127.0.0.1:0").unwrap();
    client_a.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client_b.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client_a.send_to(&sync_request(101, 1).serialize().unwrap(), rm_addr).unwrap();
    client_b.send_to(&sync_request(102, 2).serialize().unwrap(), rm_addr).unwrap();

    // Wait for registration before the boot timer (500ms) fires.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while orchestrator.registry().len() < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(orchestrator.registry().len(), 2);

    let start_a = recv_message(&client_a);
    let start_b = recv_message(&client_b);
    assert_eq!(start_a.kind, MessageKind::RmClientSyncTimestampStart);
    assert_eq!(start_b.kind, MessageKind::RmClientSyncTimestampStart);

    // Service 2's 50ms slot offset must stagger its start after service 1's.
    let gap = start_b.payload.ts_start.saturating_sub(start_a.payload.ts_start);
    assert!(
        gap >= Duration::from_millis(40) && gap <= Duration::from_millis(60),
        "expected ~50ms stagger between slots, got {gap:?}"
    );

    orchestrator.stop();
}
