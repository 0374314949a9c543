//! Configuration loading (§6, §10.2).
//!
//! The on-disk format is JSON with three top-level sections —
//! `UNIT_SETTINGS`, `SERVICE_SETTINGS`, `EXPERIMENT_SETTINGS` — whose field
//! names mirror the bracket-suffixed keys of the reference's
//! `config_reader.hpp` (`"DEADLINE [ms]"`, `"OBJECT_SIZE [KByte]"`, ...).
//! The file is loaded once at process start and treated as immutable for
//! the run (§6); any problem reading or parsing it is a fatal startup error
//! (§7).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::data::total_fragments;
use crate::error::ConfigError;

fn duration_ms<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ms = u64::deserialize(de)?;
    Ok(Duration::from_millis(ms))
}

fn duration_us<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let us = u64::deserialize(de)?;
    Ok(Duration::from_micros(us))
}

/// Per-mode per-service configuration (§3). `number_packets` and
/// `estimated_transmission_time_ms` are computed once after deserialization,
/// matching the reference's own derived bookkeeping (§3, §10.2).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettingsEntry {
    #[serde(rename = "SERVICE_ID")]
    pub service_id: u64,
    #[serde(rename = "MODE")]
    pub mode: u8,
    #[serde(rename = "SERVICE_IP")]
    pub ip: String,
    #[serde(rename = "PORT")]
    pub port: u16,
    #[serde(rename = "PATH", default)]
    pub data_path: Vec<u32>,
    #[serde(rename = "DEADLINE [ms]")]
    pub deadline_ms: u32,
    #[serde(rename = "OBJECT_SIZE [KByte]")]
    pub object_size_kb: u32,
    #[serde(rename = "PRIORITY")]
    pub priority: u32,
    #[serde(rename = "SLOT_OFFSET [ms]")]
    pub slot_offset_ms: u32,
    #[serde(rename = "SLOT_LENGTH [ms]")]
    pub slot_length_ms: u32,
    #[serde(rename = "INTER_PACKET_GAP[us]", deserialize_with = "duration_us")]
    pub inter_packet_gap: Duration,
    #[serde(rename = "INTER_OBJECT_GAP[us]", deserialize_with = "duration_us")]
    pub inter_object_gap: Duration,
}

/// Derived, ready-to-use settings for one `(service_id, mode)` pair.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub service_id: u64,
    pub mode: u8,
    pub ip: String,
    pub port: u16,
    pub data_path: Vec<u32>,
    pub deadline_ms: u32,
    pub object_size_kb: u32,
    pub priority: u32,
    pub slot_offset_ms: u32,
    pub slot_length_ms: u32,
    pub inter_packet_gap: Duration,
    pub inter_object_gap: Duration,
    pub number_packets: u32,
    pub estimated_transmission_time_ms: f64,
}

impl From<ServiceSettingsEntry> for ServiceSettings {
    fn from(e: ServiceSettingsEntry) -> Self {
        let object_size_bytes = e.object_size_kb as u64 * 1024;
        let number_packets = total_fragments(object_size_bytes);
        let estimated_transmission_time_ms =
            number_packets as f64 * e.inter_packet_gap.as_secs_f64() * 1000.0;
        ServiceSettings {
            service_id: e.service_id,
            mode: e.mode,
            ip: e.ip,
            port: e.port,
            data_path: e.data_path,
            deadline_ms: e.deadline_ms,
            object_size_kb: e.object_size_kb,
            priority: e.priority,
            slot_offset_ms: e.slot_offset_ms,
            slot_length_ms: e.slot_length_ms,
            inter_packet_gap: e.inter_packet_gap,
            inter_object_gap: e.inter_object_gap,
            number_packets,
            estimated_transmission_time_ms,
        }
    }
}

/// Per-client identity (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct UnitSettings {
    #[serde(rename = "HOST_ID")]
    pub host_name: String,
    #[serde(rename = "CLIENT_ID")]
    pub client_id: u32,
    #[serde(rename = "RM_CONTROL_LOCAL_IP")]
    pub control_local_ip: String,
    #[serde(rename = "RM_CONTROL_LOCAL_PORT")]
    pub control_local_port: u16,
    #[serde(rename = "RM_CONTROL_RM_IP")]
    pub control_rm_ip: String,
    #[serde(rename = "RM_CONTROL_RM_PORT")]
    pub control_rm_port: u16,
    #[serde(rename = "SERVICE_LOCAL_IP", default)]
    pub service_local_ip: Vec<String>,
    #[serde(rename = "SERVICE_LOCAL_PORT", default)]
    pub service_local_port: Vec<u16>,
    #[serde(rename = "CLIENT_PRIORITY")]
    pub client_priority: u32,
    /// Network interface name for the switch client's startup link-rate
    /// probe (§4.5). Not part of the reference's own config schema;
    /// absent for endnode units, which have no such probe.
    #[serde(rename = "NETWORK_INTERFACE", default)]
    pub network_interface: Option<String>,
    /// Per-client UUID supplementing the reference's `client_uuid`: used as
    /// the timer-manager key-space source and as a human-debuggable
    /// identity distinct from the numeric `client_id` (§3, SPEC_FULL §3).
    #[serde(skip, default = "uuid::Uuid::new_v4")]
    pub client_uuid: uuid::Uuid,
}

/// Global experiment schedule (§3).
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentParameter {
    #[serde(rename = "EXPERIMENT_NUMBER")]
    pub experiment_number: u32,
    #[serde(rename = "CLIENT_INIT_TIME[ms]", deserialize_with = "duration_ms")]
    pub client_init_time: Duration,
    #[serde(
        rename = "EXPERIMENT_BEGIN_OFFSET[ms]",
        deserialize_with = "duration_ms"
    )]
    pub experiment_begin_offset: Duration,
    #[serde(
        rename = "EXPERIMENT_END_OFFSET[ms]",
        deserialize_with = "duration_ms"
    )]
    pub experiment_end_offset: Duration,
    #[serde(rename = "EXPERIMENT_ITERATIONS")]
    pub experiment_iterations: u32,
    #[serde(rename = "EXPERIMENT_SYNCHRONOUS_START_FLAG")]
    pub synchronous_start_mode: bool,
    /// Whether mode-change rounds carry the three timestamps
    /// (synchronous-objects path) or bare commands (§4.3 asynchronous
    /// variant).
    #[serde(rename = "EXPERIMENT_SYNCHRONOUS_FLAG")]
    pub synchronous_mode: bool,
    #[serde(
        rename = "MC_DISTRIBUTION_PHASE_DURATION[ms]",
        deserialize_with = "duration_ms"
    )]
    pub mc_distribution_phase_duration: Duration,
    #[serde(
        rename = "MC_CLIENT_STOP_OFFSET[ms]",
        deserialize_with = "duration_ms"
    )]
    pub mc_client_stop_offset: Duration,
    #[serde(
        rename = "MC_CLIENT_RECONFIG_OFFSET[ms]",
        deserialize_with = "duration_ms"
    )]
    pub mc_client_reconfig_offset: Duration,
    #[serde(
        rename = "MC_CLIENT_START_OFFSET[ms]",
        deserialize_with = "duration_ms"
    )]
    pub mc_client_start_offset: Duration,
    #[serde(rename = "INTER_MC_GAP_MIN[ms]", deserialize_with = "duration_ms")]
    pub inter_mc_gap_min: Duration,
    #[serde(rename = "INTER_MC_GAP_MAX[ms]", deserialize_with = "duration_ms")]
    pub inter_mc_gap_max: Duration,
    #[serde(
        rename = "HYPERPERIOD_DURATION[ms]",
        deserialize_with = "duration_ms"
    )]
    pub hyperperiod_duration: Duration,
    /// §9 open question: exposed as configurable, defaulting to
    /// `hyperperiod_duration` when absent (SPEC_FULL §9 decision).
    #[serde(
        rename = "HYPERPERIOD_UNIT[ms]",
        deserialize_with = "opt_duration_ms",
        default
    )]
    pub hyperperiod_unit: Option<Duration>,
    #[serde(rename = "HYPERPERIOD_SLOTS")]
    pub hyperperiod_slots: u32,
    #[serde(rename = "EXPERIMENT_STARTUP_MODE")]
    pub startup_mode: u8,
    #[serde(rename = "EXPERIMENT_STARTUP_MODE_MAP", default)]
    pub startup_mode_map: HashMap<u8, HashMap<u32, u8>>,
    #[serde(rename = "EXPERIMENT_RECONFIGURATION_ORDER")]
    pub reconfiguration_order: Vec<u8>,
    #[serde(rename = "EXPERIMENT_RECONFIGURATION_MAP", default)]
    pub reconfiguration_map: HashMap<u8, HashMap<u32, u8>>,
    /// Optional CPU core to pin the endnode's generator thread to (§5:
    /// pinning is a config-gated option, not always-on). Absent means no
    /// pinning.
    #[serde(rename = "GENERATOR_CORE_ID", default)]
    pub generator_core_id: Option<usize>,
}

fn opt_duration_ms<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(de)?.map(Duration::from_millis))
}

impl ExperimentParameter {
    /// `hyperperiod_unit`, defaulting to `hyperperiod_duration` per the §9 decision.
    pub fn hyperperiod_unit(&self) -> Duration {
        self.hyperperiod_unit.unwrap_or(self.hyperperiod_duration)
    }

    /// `startup_mode_map[startup_mode][client_id] -> mode` (§3): the mode a
    /// given client is actually started in, falling back to the bare
    /// `startup_mode` when the client has no per-client override.
    pub fn resolve_startup_mode(&self, client_id: u32) -> u8 {
        self.startup_mode_map
            .get(&self.startup_mode)
            .and_then(|by_client| by_client.get(&client_id))
            .copied()
            .unwrap_or(self.startup_mode)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "UNIT_SETTINGS")]
    unit_settings: Vec<UnitSettings>,
    #[serde(rename = "SERVICE_SETTINGS")]
    service_settings: Vec<ServiceSettingsEntry>,
    #[serde(rename = "EXPERIMENT_SETTINGS")]
    experiment_settings: ExperimentParameter,
}

/// The fully loaded, validated configuration for one run (§6).
pub struct Config {
    pub units: Vec<UnitSettings>,
    /// `service_id -> mode -> settings`.
    pub services: HashMap<u64, HashMap<u8, ServiceSettings>>,
    pub experiment: ExperimentParameter,
}

impl Config {
    /// Load and parse the JSON configuration file (§10.2). Any problem —
    /// missing file, malformed JSON, missing key — is a fatal startup
    /// error (§7).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&text)?;

        let mut services: HashMap<u64, HashMap<u8, ServiceSettings>> = HashMap::new();
        for entry in raw.service_settings {
            let settings: ServiceSettings = entry.into();
            services
                .entry(settings.service_id)
                .or_default()
                .insert(settings.mode, settings);
        }

        Ok(Config {
            units: raw.unit_settings,
            services,
            experiment: raw.experiment_settings,
        })
    }

    /// `load_unit_settings(host_name)` (§10.2).
    pub fn unit_settings_for_host(&self, host_name: &str) -> Result<&UnitSettings, ConfigError> {
        self.units
            .iter()
            .find(|u| u.host_name == host_name)
            .ok_or_else(|| ConfigError::UnknownHost {
                host_name: host_name.to_string(),
            })
    }

    /// `load_service_settings(service_id, mode)` (§10.2).
    pub fn service_settings(&self, service_id: u64, mode: u8) -> Result<&ServiceSettings, ConfigError> {
        self.services
            .get(&service_id)
            .and_then(|by_mode| by_mode.get(&mode))
            .ok_or(ConfigError::UnknownService { service_id })
    }

    /// All modes configured for a given service, sorted by mode number.
    pub fn modes_for_service(&self, service_id: u64) -> Vec<u8> {
        let mut modes: Vec<u8> = self
            .services
            .get(&service_id)
            .map(|by_mode| by_mode.keys().copied().collect())
            .unwrap_or_default();
        modes.sort_unstable();
        modes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "UNIT_SETTINGS": [
                {
                    "HOST_ID": "endnode-a",
                    "CLIENT_ID": 1,
                    "RM_CONTROL_LOCAL_IP": "0.0.0.0",
                    "RM_CONTROL_LOCAL_PORT": 9001,
                    "RM_CONTROL_RM_IP": "127.0.0.1",
                    "RM_CONTROL_RM_PORT": 9000,
                    "SERVICE_LOCAL_IP": ["127.0.0.1"],
                    "SERVICE_LOCAL_PORT": [9100],
                    "CLIENT_PRIORITY": 1
                }
            ],
            "SERVICE_SETTINGS": [
                {
                    "SERVICE_ID": 1,
                    "MODE": 0,
                    "SERVICE_IP": "127.0.0.1",
                    "PORT": 9200,
                    "PATH": [1, 2],
                    "DEADLINE [ms]": 100,
                    "OBJECT_SIZE [KByte]": 100,
                    "PRIORITY": 1,
                    "SLOT_OFFSET [ms]": 0,
                    "SLOT_LENGTH [ms]": 10,
                    "INTER_PACKET_GAP[us]": 50,
                    "INTER_OBJECT_GAP[us]": 1000
                }
            ],
            "EXPERIMENT_SETTINGS": {
                "EXPERIMENT_NUMBER": 1,
                "CLIENT_INIT_TIME[ms]": 3000,
                "EXPERIMENT_BEGIN_OFFSET[ms]": 1000,
                "EXPERIMENT_END_OFFSET[ms]": 5000,
                "EXPERIMENT_ITERATIONS": 2,
                "EXPERIMENT_SYNCHRONOUS_START_FLAG": true,
                "EXPERIMENT_SYNCHRONOUS_FLAG": true,
                "MC_DISTRIBUTION_PHASE_DURATION[ms]": 500,
                "MC_CLIENT_STOP_OFFSET[ms]": 10,
                "MC_CLIENT_RECONFIG_OFFSET[ms]": 20,
                "MC_CLIENT_START_OFFSET[ms]": 40,
                "INTER_MC_GAP_MIN[ms]": 100,
                "INTER_MC_GAP_MAX[ms]": 200,
                "HYPERPERIOD_DURATION[ms]": 100,
                "HYPERPERIOD_SLOTS": 10,
                "EXPERIMENT_STARTUP_MODE": 0,
                "EXPERIMENT_STARTUP_MODE_MAP": {},
                "EXPERIMENT_RECONFIGURATION_ORDER": [1],
                "EXPERIMENT_RECONFIGURATION_MAP": {"1": {"1": 1}}
            }
        }"#
    }

    #[test]
    fn loads_sections_and_derives_service_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.units.len(), 1);
        let unit = config.unit_settings_for_host("endnode-a").unwrap();
        assert_eq!(unit.client_id, 1);

        let svc = config.service_settings(1, 0).unwrap();
        assert_eq!(svc.number_packets, 71); // ceil(100*1024 / 1458)
        assert!(svc.estimated_transmission_time_ms > 0.0);

        assert_eq!(config.experiment.hyperperiod_unit(), Duration::from_millis(100));
        assert_eq!(
            config.experiment.reconfiguration_map.get(&1).unwrap().get(&1),
            Some(&1)
        );
    }

    #[test]
    fn missing_file_is_fatal() {
        let result = Config::load(Path::new("/nonexistent/path/config.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn unknown_host_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();
        let config = Config::load(&path).unwrap();
        assert!(matches!(
            config.unit_settings_for_host("does-not-exist"),
            Err(ConfigError::UnknownHost { .. })
        ));
    }

    #[test]
    fn resolve_startup_mode_falls_back_when_map_has_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();
        let config = Config::load(&path).unwrap();
        // The sample's EXPERIMENT_STARTUP_MODE_MAP is empty, so every client
        // falls back to the bare EXPERIMENT_STARTUP_MODE.
        assert_eq!(config.experiment.resolve_startup_mode(1), 0);
        assert_eq!(config.experiment.resolve_startup_mode(99), 0);
    }

    #[test]
    fn resolve_startup_mode_prefers_per_client_override() {
        let mut exp_json = sample_json().to_string();
        exp_json = exp_json.replace(
            "\"EXPERIMENT_STARTUP_MODE_MAP\": {}",
            "\"EXPERIMENT_STARTUP_MODE_MAP\": {\"0\": {\"1\": 5}}",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, exp_json).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.experiment.resolve_startup_mode(1), 5);
        assert_eq!(config.experiment.resolve_startup_mode(2), 0);
    }
}
