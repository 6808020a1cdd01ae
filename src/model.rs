use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport/security fields shared by all three schemes. Lives inside
/// whichever `CandidateParams` variant applies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransportParams {
    pub network: String,
    pub security: String,
    pub sni: String,
    pub host_header: String,
    pub path: String,
    pub service_name: String,
    pub mode: String,
    pub fingerprint: String,
    pub pbk: String,
    pub sid: String,
    pub spx: String,
    pub alpn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum CandidateParams {
    Vless {
        transport: TransportParams,
        id: String,
        encryption: String,
        flow: String,
    },
    Trojan {
        transport: TransportParams,
        password: String,
    },
    Vmess {
        transport: TransportParams,
        id: String,
        aid: u32,
        user_security: String,
    },
}

impl CandidateParams {
    pub fn transport(&self) -> &TransportParams {
        match self {
            CandidateParams::Vless { transport, .. } => transport,
            CandidateParams::Trojan { transport, .. } => transport,
            CandidateParams::Vmess { transport, .. } => transport,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub key: String,
    pub raw: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub endpoint_key: String,
    pub params: CandidateParams,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub ok: bool,
    pub l0_ok: bool,
    pub l1_ok: bool,
    pub l2_ok: bool,
    pub l2_skipped: bool,
    pub attempts_ok: u32,
    pub attempts_total: u32,
    pub avg_latency_ms: Option<f64>,
    pub error: String,
}

impl ValidationResult {
    pub fn parse_failed() -> Self {
        ValidationResult {
            error: "parse failed".to_string(),
            ..Default::default()
        }
    }

    pub fn tcp_unreachable() -> Self {
        ValidationResult {
            l0_ok: true,
            error: "tcp unreachable".to_string(),
            ..Default::default()
        }
    }

    pub fn synthesis_refused(reason: String) -> Self {
        ValidationResult {
            l0_ok: true,
            l1_ok: true,
            error: reason,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub raw: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub endpoint_key: String,
    #[serde(default)]
    pub checks_total: u64,
    #[serde(default)]
    pub checks_ok: u64,
    #[serde(default)]
    pub l2_checks: u64,
    #[serde(default)]
    pub l2_passes: u64,
    #[serde(default)]
    pub fail_streak: u32,
    #[serde(default)]
    pub last_checked: Option<String>,
    #[serde(default)]
    pub last_success: Option<String>,
    #[serde(default)]
    pub last_latency_ms: Option<f64>,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub active: bool,
}

impl StateEntry {
    pub fn new(candidate: &Candidate) -> Self {
        StateEntry {
            raw: candidate.raw.clone(),
            scheme: candidate.scheme.clone(),
            host: candidate.host.clone(),
            port: candidate.port,
            endpoint_key: candidate.endpoint_key.clone(),
            checks_total: 0,
            checks_ok: 0,
            l2_checks: 0,
            l2_passes: 0,
            fail_streak: 0,
            last_checked: None,
            last_success: None,
            last_latency_ms: None,
            last_error: String::new(),
            score: 0.0,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub configs: BTreeMap<String, StateEntry>,
    #[serde(default)]
    pub last_run: Option<String>,
}
