use crate::error::StateError;
use crate::model::{Candidate, PersistedState, StateEntry, ValidationResult};
use crate::settings::ValidatorConfig;
use crate::time_util::{hours_since, minutes_since, to_iso};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;

/// Loads state from disk, treating a missing or corrupt file as empty state
/// rather than a hard error (§7).
pub fn load_state(path: &str) -> PersistedState {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return PersistedState::default(),
    };
    match serde_json::from_str(&text) {
        Ok(state) => state,
        Err(e) => {
            log::warn!("state file at {path} is corrupt ({e}), falling back to empty state");
            PersistedState::default()
        }
    }
}

/// Serializes and atomically persists state, using write-temp-then-rename
/// so a crash mid-write never leaves a half-written state file behind.
pub fn save_state(path: &str, state: &PersistedState) -> Result<(), StateError> {
    let target = Path::new(path);
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
    let json = serde_json::to_string_pretty(state)?;
    atomic_write(dir.unwrap_or_else(|| Path::new(".")), target, json.as_bytes())?;
    Ok(())
}

fn atomic_write(dir: &Path, path: &Path, data: &[u8]) -> Result<(), StateError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// Writes the output pool file atomically. Empty selection writes an empty
/// file, never a stale leftover one.
pub fn write_output(path: &str, lines: &[String]) -> Result<(), StateError> {
    let target = Path::new(path);
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
    atomic_write(dir.unwrap_or_else(|| Path::new(".")), target, text.as_bytes())
}

pub fn calculate_score(entry: &StateEntry) -> f64 {
    let checks_total = entry.checks_total.max(1) as f64;
    let success_rate = entry.checks_ok as f64 / checks_total;

    let l2_checks = entry.l2_checks.max(1) as f64;
    let l2_rate = entry.l2_passes as f64 / l2_checks;

    let latency_score = match entry.last_latency_ms {
        Some(ms) => (1.0 - ms.min(3000.0) / 3000.0).max(0.0),
        None => 0.45,
    };

    let stability = (1.0 - (entry.fail_streak.min(4) as f64) * 0.2).max(0.0);

    let raw = (success_rate * 0.50 + l2_rate * 0.25 + latency_score * 0.15 + stability * 0.10) * 100.0;
    (raw * 100.0).round() / 100.0
}

pub fn is_entry_healthy(entry: &StateEntry, now: DateTime<Utc>, cfg: &ValidatorConfig) -> bool {
    if entry.fail_streak > cfg.max_fail_streak {
        return false;
    }
    match hours_since(entry.last_success.as_deref(), now) {
        Some(age) => age <= cfg.max_age_hours as f64,
        None => false,
    }
}

pub fn entry_needs_recheck(entry: &StateEntry, now: DateTime<Utc>, cfg: &ValidatorConfig) -> bool {
    match minutes_since(entry.last_checked.as_deref(), now) {
        Some(delta) => delta >= cfg.recheck_minutes as f64,
        None => true,
    }
}

pub fn retry_suppressed(entry: &StateEntry, now: DateTime<Utc>, cfg: &ValidatorConfig) -> bool {
    if entry.fail_streak == 0 {
        return false;
    }
    let minutes = minutes_since(entry.last_checked.as_deref(), now).unwrap_or(f64::MAX);
    minutes < cfg.retry_failed_minutes as f64
}

/// Applies one validation outcome to the persistent entry for `candidate`,
/// creating it on first sight. Idempotent bookkeeping only; never panics.
pub fn update_entry(
    state: &mut PersistedState,
    candidate: &Candidate,
    result: &ValidationResult,
    now: DateTime<Utc>,
) {
    let entry = state
        .configs
        .entry(candidate.key.clone())
        .or_insert_with(|| StateEntry::new(candidate));

    entry.raw = candidate.raw.clone();
    entry.scheme = candidate.scheme.clone();
    entry.host = candidate.host.clone();
    entry.port = candidate.port;
    entry.endpoint_key = candidate.endpoint_key.clone();
    entry.last_checked = Some(to_iso(now));
    entry.checks_total += 1;

    if !result.l2_skipped && result.attempts_total > 0 {
        entry.l2_checks += 1;
        if result.l2_ok {
            entry.l2_passes += 1;
        }
    }

    if result.ok {
        entry.checks_ok += 1;
        entry.fail_streak = 0;
        entry.last_success = Some(to_iso(now));
        entry.last_error.clear();
        if let Some(latency) = result.avg_latency_ms {
            entry.last_latency_ms = Some((latency * 100.0).round() / 100.0);
        }
    } else {
        entry.fail_streak += 1;
        entry.last_error = result.error.chars().take(240).collect();
    }

    entry.score = calculate_score(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate_parser::parse_candidate;
    use tempfile::TempDir;

    fn cfg() -> ValidatorConfig {
        ValidatorConfig {
            source: String::new(),
            output: String::new(),
            state_path: String::new(),
            target_count: 10,
            max_candidates: 180,
            recheck_minutes: 180,
            retry_failed_minutes: 90,
            max_age_hours: 36,
            max_fail_streak: 2,
            tcp_timeout: std::time::Duration::from_secs(2),
            probe_timeout: std::time::Duration::from_secs(8),
            attempts: 3,
            attempt_success_threshold: 2,
            probe_success_per_attempt: 2,
            startup_wait: std::time::Duration::from_millis(600),
            pause_between_attempts: std::time::Duration::from_millis(600),
            xray_bin: "xray".to_string(),
            allow_tcp_only_fallback: false,
            dry_run: false,
            random_seed: None,
            probe_urls: vec!["https://example.com".to_string()],
        }
    }

    #[test]
    fn score_stays_within_bounds_after_repeated_updates() {
        let candidate = parse_candidate("vless://id@host:443?type=tcp").unwrap();
        let mut state = PersistedState::default();
        let now = Utc::now();
        for _ in 0..5 {
            update_entry(&mut state, &candidate, &ValidationResult::tcp_unreachable(), now);
        }
        let entry = &state.configs[&candidate.key];
        assert!(entry.score >= 0.0 && entry.score <= 100.0);
        assert_eq!(entry.checks_total, 5);
        assert_eq!(entry.checks_ok, 0);
    }

    #[test]
    fn successful_update_resets_fail_streak() {
        let candidate = parse_candidate("vless://id@host:443?type=tcp").unwrap();
        let mut state = PersistedState::default();
        let now = Utc::now();
        update_entry(&mut state, &candidate, &ValidationResult::tcp_unreachable(), now);
        assert_eq!(state.configs[&candidate.key].fail_streak, 1);

        let ok = ValidationResult {
            ok: true,
            l0_ok: true,
            l1_ok: true,
            l2_ok: true,
            l2_skipped: false,
            attempts_ok: 2,
            attempts_total: 3,
            avg_latency_ms: Some(120.0),
            error: String::new(),
        };
        update_entry(&mut state, &candidate, &ok, now);
        let entry = &state.configs[&candidate.key];
        assert_eq!(entry.fail_streak, 0);
        assert_eq!(entry.checks_ok, 1);
        assert_eq!(entry.l2_checks, 1);
        assert_eq!(entry.l2_passes, 1);
    }

    #[test]
    fn tcp_only_fallback_bumps_checks_ok_but_not_l2_checks() {
        let candidate = parse_candidate("vless://id@host:443?type=tcp").unwrap();
        let mut state = PersistedState::default();
        let now = Utc::now();
        let fallback = ValidationResult {
            ok: true,
            l0_ok: true,
            l1_ok: true,
            l2_ok: false,
            l2_skipped: true,
            attempts_ok: 0,
            attempts_total: 0,
            avg_latency_ms: None,
            error: "xray binary not found; tcp-only fallback".to_string(),
        };
        update_entry(&mut state, &candidate, &fallback, now);
        let entry = &state.configs[&candidate.key];
        assert_eq!(entry.checks_ok, 1);
        assert_eq!(entry.l2_checks, 0);
    }

    #[test]
    fn healthy_requires_recent_success_and_bounded_fail_streak() {
        let mut entry = StateEntry::new(&parse_candidate("vless://id@host:443?type=tcp").unwrap());
        let now = Utc::now();
        assert!(!is_entry_healthy(&entry, now, &cfg()));

        entry.last_success = Some(to_iso(now));
        entry.fail_streak = 0;
        assert!(is_entry_healthy(&entry, now, &cfg()));

        entry.fail_streak = 3;
        assert!(!is_entry_healthy(&entry, now, &cfg()));
    }

    #[test]
    fn corrupt_state_file_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let state = load_state(path.to_str().unwrap());
        assert!(state.configs.is_empty());
        assert!(state.last_run.is_none());
    }

    #[test]
    fn missing_state_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let state = load_state(path.to_str().unwrap());
        assert!(state.configs.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let candidate = parse_candidate("vless://id@host:443?type=tcp").unwrap();
        let mut state = PersistedState::default();
        update_entry(&mut state, &candidate, &ValidationResult::tcp_unreachable(), Utc::now());
        save_state(path.to_str().unwrap(), &state).unwrap();

        let reloaded = load_state(path.to_str().unwrap());
        assert_eq!(reloaded.configs.len(), 1);
        assert!(reloaded.configs.contains_key(&candidate.key));
    }
}
