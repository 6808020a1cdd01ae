use crate::model::{PersistedState, StateEntry};
use crate::settings::ValidatorConfig;
use crate::state::is_entry_healthy;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Picks up to `target_count` healthy entries, highest score first,
/// deduplicated by endpoint. If that leaves the pool short, tops up from
/// the same healthy list with the endpoint constraint dropped. Unhealthy
/// entries never enter the pool, not even as filler.
pub fn select_final_pool(
    state: &PersistedState,
    cfg: &ValidatorConfig,
    now: DateTime<Utc>,
) -> Vec<(String, StateEntry)> {
    let mut healthy: Vec<(&String, &StateEntry)> = state
        .configs
        .iter()
        .filter(|(_, entry)| is_entry_healthy(entry, now, cfg))
        .collect();

    healthy.sort_by(|a, b| {
        let score_cmp = b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal);
        if score_cmp != std::cmp::Ordering::Equal {
            return score_cmp;
        }
        let a_success = a.1.last_success.as_deref().unwrap_or("");
        let b_success = b.1.last_success.as_deref().unwrap_or("");
        b_success.cmp(a_success)
    });

    let mut selected: Vec<(String, StateEntry)> = Vec::new();
    let mut used_endpoints: HashSet<String> = HashSet::new();

    for (key, entry) in &healthy {
        if !entry.endpoint_key.is_empty() && used_endpoints.contains(&entry.endpoint_key) {
            continue;
        }
        selected.push(((*key).clone(), (*entry).clone()));
        if !entry.endpoint_key.is_empty() {
            used_endpoints.insert(entry.endpoint_key.clone());
        }
        if selected.len() >= cfg.target_count {
            return selected;
        }
    }

    if selected.len() < cfg.target_count {
        let selected_keys: HashSet<&String> = selected.iter().map(|(k, _)| k).collect();
        for (key, entry) in &healthy {
            if selected_keys.contains(key) {
                continue;
            }
            selected.push(((*key).clone(), (*entry).clone()));
            if selected.len() >= cfg.target_count {
                break;
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate_parser::parse_candidate;
    use crate::model::ValidationResult;
    use crate::state::update_entry;
    use crate::time_util::now_utc;

    fn cfg(target: usize) -> ValidatorConfig {
        ValidatorConfig {
            source: String::new(),
            output: String::new(),
            state_path: String::new(),
            target_count: target,
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

    fn healthy_result() -> ValidationResult {
        ValidationResult {
            ok: true,
            l0_ok: true,
            l1_ok: true,
            l2_ok: true,
            l2_skipped: false,
            attempts_ok: 3,
            attempts_total: 3,
            avg_latency_ms: Some(50.0),
            error: String::new(),
        }
    }

    #[test]
    fn selection_deduplicates_by_endpoint() {
        let mut state = PersistedState::default();
        let now = now_utc();
        let a = parse_candidate("vless://a@1.2.3.4:443?type=tcp").unwrap();
        let b = parse_candidate("trojan://b@1.2.3.4:443?type=tcp").unwrap();
        update_entry(&mut state, &a, &healthy_result(), now);
        update_entry(&mut state, &b, &healthy_result(), now);

        let selected = select_final_pool(&state, &cfg(1), now);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn selection_size_matches_target_when_enough_healthy() {
        let mut state = PersistedState::default();
        let now = now_utc();
        for i in 0..5 {
            let raw = format!("vless://id{i}@host{i}.example.com:443?type=tcp");
            let candidate = parse_candidate(&raw).unwrap();
            update_entry(&mut state, &candidate, &healthy_result(), now);
        }
        let selected = select_final_pool(&state, &cfg(3), now);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn top_up_admits_duplicate_endpoints_when_not_enough_distinct_ones() {
        // Two healthy entries share an endpoint; target_count exceeds the
        // number of distinct endpoints, so top-up must re-admit the one
        // skipped by the dedup pass rather than leave the pool short.
        let mut state = PersistedState::default();
        let now = now_utc();
        let a = parse_candidate("vless://a@1.2.3.4:443?type=tcp").unwrap();
        let b = parse_candidate("trojan://b@1.2.3.4:443?type=tcp").unwrap();
        update_entry(&mut state, &a, &healthy_result(), now);
        update_entry(&mut state, &b, &healthy_result(), now);

        let selected = select_final_pool(&state, &cfg(2), now);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn unhealthy_entries_never_enter_the_pool() {
        let mut state = PersistedState::default();
        let now = now_utc();
        let healthy_a = parse_candidate("vless://a@host-a.example.com:443?type=tcp").unwrap();
        let unhealthy = parse_candidate("vless://c@host-c.example.com:443?type=tcp").unwrap();
        update_entry(&mut state, &healthy_a, &healthy_result(), now);
        update_entry(
            &mut state,
            &unhealthy,
            &crate::model::ValidationResult::tcp_unreachable(),
            now,
        );

        let selected = select_final_pool(&state, &cfg(3), now);
        assert_eq!(selected.len(), 1);
    }
}
