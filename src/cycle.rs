use crate::candidate_parser::parse_candidate;
use crate::extract::extract_raw_configs;
use crate::model::{Candidate, PersistedState};
use crate::selection::select_final_pool;
use crate::settings::ValidatorConfig;
use crate::source::load_source_text;
use crate::state::{
    entry_needs_recheck, is_entry_healthy, load_state, retry_suppressed, save_state, update_entry,
    write_output,
};
use crate::time_util::{minutes_since, now_utc, to_iso};
use crate::validator::validate_candidate;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Runs one full validation cycle: recheck active entries, then probe new
/// candidates until the pool is full or the budget is exhausted. Returns
/// the number of entries in the final selection.
pub async fn run_cycle(cfg: &ValidatorConfig) -> Result<usize> {
    let now = now_utc();
    let mut state = load_state(&cfg.state_path);

    let source_text = load_source_text(&cfg.source)
        .await
        .context("failed to load candidate source list")?;
    let raw_configs = extract_raw_configs(&source_text);

    let mut parsed_candidates: Vec<Candidate> = Vec::new();
    let mut seen_keys = HashSet::new();
    for raw in &raw_configs {
        if let Some(candidate) = parse_candidate(raw) {
            if seen_keys.insert(candidate.key.clone()) {
                parsed_candidates.push(candidate);
            }
        }
    }

    log::info!(
        "loaded {} raw configs, {} parsed candidates; state entries={}",
        raw_configs.len(),
        parsed_candidates.len(),
        state.configs.len()
    );

    let mut validated_keys: HashSet<String> = HashSet::new();
    recheck_phase(&mut state, cfg, now, &mut validated_keys).await;

    let mut selected = select_final_pool(&state, cfg, now);
    let mut selected_keys: HashSet<String> = selected.iter().map(|(k, _)| k.clone()).collect();
    let mut selected_endpoints: HashSet<String> =
        selected.iter().map(|(_, e)| e.endpoint_key.clone()).collect();

    if selected.len() < cfg.target_count {
        log::info!("need {} additional working configs", cfg.target_count - selected.len());
        new_probe_phase(
            &mut state,
            cfg,
            now,
            &parsed_candidates,
            &mut validated_keys,
            &mut selected_keys,
            &mut selected_endpoints,
            &mut selected,
        )
        .await;
    }

    selected = select_final_pool(&state, cfg, now);
    let final_keys: HashSet<String> = selected.iter().map(|(k, _)| k.clone()).collect();
    for (key, entry) in state.configs.iter_mut() {
        entry.active = final_keys.contains(key);
    }

    let output_lines: Vec<String> = selected.iter().map(|(_, e)| e.raw.clone()).collect();
    if !cfg.dry_run {
        write_output(&cfg.output, &output_lines).context("failed to write output pool file")?;
    }

    state.last_run = Some(to_iso(now));
    save_state(&cfg.state_path, &state).context("failed to save state file")?;

    log::info!(
        "cycle complete: active={} output={} state={} dry_run={}",
        selected.len(),
        cfg.output,
        cfg.state_path,
        cfg.dry_run
    );

    Ok(selected.len())
}

async fn recheck_phase(
    state: &mut PersistedState,
    cfg: &ValidatorConfig,
    now: chrono::DateTime<chrono::Utc>,
    validated_keys: &mut HashSet<String>,
) {
    let recheck_budget = (cfg.target_count * 3).max(cfg.target_count);

    let mut active_keys: Vec<String> = state
        .configs
        .iter()
        .filter(|(_, entry)| entry.active)
        .map(|(key, _)| key.clone())
        .collect();

    active_keys.sort_by(|a, b| {
        let stale_a = state
            .configs
            .get(a)
            .and_then(|e| minutes_since(e.last_checked.as_deref(), now))
            .unwrap_or(1e9);
        let stale_b = state
            .configs
            .get(b)
            .and_then(|e| minutes_since(e.last_checked.as_deref(), now))
            .unwrap_or(1e9);
        match stale_b.partial_cmp(&stale_a) {
            Some(std::cmp::Ordering::Equal) | None => {
                let score_a = state.configs.get(a).map(|e| e.score).unwrap_or(0.0);
                let score_b = state.configs.get(b).map(|e| e.score).unwrap_or(0.0);
                score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
            }
            Some(ord) => ord,
        }
    });

    let mut rechecked = 0usize;
    for key in active_keys {
        if rechecked >= recheck_budget {
            break;
        }
        let Some(entry) = state.configs.get(&key) else {
            continue;
        };
        if !entry_needs_recheck(entry, now, cfg) {
            continue;
        }
        let Some(candidate) = parse_candidate(&entry.raw) else {
            continue;
        };

        let result = validate_candidate(&candidate, cfg).await;
        update_entry(state, &candidate, &result, now);
        validated_keys.insert(candidate.key.clone());
        rechecked += 1;

        let score = state.configs.get(&candidate.key).map(|e| e.score).unwrap_or(0.0);
        log::info!(
            "recheck {} {} score={score}",
            if result.ok { "PASS" } else { "FAIL" },
            candidate.endpoint_key
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn new_probe_phase(
    state: &mut PersistedState,
    cfg: &ValidatorConfig,
    now: chrono::DateTime<chrono::Utc>,
    parsed_candidates: &[Candidate],
    validated_keys: &mut HashSet<String>,
    selected_keys: &mut HashSet<String>,
    selected_endpoints: &mut HashSet<String>,
    selected: &mut Vec<(String, crate::model::StateEntry)>,
) {
    let mut candidates_list: Vec<Candidate> = parsed_candidates.to_vec();

    let mut rng = match cfg.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    candidates_list.shuffle(&mut rng);

    candidates_list.sort_by(|a, b| {
        let score_a = state.configs.get(&a.key).map(|e| e.score).unwrap_or(0.0);
        let score_b = state.configs.get(&b.key).map(|e| e.score).unwrap_or(0.0);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut checked_new = 0usize;
    for candidate in candidates_list {
        if checked_new >= cfg.max_candidates {
            break;
        }
        if validated_keys.contains(&candidate.key) || selected_keys.contains(&candidate.key) {
            continue;
        }

        let failed_recently = state
            .configs
            .get(&candidate.key)
            .map(|e| retry_suppressed(e, now, cfg))
            .unwrap_or(false);
        if failed_recently {
            continue;
        }

        if selected_endpoints.contains(&candidate.endpoint_key) {
            continue;
        }

        let result = validate_candidate(&candidate, cfg).await;
        update_entry(state, &candidate, &result, now);
        validated_keys.insert(candidate.key.clone());
        checked_new += 1;

        let entry_healthy = state
            .configs
            .get(&candidate.key)
            .map(|e| is_entry_healthy(e, now, cfg))
            .unwrap_or(false);

        if result.ok && entry_healthy {
            selected_keys.insert(candidate.key.clone());
            selected_endpoints.insert(candidate.endpoint_key.clone());
            *selected = select_final_pool(state, cfg, now);
            if selected.len() >= cfg.target_count {
                let score = state.configs.get(&candidate.key).map(|e| e.score).unwrap_or(0.0);
                log::info!("new    PASS {} score={score}", candidate.endpoint_key);
                break;
            }
        }

        let score = state.configs.get(&candidate.key).map(|e| e.score).unwrap_or(0.0);
        log::info!(
            "new    {} {} score={score}",
            if result.ok { "PASS" } else { "FAIL" },
            candidate.endpoint_key
        );
    }
}
