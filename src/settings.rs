use std::time::Duration;

pub const DEFAULT_PROBE_URLS: &[&str] = &[
    "https://cp.cloudflare.com/generate_204",
    "https://ya.ru/generate_204",
    "https://www.rbc.ru",
];

/// Resolved, clamped runtime configuration for one validation cycle.
/// Mirrors the CLI flag table; clamping happens once, at construction,
/// so every downstream consumer can trust its invariants.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub source: String,
    pub output: String,
    pub state_path: String,
    pub target_count: usize,
    pub max_candidates: usize,
    pub recheck_minutes: i64,
    pub retry_failed_minutes: i64,
    pub max_age_hours: i64,
    pub max_fail_streak: u32,
    pub tcp_timeout: Duration,
    pub probe_timeout: Duration,
    pub attempts: u32,
    pub attempt_success_threshold: u32,
    pub probe_success_per_attempt: u32,
    pub startup_wait: Duration,
    pub pause_between_attempts: Duration,
    pub xray_bin: String,
    pub allow_tcp_only_fallback: bool,
    pub dry_run: bool,
    pub random_seed: Option<u64>,
    pub probe_urls: Vec<String>,
}

impl ValidatorConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn from_args(args: &crate::cli::Args) -> Self {
        let probe_urls = if args.probe_urls.is_empty() {
            DEFAULT_PROBE_URLS.iter().map(|s| s.to_string()).collect()
        } else {
            args.probe_urls.clone()
        };

        let attempts = args.attempts.max(1);
        let attempt_success_threshold = args.attempt_success_threshold.clamp(1, attempts);
        let probe_success_per_attempt = args
            .probe_success_per_attempt
            .clamp(1, probe_urls.len() as u32);

        ValidatorConfig {
            source: args.source.clone(),
            output: args.output.clone(),
            state_path: args.state_path.clone(),
            target_count: args.target_count.max(1) as usize,
            max_candidates: args.max_candidates.max(1) as usize,
            recheck_minutes: args.recheck_minutes.max(5),
            retry_failed_minutes: args.retry_failed_minutes.max(1),
            max_age_hours: args.max_age_hours.max(1),
            max_fail_streak: args.max_fail_streak,
            tcp_timeout: Duration::from_secs_f64(args.tcp_timeout.max(0.3)),
            probe_timeout: Duration::from_secs_f64(args.probe_timeout.max(0.5)),
            attempts,
            attempt_success_threshold,
            probe_success_per_attempt,
            startup_wait: Duration::from_secs_f64(args.startup_wait_seconds.max(0.05)),
            pause_between_attempts: Duration::from_secs_f64(args.pause_between_attempts.max(0.0)),
            xray_bin: args.xray_bin.clone(),
            allow_tcp_only_fallback: args.allow_tcp_only_fallback,
            dry_run: args.dry_run,
            random_seed: args.random_seed,
            probe_urls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;

    #[test]
    fn clamps_attempt_success_threshold_to_attempts() {
        let args = Args::parse_from([
            "stablepool",
            "--attempts",
            "2",
            "--attempt-success-threshold",
            "99",
        ]);
        let cfg = ValidatorConfig::from_args(&args);
        assert_eq!(cfg.attempt_success_threshold, 2);
    }

    #[test]
    fn defaults_probe_urls_when_none_given() {
        let args = Args::parse_from(["stablepool"]);
        let cfg = ValidatorConfig::from_args(&args);
        assert_eq!(cfg.probe_urls.len(), DEFAULT_PROBE_URLS.len());
    }

    #[test]
    fn clamps_recheck_minutes_floor() {
        let args = Args::parse_from(["stablepool", "--recheck-minutes", "0"]);
        let cfg = ValidatorConfig::from_args(&args);
        assert_eq!(cfg.recheck_minutes, 5);
    }
}
