use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "stablepool",
    version,
    about = "Continuously validated, size-bounded pool of working proxy configs",
    long_about = "stablepool ingests a list of VLESS/VMess/Trojan proxy URIs, validates each \
through parse / TCP reachability / live xray-core probing, scores survivors, and maintains a \
curated top-K pool plus a persistent state file across runs."
)]
pub struct Args {
    /// File path or http(s):// URL of the candidate source list
    #[arg(long, default_value = "../githubmirror/26.txt")]
    pub source: String,

    /// Where to write the curated pool (one URI per line)
    #[arg(long, default_value = "../githubmirror/26.stable.txt")]
    pub output: String,

    /// Path to the persistent state JSON file
    #[arg(long = "state", default_value = "./stable_pool_state.json")]
    pub state_path: String,

    /// Desired size of the emitted pool
    #[arg(long = "target-count", default_value_t = 10)]
    pub target_count: u32,

    /// Upper bound on new-candidate validations per cycle
    #[arg(long = "max-candidates", default_value_t = 180)]
    pub max_candidates: u32,

    /// Staleness threshold (minutes) before an active entry is rechecked
    #[arg(long = "recheck-minutes", default_value_t = 180)]
    pub recheck_minutes: i64,

    /// Cool-down (minutes) before retrying a recently failed candidate
    #[arg(long = "retry-failed-minutes", default_value_t = 90)]
    pub retry_failed_minutes: i64,

    /// Maximum age (hours) of last_success for an entry to count as healthy
    #[arg(long = "max-age-hours", default_value_t = 36)]
    pub max_age_hours: i64,

    /// Maximum consecutive failures for an entry to still count as healthy
    #[arg(long = "max-fail-streak", default_value_t = 2)]
    pub max_fail_streak: u32,

    /// L1 TCP connect timeout, seconds
    #[arg(long = "tcp-timeout", default_value_t = 2.2)]
    pub tcp_timeout: f64,

    /// Per-probe HTTP timeout, seconds
    #[arg(long = "probe-timeout", default_value_t = 8.0)]
    pub probe_timeout: f64,

    /// Number of L2 attempt rounds per candidate
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Attempts that must succeed out of `attempts` (clamped to [1, attempts])
    #[arg(long = "attempt-success-threshold", default_value_t = 2)]
    pub attempt_success_threshold: u32,

    /// Probes that must succeed within one attempt (clamped to [1, #probe_urls])
    #[arg(long = "probe-success-per-attempt", default_value_t = 2)]
    pub probe_success_per_attempt: u32,

    /// Warmup delay after spawning xray-core before probing, seconds
    #[arg(long = "startup-wait-seconds", default_value_t = 0.6)]
    pub startup_wait_seconds: f64,

    /// Sleep between L2 attempt rounds, seconds
    #[arg(long = "pause-between-attempts", default_value_t = 0.6)]
    pub pause_between_attempts: f64,

    /// Name of the xray-core binary to look up on PATH
    #[arg(long = "xray-bin", default_value = "xray")]
    pub xray_bin: String,

    /// Count TCP-reachable-but-no-engine candidates as passing L2
    #[arg(long = "allow-tcp-only-fallback", action = clap::ArgAction::SetTrue)]
    pub allow_tcp_only_fallback: bool,

    /// Validate and score but do not write the output pool file
    #[arg(long = "dry-run", action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Minutes between cycles in daemon mode; 0 runs once and exits
    #[arg(long = "interval-minutes", default_value_t = 0)]
    pub interval_minutes: i64,

    /// Seed the new-candidate shuffle for reproducible cycles
    #[arg(long = "random-seed")]
    pub random_seed: Option<u64>,

    /// Override a default probe URL (repeatable)
    #[arg(long = "probe-url")]
    pub probe_urls: Vec<String>,

    /// Lower the log filter to debug
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target_count == 0 {
            return Err(anyhow::anyhow!("--target-count must be greater than 0"));
        }
        if self.attempts == 0 {
            return Err(anyhow::anyhow!("--attempts must be greater than 0"));
        }
        if self.source.trim().is_empty() {
            return Err(anyhow::anyhow!("--source must not be empty"));
        }
        if self.interval_minutes < 0 {
            return Err(anyhow::anyhow!("--interval-minutes cannot be negative"));
        }
        Ok(())
    }
}
