use crate::model::{Candidate, ValidationResult};
use crate::outbound::build_outbound;
use crate::settings::ValidatorConfig;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use reqwest::{Client, Proxy};
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

/// Grace period between SIGTERM and SIGKILL when tearing down a probe.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Runs the full L1 -> L2 pipeline for one already-parsed candidate.
pub async fn validate_candidate(candidate: &Candidate, cfg: &ValidatorConfig) -> ValidationResult {
    if !tcp_reachable(&candidate.host, candidate.port, cfg.tcp_timeout).await {
        return ValidationResult::tcp_unreachable();
    }

    let outbound = match build_outbound(candidate) {
        Ok(o) => o,
        Err(e) => return ValidationResult::synthesis_refused(e.to_string()),
    };

    run_l2_checks(&outbound, cfg).await
}

async fn tcp_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{host}:{port}");
    let lookup = match tokio::net::lookup_host(&addr).await {
        Ok(iter) => iter,
        Err(_) => return false,
    };

    for sockaddr in lookup {
        match tokio::time::timeout(timeout, TcpStream::connect(sockaddr)).await {
            Ok(Ok(_stream)) => return true,
            _ => continue,
        }
    }
    false
}

fn locate_binary(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.is_file().then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn allocate_free_port() -> Option<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).ok()?;
    listener.local_addr().ok().map(|addr| addr.port())
}

async fn run_l2_checks(outbound: &Value, cfg: &ValidatorConfig) -> ValidationResult {
    let Some(xray_path) = locate_binary(&cfg.xray_bin) else {
        return if cfg.allow_tcp_only_fallback {
            ValidationResult {
                ok: true,
                l0_ok: true,
                l1_ok: true,
                l2_ok: false,
                l2_skipped: true,
                attempts_ok: 0,
                attempts_total: 0,
                avg_latency_ms: None,
                error: "xray binary not found; tcp-only fallback".to_string(),
            }
        } else {
            ValidationResult {
                l0_ok: true,
                l1_ok: true,
                error: format!("xray binary not found: {}", cfg.xray_bin),
                ..Default::default()
            }
        };
    };

    let mut attempt_ok = 0u32;
    let mut successful_latencies: Vec<f64> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for attempt in 0..cfg.attempts {
        match run_one_attempt(&xray_path, outbound, cfg).await {
            Ok(Some(latency)) => {
                attempt_ok += 1;
                successful_latencies.push(latency);
            }
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        if attempt + 1 < cfg.attempts && !cfg.pause_between_attempts.is_zero() {
            tokio::time::sleep(cfg.pause_between_attempts).await;
        }
    }

    let l2_ok = attempt_ok >= cfg.attempt_success_threshold;
    let avg_latency = if successful_latencies.is_empty() {
        None
    } else {
        Some(successful_latencies.iter().sum::<f64>() / successful_latencies.len() as f64)
    };

    ValidationResult {
        ok: l2_ok,
        l0_ok: true,
        l1_ok: true,
        l2_ok,
        l2_skipped: false,
        attempts_ok: attempt_ok,
        attempts_total: cfg.attempts,
        avg_latency_ms: avg_latency,
        error: if !l2_ok && !errors.is_empty() {
            errors.into_iter().take(3).collect::<Vec<_>>().join("; ")
        } else {
            String::new()
        },
    }
}

/// One attempt round: spawn xray on a fresh ephemeral port, probe through
/// it, then tear everything down. Returns the attempt's mean latency on
/// success, `Ok(None)` on an ordinary probe failure, `Err` for a diagnostic
/// worth surfacing (xray missing / exiting early / probe transport error).
async fn run_one_attempt(
    xray_path: &Path,
    outbound: &Value,
    cfg: &ValidatorConfig,
) -> Result<Option<f64>, String> {
    let socks_port = allocate_free_port().ok_or_else(|| "no free loopback port".to_string())?;
    let runtime_config = json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "tag": "socks-in",
            "listen": "127.0.0.1",
            "port": socks_port,
            "protocol": "socks",
            "settings": { "udp": false },
        }],
        "outbounds": [
            { "tag": "proxy", "protocol": outbound["protocol"], "settings": outbound["settings"], "streamSettings": outbound["streamSettings"] },
            { "tag": "direct", "protocol": "freedom" },
        ],
    });

    let mut probe = XrayProbe::spawn(xray_path, &runtime_config).await?;
    let outcome = probe_through(&mut probe, socks_port, cfg).await;
    probe.shutdown().await;
    outcome
}

/// Waits out the startup delay, checks the child hasn't already died, then
/// runs the probe URLs through it. Factored out of [`run_one_attempt`] so
/// every return path (success, no-pass, or error) still reaches the
/// `probe.shutdown()` call in the caller.
async fn probe_through(
    probe: &mut XrayProbe,
    socks_port: u16,
    cfg: &ValidatorConfig,
) -> Result<Option<f64>, String> {
    tokio::time::sleep(cfg.startup_wait).await;

    if let Some(stderr) = probe.exited_with_stderr().await {
        return Err(format!("xray exited early: {}", if stderr.is_empty() { "no stderr".to_string() } else { stderr }));
    }

    let mut success_count = 0u32;
    let mut latencies = Vec::new();
    let client = build_socks_client(socks_port, cfg.probe_timeout)?;

    for url in &cfg.probe_urls {
        match probe_url(&client, url).await {
            Ok(Some(latency_ms)) => {
                success_count += 1;
                latencies.push(latency_ms);
            }
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }

    if success_count >= cfg.probe_success_per_attempt {
        let mean = latencies.iter().sum::<f64>() / latencies.len().max(1) as f64;
        Ok(Some(mean))
    } else {
        Ok(None)
    }
}

fn build_socks_client(socks_port: u16, timeout: Duration) -> Result<Client, String> {
    let proxy = Proxy::all(format!("socks5h://127.0.0.1:{socks_port}"))
        .map_err(|e| format!("failed to configure socks5 proxy: {e}"))?;
    Client::builder()
        .proxy(proxy)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build probe http client: {e}"))
}

async fn probe_url(client: &Client, url: &str) -> Result<Option<f64>, String> {
    let start = std::time::Instant::now();
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            if (200..500).contains(&status) && status != 407 {
                Ok(Some(start.elapsed().as_secs_f64() * 1000.0))
            } else {
                Ok(None)
            }
        }
        Err(e) => {
            let msg = format!("probe error for {url}: {e}");
            Err(msg.chars().take(240).collect())
        }
    }
}

/// Scopes one spawned xray-core child process plus its throwaway config
/// file. Callers must `shutdown()` it before letting it go out of scope;
/// that performs the graceful SIGTERM-then-wait-then-SIGKILL teardown.
/// `Drop` is only a last-resort fallback for a path that skipped
/// `shutdown()` (e.g. an early `?`): it has no way to `await` a grace
/// period, so it force-kills immediately, but it always removes the
/// throwaway config file.
struct XrayProbe {
    config_path: PathBuf,
    child: Child,
}

impl XrayProbe {
    async fn spawn(xray_path: &Path, runtime_config: &Value) -> Result<Self, String> {
        let config_path = std::env::temp_dir().join(format!(
            "stablepool_probe_{}_{}.json",
            std::process::id(),
            uniq_suffix()
        ));
        let json_text = serde_json::to_string(runtime_config)
            .map_err(|e| format!("failed to serialize probe config: {e}"))?;
        tokio::fs::write(&config_path, json_text)
            .await
            .map_err(|e| format!("failed to write probe config: {e}"))?;

        let child = Command::new(xray_path)
            .arg("run")
            .arg("-config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn xray-core: {e}"))?;

        Ok(XrayProbe { config_path, child })
    }

    /// Returns `Some(stderr snippet)` if the child has already exited.
    async fn exited_with_stderr(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(_status)) => {
                let mut buf = String::new();
                if let Some(mut stderr) = self.child.stderr.take() {
                    let _ = stderr.read_to_string(&mut buf).await;
                }
                Some(buf.chars().take(240).collect())
            }
            Ok(None) => None,
            Err(e) => {
                log::debug!("failed to poll xray-core process: {e}");
                None
            }
        }
    }

    /// Graceful-then-forceful teardown: SIGTERM, wait up to a short grace
    /// period, then SIGKILL if it's still alive. Mirrors the two-stage
    /// terminate/wait/kill sequence the reference implementation uses.
    async fn shutdown(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        if let Some(pid) = self.child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        if tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await.is_err() {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

impl Drop for XrayProbe {
    fn drop(&mut self) {
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            if let Err(e) = self.child.start_kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    log::warn!("failed to force-kill xray-core probe process: {e}");
                }
            }
        }
        let path = self.config_path.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&path).await;
        });
    }
}

fn uniq_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
