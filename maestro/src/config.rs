//! Engine-wide configuration.
//!
//! Every tunable the engine consults lives in [`EngineConfig`]. Defaults
//! match production values; tests override individual fields.

use std::time::Duration;

/// Maximum tool-calling rounds within one agent turn.
pub const MAX_TOOL_ROUNDS: usize = 15;

/// Character budget for accumulated context passed between pattern nodes.
pub const CONTEXT_BUDGET: usize = 6000;

/// Character budget for one compressed older output inside the context.
pub const COMPRESSED_OUTPUT_SIZE: usize = 800;

/// Tool result budget when fed back into the LLM conversation.
pub const TOOL_RESULT_HISTORY_BUDGET: usize = 4000;

/// Tool result budget in the execution summary.
pub const TOOL_RESULT_SUMMARY_BUDGET: usize = 500;

/// Artifact content budget when recorded from a write tool.
pub const ARTIFACT_CONTENT_BUDGET: usize = 2000;

/// Tunables for the pattern engine, orchestrator, sandbox, and watchdog.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global cap on concurrent LLM calls (provider rate-limit budget).
    pub llm_concurrency: usize,
    /// Timeout for a single LLM call.
    pub llm_timeout: Duration,
    /// Timeout for one phase pattern run.
    pub phase_timeout: Duration,
    /// Retries for a phase that fails with a transient LLM error.
    pub max_llm_retries: usize,
    /// Delay between phase retries.
    pub llm_retry_delay: Duration,
    /// Maximum orchestrator reloops back to the dev phase.
    pub max_reloops: usize,
    /// Default producer/reviewer loop iterations.
    pub loop_max_iterations: usize,
    /// Hierarchical outer (QA validation) iterations.
    pub hierarchical_max_outer: usize,
    /// Hierarchical inner (manager completeness) iterations.
    pub hierarchical_max_inner: usize,
    /// Default debate rounds for the network pattern.
    pub network_max_rounds: usize,
    /// Default sandbox command timeout.
    pub sandbox_timeout: Duration,
    /// Per-session event queue bound.
    pub event_queue_bound: usize,
    /// History window fed to each agent turn.
    pub history_window: usize,
    /// Compress session history beyond this many messages.
    pub history_compress_threshold: usize,
    /// Messages kept verbatim when history is compressed.
    pub history_recent_window: usize,
    /// Whether the semantic (L1) adversarial check runs on execution patterns.
    pub adversarial_l1_enabled: bool,
    /// HIGH-severity guardrail blocks tolerated per session before unconditional blocking.
    pub guardrails_max_high_per_session: u32,
    /// Run sandbox commands inside Docker when available.
    pub docker_enabled: bool,
    /// Docker image for sandboxed commands.
    pub docker_image: String,
    /// Docker network mode.
    pub docker_network: String,
    /// Docker memory cap.
    pub docker_memory: String,
    /// Docker CPU cap.
    pub docker_cpus: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_concurrency: 10,
            llm_timeout: Duration::from_secs(120),
            phase_timeout: Duration::from_secs(600),
            max_llm_retries: 2,
            llm_retry_delay: Duration::from_secs(30),
            max_reloops: 2,
            loop_max_iterations: 5,
            hierarchical_max_outer: 3,
            hierarchical_max_inner: 2,
            network_max_rounds: 3,
            sandbox_timeout: Duration::from_secs(300),
            event_queue_bound: 500,
            history_window: 20,
            history_compress_threshold: 16,
            history_recent_window: 10,
            adversarial_l1_enabled: false,
            guardrails_max_high_per_session: 5,
            docker_enabled: false,
            docker_image: "maestro-sandbox:latest".to_owned(),
            docker_network: "none".to_owned(),
            docker_memory: "2g".to_owned(),
            docker_cpus: 2.0,
        }
    }
}

/// Watchdog cadence and thresholds.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Main loop interval.
    pub check_interval: Duration,
    /// A running mission untouched for longer than this is stalled.
    pub phase_stall_threshold: Duration,
    /// An active session silent for longer than this is stale.
    pub session_stale_threshold: Duration,
    /// Auto-resume pass interval.
    pub resume_interval: Duration,
    /// Paused runs resumed per pass.
    pub resume_batch_size: usize,
    /// Cap on simultaneously running runs.
    pub max_concurrent_runs: usize,
    /// Resume attempts before a run is abandoned.
    pub max_resume_attempts: u32,
    /// Backoff before each resume attempt, indexed by attempt count.
    pub resume_backoff: Vec<Duration>,
    /// Running runs older than this are zombies.
    pub zombie_running_after: Duration,
    /// Running runs older than this are failed unconditionally.
    pub zombie_hard_after: Duration,
    /// Paused runs older than this are abandoned.
    pub zombie_paused_after: Duration,
    /// Disk usage percentage that triggers tmp cleanup.
    pub disk_alert_pct: u8,
    /// Platform health endpoint probed each cycle (None disables the probe).
    pub health_url: Option<String>,
    /// LLM stats endpoint probed every 5th cycle (None disables the probe).
    pub llm_health_url: Option<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            phase_stall_threshold: Duration::from_secs(900),
            session_stale_threshold: Duration::from_secs(1800),
            resume_interval: Duration::from_secs(300),
            resume_batch_size: 5,
            max_concurrent_runs: 10,
            max_resume_attempts: 5,
            resume_backoff: [0u64, 5, 15, 30, 60]
                .iter()
                .map(|m| Duration::from_secs(m * 60))
                .collect(),
            zombie_running_after: Duration::from_secs(6 * 3600),
            zombie_hard_after: Duration::from_secs(48 * 3600),
            zombie_paused_after: Duration::from_secs(24 * 3600),
            disk_alert_pct: 90,
            health_url: None,
            llm_health_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_defaults() {
        let cfg = WatchdogConfig::default();
        assert_eq!(cfg.resume_backoff.len(), 5);
        assert_eq!(cfg.resume_backoff[0], Duration::ZERO);
        assert_eq!(cfg.resume_backoff[1], Duration::from_secs(300));
        assert_eq!(cfg.resume_backoff[4], Duration::from_secs(3600));
    }
}
