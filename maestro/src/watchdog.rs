//! Watchdog — stall detection, zombie cleanup, and auto-resume.
//!
//! An independent loop that keeps the platform healthy without human
//! intervention. Every check failure lands in the metrics table. All
//! store reads for a resume pass happen before any await on resume work,
//! so no lock is held across long operations.
//!
//! Resume backoff is indexed by attempt count (minutes: 0, 5, 15, 30,
//! 60); after `max_resume_attempts` the run is abandoned unless it is
//! waiting on human input.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike as _, Utc};
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::model::{MissionDef, MissionStatus};
use crate::store::{MetricsSink, MissionStore, SessionStatus, SessionStore};

/// Resume/retry routines the watchdog invokes.
///
/// Implementations re-enter the orchestrator for the mission; failures
/// are reported back so the watchdog can revert state.
#[async_trait::async_trait]
pub trait MissionResumer: Send + Sync {
    /// Resume a paused mission.
    async fn resume(&self, mission_id: &str) -> Result<()>;

    /// Retry a stalled running mission.
    async fn retry_stalled(&self, mission_id: &str) -> Result<()>;
}

/// A resumer that refuses everything; useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResumer;

#[async_trait::async_trait]
impl MissionResumer for NoopResumer {
    async fn resume(&self, _mission_id: &str) -> Result<()> {
        Err(crate::Error::mission("no resumer wired"))
    }

    async fn retry_stalled(&self, _mission_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DayCounters {
    day: i64,
    stalls: u64,
    resumes: u64,
    zombies: u64,
}

/// The watchdog.
pub struct Watchdog {
    missions: Arc<dyn MissionStore>,
    sessions: Arc<dyn SessionStore>,
    metrics: Arc<dyn MetricsSink>,
    resumer: Arc<dyn MissionResumer>,
    config: WatchdogConfig,
    http: reqwest::Client,
    cycle: std::sync::atomic::AtomicU64,
    last_resume_pass: tokio::sync::Mutex<Option<tokio::time::Instant>>,
    counters: std::sync::Mutex<DayCounters>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("cycle", &self.cycle.load(std::sync::atomic::Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Build a watchdog.
    #[must_use]
    pub fn new(
        missions: Arc<dyn MissionStore>,
        sessions: Arc<dyn SessionStore>,
        metrics: Arc<dyn MetricsSink>,
        resumer: Arc<dyn MissionResumer>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            missions,
            sessions,
            metrics,
            resumer,
            config,
            http: reqwest::Client::new(),
            cycle: std::sync::atomic::AtomicU64::new(0),
            last_resume_pass: tokio::sync::Mutex::new(None),
            counters: std::sync::Mutex::new(DayCounters::default()),
        }
    }

    /// Run the main loop and the zombie timer until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let zombie = Arc::clone(&self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(600));
            loop {
                timer.tick().await;
                if let Err(e) = zombie.zombie_tick().await {
                    warn!(error = %e, "zombie cleanup failed");
                }
            }
        });

        let mut timer = tokio::time::interval(self.config.check_interval);
        loop {
            timer.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "watchdog tick failed");
            }
        }
    }

    /// One main-loop cycle. Public so tests can drive the cadence.
    pub async fn tick(&self) -> Result<()> {
        let cycle = self
            .cycle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        debug!(cycle, "watchdog tick");

        self.probe_health().await;
        self.check_stalled_missions().await?;
        if cycle.is_multiple_of(2) {
            self.recover_stale_sessions().await?;
        }
        if cycle.is_multiple_of(5) {
            self.cleanup_failed_sessions().await?;
            self.check_disk().await;
            self.probe_llm_health().await;
        }
        if cycle.is_multiple_of(30) {
            self.cleanup_phantom_runs().await?;
        }
        self.maybe_resume_pass().await?;
        self.maybe_daily_report().await;
        Ok(())
    }

    async fn probe_health(&self) {
        let Some(url) = &self.config.health_url else {
            return;
        };
        let ok = matches!(
            self.http
                .get(url)
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(response) if response.status().is_success()
        );
        if !ok {
            warn!(url, "platform health endpoint down");
            self.metric("health_down", 1.0, url).await;
        }
    }

    async fn probe_llm_health(&self) {
        let Some(url) = &self.config.llm_health_url else {
            return;
        };
        let ok = matches!(
            self.http
                .get(url)
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(response) if response.status().is_success()
        );
        self.metric("llm_health", if ok { 1.0 } else { 0.0 }, url).await;
    }

    /// Running missions untouched past the stall threshold get a retry,
    /// at most three per cycle.
    async fn check_stalled_missions(&self) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.phase_stall_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let stalled = self
            .missions
            .missions_stale_since(MissionStatus::Running, cutoff)
            .await?;
        for mission in stalled.iter().take(3) {
            warn!(mission = %mission.id, "stalled mission detected");
            self.metric("stall_detected", 1.0, &mission.id).await;
            self.bump_counter(|c| c.stalls += 1);
            if let Err(e) = self.resumer.retry_stalled(&mission.id).await {
                warn!(mission = %mission.id, error = %e, "stall retry failed");
            } else {
                self.metric("stall_retry", 1.0, &mission.id).await;
            }
        }
        Ok(())
    }

    /// Active sessions with no recent message are interrupted and their
    /// running mission paused.
    async fn recover_stale_sessions(&self) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.session_stale_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(1800));
        let stale = self
            .sessions
            .sessions_stale_since(SessionStatus::Active, cutoff)
            .await?;
        if stale.is_empty() {
            return Ok(());
        }
        let running = self.missions.missions_in_status(MissionStatus::Running).await?;

        for session in stale {
            info!(session = %session.id, "stale session recovered");
            self.sessions
                .update_session_status(&session.id, SessionStatus::Interrupted)
                .await?;
            for mission in running.iter().filter(|m| mission_session(m) == session.id) {
                let mut mission = mission.clone();
                mission.status = MissionStatus::Paused;
                self.missions.update_mission(&mission).await?;
            }
            self.metric("session_stale_recovered", 1.0, &session.id).await;
        }
        Ok(())
    }

    /// Sessions still active/interrupted while their mission failed.
    async fn cleanup_failed_sessions(&self) -> Result<()> {
        let failed = self.missions.missions_in_status(MissionStatus::Failed).await?;
        for mission in failed {
            let session_id = mission_session(&mission);
            if session_id.is_empty() {
                continue;
            }
            if let Some(session) = self.sessions.get_session(&session_id).await?
                && matches!(
                    session.status,
                    SessionStatus::Active | SessionStatus::Interrupted
                )
            {
                self.sessions
                    .update_session_status(&session_id, SessionStatus::Failed)
                    .await?;
            }
        }
        Ok(())
    }

    /// Runs stuck in running/paused for over the hard limit.
    async fn cleanup_phantom_runs(&self) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.zombie_hard_after)
                .unwrap_or_else(|_| chrono::Duration::hours(48));
        for status in [MissionStatus::Running, MissionStatus::Paused] {
            for mission in self.missions.missions_stale_since(status, cutoff).await? {
                warn!(mission = %mission.id, "phantom run abandoned");
                let mut mission = mission;
                mission.status = MissionStatus::Abandoned;
                self.missions.update_mission(&mission).await?;
            }
        }
        Ok(())
    }

    /// Auto-resume pass, rate-limited to `resume_interval`.
    async fn maybe_resume_pass(&self) -> Result<()> {
        {
            let mut last = self.last_resume_pass.lock().await;
            let now = tokio::time::Instant::now();
            if let Some(previous) = *last
                && now.duration_since(previous) < self.config.resume_interval
            {
                return Ok(());
            }
            *last = Some(now);
        }
        self.resume_pass().await
    }

    /// One auto-resume pass. Public so tests can drive it directly.
    ///
    /// Selection happens entirely before any resume work is awaited; the
    /// resume routine itself runs in a detached task.
    pub async fn resume_pass(&self) -> Result<()> {
        let paused = self.missions.missions_in_status(MissionStatus::Paused).await?;
        let running = self
            .missions
            .missions_in_status(MissionStatus::Running)
            .await?
            .len();
        let capacity = self.config.max_concurrent_runs.saturating_sub(running);

        let now = Utc::now();
        let mut eligible: Vec<MissionDef> = Vec::new();
        for mission in paused.iter().take_while(|_| capacity > 0) {
            if mission.human_input_required
                || mission.resume_attempts >= self.config.max_resume_attempts
            {
                continue;
            }
            let backoff_idx =
                (mission.resume_attempts as usize).min(self.config.resume_backoff.len() - 1);
            let backoff = chrono::Duration::from_std(self.config.resume_backoff[backoff_idx])
                .unwrap_or_else(|_| chrono::Duration::zero());
            let ready = mission
                .last_resume_at
                .is_none_or(|last| now - last >= backoff);
            if ready {
                eligible.push(mission.clone());
            }
            if eligible.len() >= self.config.resume_batch_size.min(capacity) {
                break;
            }
        }

        for mission in eligible {
            let mut updated = mission.clone();
            updated.status = MissionStatus::Running;
            updated.resume_attempts += 1;
            updated.last_resume_at = Some(now);
            self.missions.update_mission(&updated).await?;
            info!(mission = %updated.id, attempt = updated.resume_attempts, "auto-resuming mission");
            self.metric("auto_resume", f64::from(updated.resume_attempts), &updated.id)
                .await;
            self.bump_counter(|c| c.resumes += 1);

            // Resume work detaches; on failure the run reverts to paused.
            let resumer = Arc::clone(&self.resumer);
            let missions = Arc::clone(&self.missions);
            let mission_id = updated.id.clone();
            tokio::spawn(async move {
                if let Err(e) = resumer.resume(&mission_id).await {
                    warn!(mission = %mission_id, error = %e, "resume failed, reverting to paused");
                    if let Ok(Some(mut mission)) = missions.get_mission(&mission_id).await {
                        mission.status = MissionStatus::Paused;
                        let _ = missions.update_mission(&mission).await;
                    }
                }
            });
        }

        // Exhausted runs are abandoned unless a human is expected.
        for mission in paused {
            if mission.resume_attempts >= self.config.max_resume_attempts
                && !mission.human_input_required
            {
                info!(mission = %mission.id, "resume attempts exhausted, abandoning");
                let mut mission = mission;
                mission.status = MissionStatus::Abandoned;
                self.missions.update_mission(&mission).await?;
            }
        }
        Ok(())
    }

    /// Zombie cleanup, on its own ten-minute timer.
    pub async fn zombie_tick(&self) -> Result<()> {
        let now = Utc::now();
        let soft = now
            - chrono::Duration::from_std(self.config.zombie_running_after)
                .unwrap_or_else(|_| chrono::Duration::hours(6));
        for mission in self
            .missions
            .missions_stale_since(MissionStatus::Running, soft)
            .await?
        {
            warn!(mission = %mission.id, "zombie run failed");
            let mut mission = mission;
            mission.status = MissionStatus::Failed;
            if let serde_json::Value::Object(map) = &mut mission.config {
                map.insert(
                    "zombie".to_owned(),
                    serde_json::Value::String("stale for >6h".to_owned()),
                );
            }
            self.missions.update_mission(&mission).await?;
            self.metric("zombie_cleanup", 1.0, &mission.id).await;
            self.bump_counter(|c| c.zombies += 1);
        }

        let paused_cutoff = now
            - chrono::Duration::from_std(self.config.zombie_paused_after)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        for mission in self
            .missions
            .missions_stale_since(MissionStatus::Paused, paused_cutoff)
            .await?
        {
            let mut mission = mission;
            mission.status = MissionStatus::Abandoned;
            self.missions.update_mission(&mission).await?;
        }
        Ok(())
    }

    /// Disk usage check with tmp cleanup.
    async fn check_disk(&self) {
        let output = tokio::process::Command::new("df")
            .args(["-h", "/"])
            .output()
            .await;
        let Ok(output) = output else { return };
        let text = String::from_utf8_lossy(&output.stdout);
        let Some(pct) = parse_disk_pct(&text) else {
            return;
        };
        if pct >= self.config.disk_alert_pct {
            warn!(pct, "disk usage high, cleaning tmp");
            self.metric("disk_high", f64::from(pct), "/").await;
            cleanup_tmp(Duration::from_secs(7 * 24 * 3600));
        }
    }

    async fn maybe_daily_report(&self) {
        let today = i64::from(Utc::now().num_days_from_ce());
        let report = {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            if counters.day == today {
                None
            } else {
                let report = (counters.stalls, counters.resumes, counters.zombies);
                *counters = DayCounters {
                    day: today,
                    ..DayCounters::default()
                };
                Some(report)
            }
        };
        if let Some((stalls, resumes, zombies)) = report {
            self.metric(
                "daily_report",
                1.0,
                &format!("stalls={stalls} resumes={resumes} zombies={zombies}"),
            )
            .await;
        }
    }

    fn bump_counter(&self, f: impl FnOnce(&mut DayCounters)) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut counters);
    }

    async fn metric(&self, metric: &str, value: f64, detail: &str) {
        if let Err(e) = self.metrics.record_metric(metric, value, detail).await {
            warn!(error = %e, metric, "metric recording failed");
        }
    }
}

/// Session a mission's run lives on (recorded in the mission config).
fn mission_session(mission: &MissionDef) -> String {
    mission
        .config
        .get("session_id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Parse the use% column of `df -h /` output.
fn parse_disk_pct(text: &str) -> Option<u8> {
    text.lines()
        .nth(1)?
        .split_whitespace()
        .find(|field| field.ends_with('%'))
        .and_then(|field| field.trim_end_matches('%').parse().ok())
}

/// Delete `maestro_*` entries under the tmp dir older than `max_age`.
fn cleanup_tmp(max_age: Duration) {
    let tmp = std::env::temp_dir();
    let Ok(entries) = std::fs::read_dir(&tmp) else {
        return;
    };
    let now = std::time::SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("maestro_") {
            continue;
        }
        let old = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if old {
            let path = entry.path();
            let _ = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            debug!(path = %path.display(), "tmp entry removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_pct_parsing() {
        let df = "Filesystem Size Used Avail Use% Mounted on\n/dev/sda1 100G 91G 9G 91% /\n";
        assert_eq!(parse_disk_pct(df), Some(91));
        assert_eq!(parse_disk_pct("garbage"), None);
    }
}
