use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) const ATTEMPTS_COMPLETED: &str = "examflow_attempts_completed_total";
pub(crate) const ATTEMPT_SCORE_PERCENT: &str = "examflow_attempt_score_percent";
pub(crate) const ATTEMPT_DURATION: &str = "examflow_attempt_duration_seconds";
pub(crate) const VIOLATIONS_RECORDED: &str = "examflow_violations_recorded_total";
pub(crate) const RESULTS_PENDING: &str = "examflow_results_pending_total";
pub(crate) const LIVE_SESSIONS: &str = "examflow_live_sessions";

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!(ATTEMPTS_COMPLETED, "Attempts that reached the completed phase");
    describe_histogram!(ATTEMPT_SCORE_PERCENT, Unit::Percent, "Graded percentage per attempt");
    describe_histogram!(ATTEMPT_DURATION, Unit::Seconds, "Time from start to submission");
    describe_counter!(VIOLATIONS_RECORDED, "Integrity violations accepted by live sessions");
    describe_counter!(RESULTS_PENDING, "Results parked for retry after a sink failure");
    describe_gauge!(LIVE_SESSIONS, "Sessions currently held by the registry");
}
