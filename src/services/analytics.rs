use crate::core::metrics::{ATTEMPTS_COMPLETED, ATTEMPT_DURATION, ATTEMPT_SCORE_PERCENT};
use crate::engine::session::{AttemptResult, ReportField};

/// Emits the per-attempt analytics event. Never fails and never blocks.
pub(crate) fn attempt_completed(result: &AttemptResult) {
    let (violations, high_or_worse) = match &result.violation_report {
        ReportField::Available(report) => {
            (report.violation_count, report.severity.high + report.severity.critical)
        }
        ReportField::Unavailable { .. } => (0, 0),
    };

    tracing::info!(
        target: "examflow::analytics",
        attempt_id = %result.attempt_id,
        exam_id = %result.exam_id,
        student_id = %result.student_id,
        attempt_number = result.attempt_number,
        score = result.score,
        total_marks = result.total_marks,
        percentage = result.percentage,
        passed = result.passed,
        reason = result.submission_reason.as_str(),
        time_taken_ms = result.time_taken_ms,
        violations,
        high_severity_violations = high_or_worse,
        "attempt_completed"
    );

    let passed = if result.passed { "true" } else { "false" };
    metrics::counter!(
        ATTEMPTS_COMPLETED,
        "reason" => result.submission_reason.as_str(),
        "passed" => passed
    )
    .increment(1);
    metrics::histogram!(ATTEMPT_SCORE_PERCENT, "exam_id" => result.exam_id.clone())
        .record(result.percentage);
    metrics::histogram!(ATTEMPT_DURATION).record(result.time_taken_ms as f64 / 1000.0);
}
