use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db::types::{DifficultyLevel, SubmissionReason};
use crate::engine::clock::Clock;
use crate::engine::grader::{self, QuestionOutcome};
use crate::engine::integrity::{
    EnvironmentHooks, IntegrityError, IntegrityMonitor, IntegrityReport, Signal, ViolationKind,
};
use crate::engine::randomizer;
use crate::engine::timer::{CountdownTimer, TimerTick};
use crate::schemas::exam::{LoadedExam, Question};

const TIME_WARNING_SECONDS: u64 = 300;
const TIME_CRITICAL_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Phase {
    NotStarted,
    Instructions,
    Running,
    Submitting,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Instructions => "instructions",
            Self::Running => "running",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("exam has no questions")]
    NoQuestions,
    #[error("exam duration must be positive")]
    InvalidDuration,
    #[error("cannot start exam: {0}")]
    Arming(#[source] IntegrityError),
    #[error("cannot {action} while session is {phase}")]
    InvalidPhase { action: &'static str, phase: Phase },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub(crate) enum RejectReason {
    NotRunning { phase: Phase },
    UnknownQuestion,
    UnknownOption,
    OutOfRange { len: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning { phase } => write!(f, "session is {phase}"),
            Self::UnknownQuestion => f.write_str("question is not part of this attempt"),
            Self::UnknownOption => f.write_str("option is not offered for this question"),
            Self::OutOfRange { len } => write!(f, "index outside 0..{len}"),
        }
    }
}

/// Outcome of an answer, flag, or navigation command. Rejections are no-ops, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutationOutcome {
    Applied,
    Rejected(RejectReason),
}

impl MutationOutcome {
    pub(crate) fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum NavigateMode {
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Idle,
    Running { remaining_seconds: u64 },
    Submitted(SubmissionReason),
}

/// The integrity report as stored on a result, or the reason it could not be taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum ReportField {
    Available(IntegrityReport),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AttemptResult {
    pub(crate) attempt_id: Uuid,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: u32,
    pub(crate) score: u32,
    pub(crate) total_marks: u32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
    pub(crate) outcomes: Vec<QuestionOutcome>,
    pub(crate) time_taken_ms: i64,
    pub(crate) started_at_ms: i64,
    pub(crate) completed_at_ms: i64,
    pub(crate) submission_reason: SubmissionReason,
    pub(crate) violation_report: ReportField,
    pub(crate) answers_digest: String,
}

#[derive(Debug, Error)]
pub(crate) enum HandoffError {
    #[error("result dispatcher is closed")]
    Closed,
}

/// Fire-and-forget exit for finished attempts. Implementations must not block.
pub(crate) trait ResultHandoff: Send + Sync {
    fn hand_off(&self, result: &AttemptResult) -> Result<(), HandoffError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TimeWarning {
    Warning,
    Critical,
}

/// Question as shown to the student: no correct answer, no explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct QuestionView {
    pub(crate) id: String,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
    pub(crate) marks: u32,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) subject: String,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            marks: question.marks,
            difficulty: question.difficulty,
            subject: question.subject.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SessionSnapshot {
    pub(crate) session_id: Uuid,
    pub(crate) exam_id: String,
    pub(crate) title: String,
    pub(crate) phase: Phase,
    pub(crate) attempt_number: u32,
    pub(crate) questions: Vec<QuestionView>,
    pub(crate) answers: HashMap<String, String>,
    pub(crate) flags: BTreeSet<String>,
    pub(crate) current_index: usize,
    pub(crate) remaining_seconds: u64,
    pub(crate) answered_count: usize,
    pub(crate) flagged_count: usize,
    pub(crate) progress_percent: f64,
    pub(crate) violation_count: usize,
    pub(crate) max_violations: Option<u32>,
    pub(crate) time_warning: Option<TimeWarning>,
    pub(crate) started_at_ms: Option<i64>,
    pub(crate) completed_at_ms: Option<i64>,
    pub(crate) submission_reason: Option<SubmissionReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ReviewItem {
    pub(crate) question_id: String,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
    pub(crate) selected_option: String,
    pub(crate) correct_answer: String,
    pub(crate) is_correct: bool,
    pub(crate) marks_awarded: u32,
    pub(crate) explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ResultView {
    Pending { phase: Phase },
    Submitted { submission_reason: SubmissionReason, completed_at_ms: i64 },
    Graded { result: Box<AttemptResult>, review: Option<Vec<ReviewItem>> },
}

#[derive(Debug, Default)]
struct FullscreenGuard {
    exited_at_ms: Option<i64>,
    failures: u32,
}

/// One student's attempt at one exam.
///
/// The session is the only owner of the attempt state. Timer and monitor are driven from
/// here and only report back; every terminal trigger goes through [`ExamSession::submit`],
/// whose phase guard lets exactly one trigger win.
pub(crate) struct ExamSession {
    id: Uuid,
    student_id: String,
    attempt_number: u32,
    exam: Arc<LoadedExam>,
    clock: Arc<dyn Clock>,
    handoff: Arc<dyn ResultHandoff>,
    phase: Phase,
    opened_at_ms: i64,
    ordered_questions: Vec<Question>,
    answers: HashMap<String, String>,
    flags: BTreeSet<String>,
    current_index: usize,
    seed: Option<u64>,
    timer: CountdownTimer,
    monitor: IntegrityMonitor,
    fullscreen: FullscreenGuard,
    started_at_ms: Option<i64>,
    completed_at_ms: Option<i64>,
    submission_reason: Option<SubmissionReason>,
    result: Option<AttemptResult>,
    pending_handoff: bool,
}

impl fmt::Debug for ExamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExamSession")
            .field("id", &self.id)
            .field("exam_id", &self.exam.config.id)
            .field("phase", &self.phase)
            .field("answers", &self.answers.len())
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl ExamSession {
    pub(crate) fn new(
        id: Uuid,
        student_id: impl Into<String>,
        attempt_number: u32,
        exam: Arc<LoadedExam>,
        clock: Arc<dyn Clock>,
        handoff: Arc<dyn ResultHandoff>,
    ) -> Self {
        let opened_at_ms = clock.now_ms();
        Self {
            id,
            student_id: student_id.into(),
            attempt_number,
            exam,
            clock,
            handoff,
            phase: Phase::NotStarted,
            opened_at_ms,
            ordered_questions: Vec::new(),
            answers: HashMap::new(),
            flags: BTreeSet::new(),
            current_index: 0,
            seed: None,
            timer: CountdownTimer::default(),
            monitor: IntegrityMonitor::default(),
            fullscreen: FullscreenGuard::default(),
            started_at_ms: None,
            completed_at_ms: None,
            submission_reason: None,
            result: None,
            pending_handoff: false,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn student_id(&self) -> &str {
        &self.student_id
    }

    pub(crate) fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub(crate) fn exam(&self) -> &Arc<LoadedExam> {
        &self.exam
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Opened but never admitted: no timer, no answers, nothing to grade.
    pub(crate) fn is_unstarted(&self) -> bool {
        matches!(self.phase, Phase::NotStarted | Phase::Instructions)
    }

    pub(crate) fn opened_at_ms(&self) -> i64 {
        self.opened_at_ms
    }

    #[cfg(test)]
    pub(crate) fn seed(&self) -> Option<u64> {
        self.seed
    }

    #[cfg(test)]
    pub(crate) fn answers(&self) -> &HashMap<String, String> {
        &self.answers
    }

    #[cfg(test)]
    pub(crate) fn ordered_questions(&self) -> &[Question] {
        &self.ordered_questions
    }

    #[cfg(test)]
    pub(crate) fn result(&self) -> Option<&AttemptResult> {
        self.result.as_ref()
    }

    pub(crate) fn completed_at_ms(&self) -> Option<i64> {
        self.completed_at_ms
    }

    pub(crate) fn has_pending_handoff(&self) -> bool {
        self.pending_handoff
    }

    /// `NotStarted -> Instructions`. Returns the instruction text to show.
    pub(crate) fn open_instructions(&mut self) -> Result<&str, SessionError> {
        match self.phase {
            Phase::NotStarted => {
                self.phase = Phase::Instructions;
                tracing::debug!(session_id = %self.id, "Instructions opened");
            }
            Phase::Instructions => {}
            phase => return Err(SessionError::InvalidPhase { action: "open instructions", phase }),
        }
        Ok(&self.exam.config.instructions)
    }

    /// Admits the student: materializes the attempt order, arms the monitor and starts the
    /// countdown. On failure nothing is started and the session stays in `Instructions`.
    pub(crate) fn accept_instructions(
        &mut self,
        hooks: Box<dyn EnvironmentHooks>,
        seed: Option<u64>,
    ) -> Result<(), SessionError> {
        if self.phase == Phase::NotStarted {
            self.open_instructions()?;
        }
        if self.phase != Phase::Instructions {
            return Err(SessionError::InvalidPhase {
                action: "accept instructions",
                phase: self.phase,
            });
        }

        let config = &self.exam.config;
        if self.exam.questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        if config.duration_minutes == 0 {
            return Err(SessionError::InvalidDuration);
        }

        let now = self.clock.now_ms();
        self.monitor.arm(&config.security, hooks, now).map_err(|err| {
            tracing::warn!(session_id = %self.id, error = %err, "Integrity monitor failed to arm");
            SessionError::Arming(err)
        })?;

        let materialized = randomizer::materialize(&self.exam.questions, &config.security, seed);
        if let Err(err) = self.timer.start(now, config.duration_seconds()) {
            self.monitor.disarm();
            self.monitor = IntegrityMonitor::default();
            tracing::error!(session_id = %self.id, error = %err, "Countdown failed to start");
            return Err(SessionError::InvalidDuration);
        }

        self.ordered_questions = materialized.questions;
        self.seed = Some(materialized.seed);
        self.started_at_ms = Some(now);
        self.current_index = 0;
        self.phase = Phase::Running;

        tracing::info!(
            session_id = %self.id,
            exam_id = %config.id,
            student_id = %self.student_id,
            seed = materialized.seed,
            duration_seconds = config.duration_seconds(),
            "Exam attempt started"
        );
        Ok(())
    }

    pub(crate) fn select_answer(&mut self, question_id: &str, option: &str) -> MutationOutcome {
        if let Some(rejected) = self.reject_unless_running("select answer") {
            return rejected;
        }
        let Some(question) = self.question(question_id) else {
            return self.rejected("select answer", RejectReason::UnknownQuestion);
        };
        if !question.has_option(option) {
            return self.rejected("select answer", RejectReason::UnknownOption);
        }

        self.answers.insert(question_id.to_string(), option.to_string());
        self.touch();
        MutationOutcome::Applied
    }

    pub(crate) fn clear_answer(&mut self, question_id: &str) -> MutationOutcome {
        if let Some(rejected) = self.reject_unless_running("clear answer") {
            return rejected;
        }
        if self.question(question_id).is_none() {
            return self.rejected("clear answer", RejectReason::UnknownQuestion);
        }

        self.answers.remove(question_id);
        self.touch();
        MutationOutcome::Applied
    }

    pub(crate) fn toggle_flag(&mut self, question_id: &str) -> MutationOutcome {
        if let Some(rejected) = self.reject_unless_running("toggle flag") {
            return rejected;
        }
        if self.question(question_id).is_none() {
            return self.rejected("toggle flag", RejectReason::UnknownQuestion);
        }

        if !self.flags.remove(question_id) {
            self.flags.insert(question_id.to_string());
        }
        self.touch();
        MutationOutcome::Applied
    }

    pub(crate) fn go_to(&mut self, index: usize, mode: NavigateMode) -> MutationOutcome {
        if let Some(rejected) = self.reject_unless_running("navigate") {
            return rejected;
        }

        let len = self.ordered_questions.len();
        let target = match mode {
            _ if index < len => index,
            NavigateMode::Clamp => len - 1,
            NavigateMode::Reject => {
                return self.rejected("navigate", RejectReason::OutOfRange { len });
            }
        };

        self.current_index = target;
        self.touch();
        MutationOutcome::Applied
    }

    pub(crate) fn next(&mut self) -> MutationOutcome {
        self.go_to(self.current_index.saturating_add(1), NavigateMode::Clamp)
    }

    pub(crate) fn previous(&mut self) -> MutationOutcome {
        self.go_to(self.current_index.saturating_sub(1), NavigateMode::Clamp)
    }

    /// Forwards a client signal to the monitor. Returns the recorded kind, if any.
    pub(crate) fn record_signal(&mut self, signal: Signal, detail: &str) -> Option<ViolationKind> {
        self.expire_if_due();
        if self.phase != Phase::Running {
            tracing::debug!(session_id = %self.id, ?signal, phase = %self.phase, "Signal ignored");
            return None;
        }

        let now = self.clock.now_ms();
        let kind = self.monitor.record(signal, detail, now).map(|record| record.kind)?;
        if kind == ViolationKind::FullscreenExit && self.fullscreen.exited_at_ms.is_none() {
            self.fullscreen.exited_at_ms = Some(now);
        }
        Some(kind)
    }

    pub(crate) fn record_activity(&mut self) {
        self.expire_if_due();
        if self.phase == Phase::Running {
            self.touch();
        }
    }

    /// Closes the fullscreen grace window opened by the last exit.
    pub(crate) fn report_fullscreen_restored(&mut self) {
        self.expire_if_due();
        if self.phase == Phase::Running {
            self.fullscreen.exited_at_ms = None;
            self.touch();
        }
    }

    /// The only voluntary path out of `Running`. A request that arrives after the deadline
    /// completes the attempt as expired instead.
    pub(crate) fn request_submit(&mut self) -> Option<AttemptResult> {
        if let Some(expired) = self.expire_if_due() {
            return Some(expired);
        }
        self.submit(SubmissionReason::Manual)
    }

    /// Advances the countdown and applies the forced-submission policies.
    pub(crate) fn tick(&mut self) -> TickOutcome {
        if self.phase != Phase::Running {
            return TickOutcome::Idle;
        }

        let now = self.clock.now_ms();
        let remaining_seconds = match self.timer.tick(now) {
            TimerTick::Expired => return self.force(SubmissionReason::TimeExpired),
            TimerTick::Running { remaining_seconds } => remaining_seconds,
            TimerTick::Idle => self.timer.remaining(now),
        };

        self.monitor.check_inactivity(now);

        let security = &self.exam.config.security;
        if let Some(max) = security.max_violations {
            if self.monitor.violation_count() >= max as usize {
                return self.force(SubmissionReason::ViolationLimit);
            }
        }

        if security.full_screen_mode {
            if let Some(exited_at) = self.fullscreen.exited_at_ms {
                let grace_ms = (security.fullscreen_grace_seconds as i64).saturating_mul(1000);
                if now - exited_at >= grace_ms {
                    self.fullscreen.failures += 1;
                    self.fullscreen.exited_at_ms = Some(now);
                    tracing::warn!(
                        session_id = %self.id,
                        failures = self.fullscreen.failures,
                        "Fullscreen not restored within grace period"
                    );
                    if self.fullscreen.failures >= security.fullscreen_max_failures {
                        return self.force(SubmissionReason::FullscreenPolicy);
                    }
                }
            }
        }

        TickOutcome::Running { remaining_seconds }
    }

    /// Retries the result handoff after an earlier failure. Never regrades.
    pub(crate) fn retry_handoff(&mut self) -> bool {
        if !self.pending_handoff {
            return false;
        }
        let Some(result) = self.result.as_ref() else {
            return false;
        };

        match self.handoff.hand_off(result) {
            Ok(()) => {
                self.pending_handoff = false;
                tracing::info!(session_id = %self.id, "Pending result handed off");
                true
            }
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "Result handoff still failing");
                false
            }
        }
    }

    pub(crate) fn remaining_seconds(&self) -> u64 {
        match self.phase {
            Phase::NotStarted | Phase::Instructions => self.exam.config.duration_seconds(),
            Phase::Running => self.timer.remaining(self.clock.now_ms()),
            Phase::Submitting | Phase::Completed => 0,
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let security = &self.exam.config.security;
        let total = self.ordered_questions.len();
        let answered_count = self.answers.len();
        let progress_percent = if total == 0 {
            0.0
        } else {
            grader::round2(answered_count as f64 / total as f64 * 100.0)
        };
        let remaining_seconds = self.remaining_seconds();
        let time_warning = match (self.phase, security.strict_time_limit) {
            (Phase::Running, true) if remaining_seconds <= TIME_CRITICAL_SECONDS => {
                Some(TimeWarning::Critical)
            }
            (Phase::Running, true) if remaining_seconds <= TIME_WARNING_SECONDS => {
                Some(TimeWarning::Warning)
            }
            _ => None,
        };

        SessionSnapshot {
            session_id: self.id,
            exam_id: self.exam.config.id.clone(),
            title: self.exam.config.title.clone(),
            phase: self.phase,
            attempt_number: self.attempt_number,
            questions: self.ordered_questions.iter().map(QuestionView::from).collect(),
            answers: self.answers.clone(),
            flags: self.flags.clone(),
            current_index: self.current_index,
            remaining_seconds,
            answered_count,
            flagged_count: self.flags.len(),
            progress_percent,
            violation_count: self.monitor.violation_count(),
            max_violations: security.max_violations,
            time_warning,
            started_at_ms: self.started_at_ms,
            completed_at_ms: self.completed_at_ms,
            submission_reason: self.submission_reason,
        }
    }

    pub(crate) fn result_view(&self) -> ResultView {
        let Some(result) = self.result.as_ref() else {
            return ResultView::Pending { phase: self.phase };
        };

        let security = &self.exam.config.security;
        if !security.show_results_immediately {
            return ResultView::Submitted {
                submission_reason: result.submission_reason,
                completed_at_ms: result.completed_at_ms,
            };
        }

        let review = security.allow_review.then(|| {
            self.ordered_questions
                .iter()
                .zip(&result.outcomes)
                .map(|(question, outcome)| ReviewItem {
                    question_id: question.id.clone(),
                    prompt: question.prompt.clone(),
                    options: question.options.clone(),
                    selected_option: outcome.selected_option.clone(),
                    correct_answer: question.correct_answer.clone(),
                    is_correct: outcome.is_correct,
                    marks_awarded: outcome.marks_awarded,
                    explanation: question.explanation.clone(),
                })
                .collect()
        });

        ResultView::Graded { result: Box::new(result.clone()), review }
    }

    fn force(&mut self, reason: SubmissionReason) -> TickOutcome {
        match self.submit(reason) {
            Some(_) => TickOutcome::Submitted(reason),
            None => TickOutcome::Idle,
        }
    }

    /// Single submission path. The first caller flips `Running -> Submitting`; everyone
    /// after that sees the guard and gets `None`.
    fn submit(&mut self, reason: SubmissionReason) -> Option<AttemptResult> {
        if self.phase != Phase::Running {
            tracing::debug!(
                session_id = %self.id,
                phase = %self.phase,
                reason = reason.as_str(),
                "Submission trigger ignored"
            );
            return None;
        }

        self.phase = Phase::Submitting;
        tracing::info!(session_id = %self.id, reason = reason.as_str(), "Submitting attempt");

        let now = self.clock.now_ms();
        let answers = self.answers.clone();
        self.timer.stop();
        self.monitor.disarm();
        let violation_report = match self.monitor.report() {
            Ok(report) => ReportField::Available(report),
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "Integrity report unavailable");
                ReportField::Unavailable { reason: err.to_string() }
            }
        };

        let config = &self.exam.config;
        let graded = grader::grade(
            &self.ordered_questions,
            &answers,
            config.total_marks,
            config.pass_threshold,
        );
        let started_at_ms = self.started_at_ms.unwrap_or(now);
        // A late tick must not bill the student for time past the deadline.
        let finished_at_ms = self.timer.deadline_ms().map_or(now, |deadline| now.min(deadline));
        let result = AttemptResult {
            attempt_id: self.id,
            exam_id: config.id.clone(),
            student_id: self.student_id.clone(),
            attempt_number: self.attempt_number,
            score: graded.score,
            total_marks: graded.total_marks,
            percentage: graded.percentage,
            passed: graded.passed,
            outcomes: graded.outcomes,
            time_taken_ms: (finished_at_ms - started_at_ms).max(0),
            started_at_ms,
            completed_at_ms: now,
            submission_reason: reason,
            violation_report,
            answers_digest: answers_digest(&answers),
        };

        self.completed_at_ms = Some(now);
        self.submission_reason = Some(reason);
        self.result = Some(result.clone());
        self.phase = Phase::Completed;

        tracing::info!(
            session_id = %self.id,
            exam_id = %result.exam_id,
            score = result.score,
            total_marks = result.total_marks,
            percentage = result.percentage,
            passed = result.passed,
            reason = reason.as_str(),
            "Attempt completed"
        );

        if let Err(err) = self.handoff.hand_off(&result) {
            self.pending_handoff = true;
            tracing::error!(
                session_id = %self.id,
                error = %err,
                "Result handoff failed; keeping result for retry"
            );
        }

        Some(result)
    }

    fn question(&self, question_id: &str) -> Option<&Question> {
        self.ordered_questions.iter().find(|question| question.id == question_id)
    }

    /// Submits on the spot once the deadline has passed, so nothing lands between the
    /// deadline and the next scheduler tick.
    fn expire_if_due(&mut self) -> Option<AttemptResult> {
        if self.phase != Phase::Running {
            return None;
        }
        match self.timer.tick(self.clock.now_ms()) {
            TimerTick::Expired => self.submit(SubmissionReason::TimeExpired),
            TimerTick::Running { .. } | TimerTick::Idle => None,
        }
    }

    fn reject_unless_running(&mut self, action: &'static str) -> Option<MutationOutcome> {
        self.expire_if_due();
        (self.phase != Phase::Running)
            .then(|| self.rejected(action, RejectReason::NotRunning { phase: self.phase }))
    }

    fn rejected(&self, action: &'static str, reason: RejectReason) -> MutationOutcome {
        tracing::debug!(session_id = %self.id, action, %reason, "Mutation rejected");
        MutationOutcome::Rejected(reason)
    }

    fn touch(&mut self) {
        let now = self.clock.now_ms();
        self.monitor.record_activity(now);
    }
}

/// SHA-256 over the sorted `question_id=option` lines of the frozen answer map.
pub(crate) fn answers_digest(answers: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = answers.iter().collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (question_id, option) in entries {
        hasher.update(question_id.as_bytes());
        hasher.update(b"=");
        hasher.update(option.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::{AttemptResult, HandoffError, ResultHandoff};

    #[derive(Debug, Default)]
    pub(crate) struct RecordingHandoff {
        pub(crate) delivered: Mutex<Vec<AttemptResult>>,
        pub(crate) failing: Mutex<bool>,
    }

    impl RecordingHandoff {
        pub(crate) fn failing() -> Self {
            Self { delivered: Mutex::new(Vec::new()), failing: Mutex::new(true) }
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        pub(crate) fn delivered(&self) -> Vec<AttemptResult> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl ResultHandoff for RecordingHandoff {
        fn hand_off(&self, result: &AttemptResult) -> Result<(), HandoffError> {
            if *self.failing.lock().unwrap() {
                return Err(HandoffError::Closed);
            }
            self.delivered.lock().unwrap().push(result.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingHandoff;
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::integrity::testing::SharedHooks;
    use crate::engine::integrity::Capability;
    use crate::schemas::exam::{ExamConfig, SecurityPolicy};

    const START_MS: i64 = 1_700_000_000_000;

    fn question(id: &str, correct: &str, marks: u32) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("Prompt {id}"),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            correct_answer: correct.to_string(),
            marks,
            difficulty: DifficultyLevel::Easy,
            subject: "general".to_string(),
            explanation: Some(format!("Because {correct}")),
        }
    }

    fn exam(security: SecurityPolicy) -> Arc<LoadedExam> {
        Arc::new(LoadedExam {
            config: ExamConfig {
                id: "exam-1".to_string(),
                title: "Sample".to_string(),
                description: None,
                subject: "general".to_string(),
                exam_type: "quiz".to_string(),
                duration_minutes: 1,
                total_marks: 3,
                pass_threshold: 60.0,
                instructions: "Answer everything.".to_string(),
                security,
            },
            questions: vec![question("q1", "A", 1), question("q2", "B", 2)],
        })
    }

    struct Harness {
        session: ExamSession,
        clock: Arc<ManualClock>,
        handoff: Arc<RecordingHandoff>,
        hooks: SharedHooks,
    }

    fn harness_with(security: SecurityPolicy, handoff: RecordingHandoff) -> Harness {
        let clock = Arc::new(ManualClock::new(START_MS));
        let handoff = Arc::new(handoff);
        let session = ExamSession::new(
            Uuid::new_v4(),
            "student-1",
            1,
            exam(security),
            clock.clone(),
            handoff.clone(),
        );
        Harness { session, clock, handoff, hooks: SharedHooks::all() }
    }

    fn running(security: SecurityPolicy) -> Harness {
        let mut harness = harness_with(security, RecordingHandoff::default());
        harness.session.accept_instructions(Box::new(harness.hooks.clone()), Some(1)).unwrap();
        harness
    }

    #[test]
    fn instructions_precede_running() {
        let mut harness = harness_with(SecurityPolicy::default(), RecordingHandoff::default());
        assert_eq!(harness.session.phase(), Phase::NotStarted);
        assert_eq!(harness.session.open_instructions().unwrap(), "Answer everything.");
        assert_eq!(harness.session.phase(), Phase::Instructions);

        harness.session.accept_instructions(Box::new(SharedHooks::all()), None).unwrap();
        assert_eq!(harness.session.phase(), Phase::Running);
        assert_eq!(harness.session.remaining_seconds(), 60);
        assert!(harness.session.seed().is_some());
    }

    #[test]
    fn arming_failure_keeps_student_in_instructions() {
        let security = SecurityPolicy { full_screen_mode: true, ..SecurityPolicy::default() };
        let mut harness = harness_with(security, RecordingHandoff::default());

        let err = harness
            .session
            .accept_instructions(Box::new(SharedHooks::denying(Capability::Fullscreen)), None)
            .unwrap_err();

        assert!(matches!(err, SessionError::Arming(_)));
        assert_eq!(harness.session.phase(), Phase::Instructions);
        assert!(harness.session.ordered_questions().is_empty());
        assert_eq!(
            harness.session.select_answer("q1", "A"),
            MutationOutcome::Rejected(RejectReason::NotRunning { phase: Phase::Instructions })
        );

        harness.session.accept_instructions(Box::new(SharedHooks::all()), None).unwrap();
        assert_eq!(harness.session.phase(), Phase::Running);
    }

    #[test]
    fn empty_question_set_cannot_start() {
        let clock = Arc::new(ManualClock::new(START_MS));
        let mut loaded = (*exam(SecurityPolicy::default())).clone();
        loaded.questions.clear();
        let mut session = ExamSession::new(
            Uuid::new_v4(),
            "student-1",
            1,
            Arc::new(loaded),
            clock,
            Arc::new(RecordingHandoff::default()),
        );

        let err = session.accept_instructions(Box::new(SharedHooks::all()), None).unwrap_err();
        assert!(matches!(err, SessionError::NoQuestions));
        assert_eq!(session.phase(), Phase::Instructions);
    }

    #[test]
    fn order_is_fixed_once_running() {
        let security = SecurityPolicy {
            randomize_questions: true,
            randomize_options: true,
            ..SecurityPolicy::default()
        };
        let mut harness = running(security);
        let order = harness.session.ordered_questions().to_vec();

        let err = harness.session.accept_instructions(Box::new(SharedHooks::all()), Some(99));
        assert!(matches!(err, Err(SessionError::InvalidPhase { .. })));
        assert_eq!(harness.session.ordered_questions(), order.as_slice());
        harness.session.tick();
        assert_eq!(harness.session.ordered_questions(), order.as_slice());
    }

    #[test]
    fn answers_are_last_write_wins_and_validated() {
        let mut harness = running(SecurityPolicy::default());
        assert!(harness.session.select_answer("q1", "B").is_applied());
        assert!(harness.session.select_answer("q1", "A").is_applied());
        assert_eq!(harness.session.answers().get("q1").map(String::as_str), Some("A"));

        assert_eq!(
            harness.session.select_answer("q9", "A"),
            MutationOutcome::Rejected(RejectReason::UnknownQuestion)
        );
        assert_eq!(
            harness.session.select_answer("q1", "Z"),
            MutationOutcome::Rejected(RejectReason::UnknownOption)
        );
        assert_eq!(harness.session.answers().len(), 1);

        assert!(harness.session.clear_answer("q1").is_applied());
        assert!(harness.session.answers().is_empty());
    }

    #[test]
    fn flags_toggle_and_never_affect_grading() {
        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q1", "A");
        assert!(harness.session.toggle_flag("q2").is_applied());
        assert_eq!(harness.session.snapshot().flagged_count, 1);
        harness.session.toggle_flag("q1");
        harness.session.toggle_flag("q1");
        assert_eq!(harness.session.snapshot().flagged_count, 1);

        let result = harness.session.request_submit().unwrap();
        assert_eq!(result.score, 1);
    }

    #[test]
    fn navigation_clamps_or_rejects() {
        let mut harness = running(SecurityPolicy::default());
        assert!(harness.session.go_to(1, NavigateMode::Reject).is_applied());
        assert_eq!(harness.session.snapshot().current_index, 1);

        assert_eq!(
            harness.session.go_to(5, NavigateMode::Reject),
            MutationOutcome::Rejected(RejectReason::OutOfRange { len: 2 })
        );
        assert_eq!(harness.session.snapshot().current_index, 1);

        assert!(harness.session.go_to(5, NavigateMode::Clamp).is_applied());
        assert_eq!(harness.session.snapshot().current_index, 1);

        harness.session.previous();
        harness.session.previous();
        assert_eq!(harness.session.snapshot().current_index, 0);
        harness.session.next();
        harness.session.next();
        assert_eq!(harness.session.snapshot().current_index, 1);
    }

    #[test]
    fn worked_examples_score_as_expected() {
        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q1", "A");
        harness.session.select_answer("q2", "C");
        let result = harness.session.request_submit().unwrap();
        assert_eq!((result.score, result.percentage, result.passed), (1, 33.33, false));

        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q1", "A");
        harness.session.select_answer("q2", "B");
        let result = harness.session.request_submit().unwrap();
        assert_eq!((result.score, result.percentage, result.passed), (3, 100.0, true));
    }

    #[test]
    fn submit_and_expiry_together_complete_once() {
        let mut harness = running(SecurityPolicy::default());
        harness.clock.advance_secs(60);

        let submitted = harness.session.request_submit();
        let ticked = harness.session.tick();
        let resubmitted = harness.session.request_submit();

        assert_eq!(
            submitted.map(|result| result.submission_reason),
            Some(SubmissionReason::TimeExpired)
        );
        assert_eq!(ticked, TickOutcome::Idle);
        assert!(resubmitted.is_none());
        assert_eq!(harness.handoff.delivered().len(), 1);
        assert_eq!(harness.session.phase(), Phase::Completed);
    }

    #[test]
    fn expiry_forces_submission_exactly_once() {
        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q2", "B");

        harness.clock.advance_secs(30);
        assert_eq!(harness.session.tick(), TickOutcome::Running { remaining_seconds: 30 });
        harness.clock.advance_secs(30);
        assert_eq!(harness.session.tick(), TickOutcome::Submitted(SubmissionReason::TimeExpired));
        harness.clock.advance_secs(1);
        assert_eq!(harness.session.tick(), TickOutcome::Idle);

        let delivered = harness.handoff.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].submission_reason, SubmissionReason::TimeExpired);
        assert_eq!(delivered[0].score, 2);
        assert_eq!(delivered[0].time_taken_ms, 60_000);
    }

    #[test]
    fn commands_past_the_deadline_expire_the_attempt_without_a_tick() {
        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q1", "A");
        harness.clock.advance_ms(60_900);

        let outcome = harness.session.select_answer("q2", "B");
        assert_eq!(
            outcome,
            MutationOutcome::Rejected(RejectReason::NotRunning { phase: Phase::Completed })
        );
        assert_eq!(harness.session.tick(), TickOutcome::Idle);

        let delivered = harness.handoff.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].submission_reason, SubmissionReason::TimeExpired);
        assert_eq!(delivered[0].score, 1);
        assert_eq!(delivered[0].time_taken_ms, 60_000);
        assert_eq!(delivered[0].completed_at_ms, START_MS + 60_900);
    }

    #[test]
    fn late_tick_caps_time_taken_at_the_deadline() {
        let mut harness = running(SecurityPolicy::default());
        harness.clock.advance_ms(75_000);

        assert_eq!(harness.session.tick(), TickOutcome::Submitted(SubmissionReason::TimeExpired));
        assert_eq!(harness.handoff.delivered()[0].time_taken_ms, 60_000);
    }

    #[test]
    fn signals_past_the_deadline_are_not_recorded() {
        let mut harness = running(SecurityPolicy::default());
        harness.clock.advance_secs(61);

        assert!(harness.session.record_signal(Signal::FocusLost, "blur").is_none());
        assert_eq!(harness.session.phase(), Phase::Completed);
        assert_eq!(harness.session.snapshot().violation_count, 0);
    }

    #[test]
    fn mutations_after_completion_are_rejected() {
        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q1", "A");
        harness.session.request_submit().unwrap();
        let frozen = harness.session.answers().clone();

        let outcome = harness.session.select_answer("q1", "B");
        assert_eq!(
            outcome,
            MutationOutcome::Rejected(RejectReason::NotRunning { phase: Phase::Completed })
        );
        assert!(!harness.session.toggle_flag("q1").is_applied());
        assert!(!harness.session.clear_answer("q1").is_applied());
        assert!(!harness.session.go_to(0, NavigateMode::Clamp).is_applied());
        assert!(harness.session.record_signal(Signal::FocusLost, "blur").is_none());
        assert_eq!(harness.session.answers(), &frozen);
    }

    #[test]
    fn violation_limit_forces_submission_on_next_check() {
        let security = SecurityPolicy { max_violations: Some(2), ..SecurityPolicy::default() };
        let mut harness = running(security);

        harness.session.record_signal(Signal::FocusLost, "blur");
        assert!(matches!(harness.session.tick(), TickOutcome::Running { .. }));
        harness.session.record_signal(Signal::FocusLost, "blur");
        assert_eq!(harness.session.phase(), Phase::Running);

        assert_eq!(
            harness.session.tick(),
            TickOutcome::Submitted(SubmissionReason::ViolationLimit)
        );
        let result = harness.session.result().unwrap();
        match &result.violation_report {
            ReportField::Available(report) => assert_eq!(report.violation_count, 2),
            other => panic!("unexpected report {other:?}"),
        }
        assert!(harness.hooks.active().is_empty());
    }

    #[test]
    fn unrestored_fullscreen_ends_attempt_after_repeated_grace_failures() {
        let security = SecurityPolicy {
            full_screen_mode: true,
            fullscreen_grace_seconds: 5,
            fullscreen_max_failures: 2,
            ..SecurityPolicy::default()
        };
        let mut harness = running(security);

        harness.session.record_signal(Signal::FullscreenExit, "esc");
        harness.clock.advance_secs(3);
        harness.session.report_fullscreen_restored();
        harness.clock.advance_secs(5);
        assert!(matches!(harness.session.tick(), TickOutcome::Running { .. }));

        harness.session.record_signal(Signal::FullscreenExit, "esc");
        harness.clock.advance_secs(5);
        assert!(matches!(harness.session.tick(), TickOutcome::Running { .. }));
        harness.clock.advance_secs(5);
        assert_eq!(
            harness.session.tick(),
            TickOutcome::Submitted(SubmissionReason::FullscreenPolicy)
        );
    }

    #[test]
    fn inactivity_is_recorded_during_ticks() {
        let security =
            SecurityPolicy { inactivity_timeout_seconds: 10, ..SecurityPolicy::default() };
        let mut harness = running(security);

        harness.clock.advance_secs(11);
        harness.session.tick();
        assert_eq!(harness.session.snapshot().violation_count, 1);

        harness.clock.advance_secs(5);
        harness.session.select_answer("q1", "A");
        harness.clock.advance_secs(9);
        harness.session.tick();
        assert_eq!(harness.session.snapshot().violation_count, 1);
    }

    #[test]
    fn failed_handoff_keeps_result_and_retries_without_regrading() {
        let mut harness = harness_with(SecurityPolicy::default(), RecordingHandoff::failing());
        harness.session.accept_instructions(Box::new(SharedHooks::all()), Some(3)).unwrap();
        harness.session.select_answer("q1", "A");

        let result = harness.session.request_submit().expect("result despite failed sink");
        assert_eq!(harness.session.phase(), Phase::Completed);
        assert!(harness.session.has_pending_handoff());
        assert!(!harness.session.retry_handoff());

        harness.handoff.set_failing(false);
        assert!(harness.session.retry_handoff());
        assert!(!harness.session.has_pending_handoff());
        assert_eq!(harness.handoff.delivered(), vec![result]);
        assert!(!harness.session.retry_handoff());
    }

    #[test]
    fn snapshot_reports_derived_fields_and_time_warnings() {
        let security = SecurityPolicy { strict_time_limit: true, ..SecurityPolicy::default() };
        let mut harness = running(security);
        harness.session.select_answer("q1", "A");

        let snapshot = harness.session.snapshot();
        assert_eq!(snapshot.answered_count, 1);
        assert_eq!(snapshot.progress_percent, 50.0);
        assert_eq!(snapshot.time_warning, Some(TimeWarning::Critical));
        assert_eq!(snapshot.questions.len(), 2);

        let encoded = serde_json::to_value(&snapshot).unwrap();
        assert!(encoded["questions"][0].get("correct_answer").is_none());
    }

    #[test]
    fn result_view_respects_visibility_policy() {
        let hidden =
            SecurityPolicy { show_results_immediately: false, ..SecurityPolicy::default() };
        let mut harness = running(hidden);
        assert!(matches!(harness.session.result_view(), ResultView::Pending { .. }));
        harness.session.request_submit();
        assert!(matches!(harness.session.result_view(), ResultView::Submitted { .. }));

        let no_review = SecurityPolicy { allow_review: false, ..SecurityPolicy::default() };
        let mut harness = running(no_review);
        harness.session.request_submit();
        match harness.session.result_view() {
            ResultView::Graded { review, .. } => assert!(review.is_none()),
            other => panic!("unexpected view {other:?}"),
        }

        let mut harness = running(SecurityPolicy::default());
        harness.session.select_answer("q2", "B");
        harness.session.request_submit();
        match harness.session.result_view() {
            ResultView::Graded { review: Some(review), .. } => {
                assert_eq!(review.len(), 2);
                assert_eq!(review[1].correct_answer, "B");
                assert!(review[1].is_correct);
                assert_eq!(review[0].selected_option, "");
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn digest_is_order_independent_and_answer_sensitive() {
        let mut first = HashMap::new();
        first.insert("q1".to_string(), "A".to_string());
        first.insert("q2".to_string(), "B".to_string());
        let mut second = HashMap::new();
        second.insert("q2".to_string(), "B".to_string());
        second.insert("q1".to_string(), "A".to_string());
        assert_eq!(answers_digest(&first), answers_digest(&second));

        second.insert("q2".to_string(), "C".to_string());
        assert_ne!(answers_digest(&first), answers_digest(&second));
        assert_eq!(answers_digest(&HashMap::new()).len(), 64);
    }
}
