use std::time::Instant;

/// Status of a step in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepStatus {
    /// Forward action is in flight.
    Running,
    /// Forward action committed.
    Completed,
    /// Forward action failed (terminally or retryably).
    Failed,
    /// Compensation ran cleanly during unwind.
    Compensated,
    /// Compensation itself failed during unwind.
    CompensationFailed,
}

impl StepStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation-failed",
        }
    }
}

/// Record of one step execution within a saga invocation.
#[derive(Debug)]
pub struct StepRecord {
    /// Step name, as passed to the durable runner.
    pub name: String,
    /// Latest known status.
    pub status: StepStatus,
    /// When the forward action started.
    pub started_at: Instant,
    /// When the record last changed status, once it left `Running`.
    pub settled_at: Option<Instant>,
}

/// Per-invocation trail of step executions and compensations.
///
/// Embedded invocations reached through the composition bridge write into
/// the owning invocation's log, so the trail reflects the single shared
/// execution order.
#[derive(Debug, Default)]
pub struct SagaAuditLog {
    records: Vec<StepRecord>,
}

impl SagaAuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, name: &str) {
        self.records.push(StepRecord {
            name: name.to_string(),
            status: StepStatus::Running,
            started_at: Instant::now(),
            settled_at: None,
        });
    }

    pub(crate) fn record_completed(&mut self) {
        self.settle_last(StepStatus::Completed);
    }

    pub(crate) fn record_failed(&mut self) {
        self.settle_last(StepStatus::Failed);
    }

    pub(crate) fn record_compensated(&mut self, name: &str) {
        self.restatus(name, StepStatus::Compensated);
    }

    pub(crate) fn record_compensation_failed(&mut self, name: &str) {
        self.restatus(name, StepStatus::CompensationFailed);
    }

    fn settle_last(&mut self, status: StepStatus) {
        if let Some(record) = self.records.last_mut() {
            record.status = status;
            record.settled_at = Some(Instant::now());
        }
    }

    fn restatus(&mut self, name: &str, status: StepStatus) {
        for record in &mut self.records {
            if record.name == name {
                record.status = status;
                record.settled_at = Some(Instant::now());
            }
        }
    }

    /// All records, in execution order.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// One line per step, `<status> <name>`.
    #[must_use]
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self
            .records
            .iter()
            .map(|record| format!("{} {}", record.status.label(), record.name))
            .collect();
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_log_is_empty() {
        let log = SagaAuditLog::new();
        assert!(log.records().is_empty());
        assert_eq!(log.summary(), "");
    }

    #[test]
    fn start_then_complete_settles_the_last_record() {
        let mut log = SagaAuditLog::new();
        log.record_start("reserve");
        assert_eq!(log.records()[0].status, StepStatus::Running);
        assert!(log.records()[0].settled_at.is_none());

        log.record_completed();
        assert_eq!(log.records()[0].status, StepStatus::Completed);
        assert!(log.records()[0].settled_at.is_some());
    }

    #[test]
    fn compensation_updates_the_matching_record() {
        let mut log = SagaAuditLog::new();
        log.record_start("reserve");
        log.record_completed();
        log.record_start("charge");
        log.record_failed();

        log.record_compensated("reserve");
        assert_eq!(log.records()[0].status, StepStatus::Compensated);
        assert_eq!(log.records()[1].status, StepStatus::Failed);

        log.record_compensation_failed("reserve");
        assert_eq!(log.records()[0].status, StepStatus::CompensationFailed);
    }

    #[test]
    fn summary_renders_one_line_per_step() {
        let mut log = SagaAuditLog::new();
        log.record_start("reserve");
        log.record_completed();
        log.record_start("charge");
        log.record_failed();
        log.record_compensated("reserve");

        assert_eq!(log.summary(), "compensated reserve\nfailed charge");
    }
}
