use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted job.
///
/// `Submitted -> Processing -> {Completed, Failed, TimedOut}`; a job may
/// also go straight from `Submitted` to a terminal state. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed | Self::TimedOut => 2,
        }
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Submitted {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal job transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Last observed status of a job, mutated only by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Status string exactly as the provider sent it (may be empty).
    pub raw_status: String,
    pub progress: Option<f64>,
    pub error: Option<String>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::submitted()
    }
}

impl JobStatus {
    pub fn submitted() -> Self {
        Self {
            state: JobState::Submitted,
            raw_status: String::new(),
            progress: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn mark_processing(
        &mut self,
        raw_status: &str,
        progress: Option<f64>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::Processing)?;
        self.raw_status = raw_status.to_string();
        if let Some(progress) = progress {
            self.progress = Some(progress.clamp(0.0, 100.0));
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, raw_status: &str) -> Result<(), TransitionError> {
        self.transition(JobState::Completed)?;
        self.raw_status = raw_status.to_string();
        self.progress = Some(100.0);
        Ok(())
    }

    pub fn mark_failed(&mut self, raw_status: &str, message: &str) -> Result<(), TransitionError> {
        self.transition(JobState::Failed)?;
        self.raw_status = raw_status.to_string();
        self.error = Some(message.to_string());
        Ok(())
    }

    pub fn mark_timed_out(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::TimedOut)
    }

    fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{JobState, JobStatus};

    #[test]
    fn submitted_moves_forward_only() {
        assert!(JobState::Submitted.can_transition_to(JobState::Processing));
        assert!(JobState::Submitted.can_transition_to(JobState::Completed));
        assert!(JobState::Processing.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::TimedOut));
        assert!(!JobState::Processing.can_transition_to(JobState::Submitted));
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::TimedOut] {
            for next in [
                JobState::Submitted,
                JobState::Processing,
                JobState::Completed,
                JobState::Failed,
                JobState::TimedOut,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn status_records_failure_message() -> anyhow::Result<()> {
        let mut status = JobStatus::submitted();
        status.mark_processing("queued", Some(140.0))?;
        assert_eq!(status.progress, Some(100.0));
        status.mark_failed("error", "garment not detected")?;
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("garment not detected"));

        let err = status.mark_processing("processing", None).unwrap_err();
        assert_eq!(err.from, JobState::Failed);
        assert_eq!(err.to, JobState::Processing);
        assert_eq!(status.state, JobState::Failed);
        Ok(())
    }
}
