use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use vton_contracts::config::ProcessingEndpoint;
use vton_contracts::events::EventKind;
use vton_contracts::jobs::{JobStatus, TransitionError};
use vton_contracts::schemas::{classify_poll, PollShape};

use crate::clock::{CancellationToken, Clock, Wake};
use crate::error::PollError;
use crate::transport::{HttpRequest, Transport};
use crate::{credentials, truncate_text, RunEvents};

const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { payload: Value },
    Failed { message: String },
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub outcome: PollOutcome,
    pub status: JobStatus,
    pub polls: u32,
    pub elapsed: Duration,
    /// Most recent soft failure (transport, HTTP status, unreadable body).
    pub last_error: Option<String>,
    pub last_payload: Option<Value>,
}

/// Drives one task to a terminal state.
///
/// Each iteration blocks on one GET, then sleeps for the poll interval
/// (capped at the time left before the deadline). A GET never waits longer
/// than the time left or one interval, whichever is larger, so the loop ends
/// by `deadline + interval`. Transport and HTTP errors are soft: they are
/// remembered and the loop carries on. Unknown status strings keep the job in
/// `Processing`.
pub struct JobPoller {
    endpoint: ProcessingEndpoint,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    events: Option<RunEvents>,
    interval: Duration,
    deadline: Duration,
}

impl JobPoller {
    pub fn new(
        endpoint: ProcessingEndpoint,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let interval = endpoint.poll_interval();
        let deadline = endpoint.poll_deadline();
        Self {
            endpoint,
            transport,
            clock,
            events: None,
            interval,
            deadline,
        }
    }

    pub fn with_events(mut self, events: RunEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_timing(mut self, interval: Duration, deadline: Duration) -> Self {
        self.interval = interval;
        self.deadline = deadline;
        self
    }

    pub fn poll(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let headers = credentials(&self.endpoint.auth)
            .map_err(PollError::Credential)?
            .headers;
        let started = self.clock.now();
        let url = self.endpoint.status_url_for(task_id);
        let mut report = PollReport {
            outcome: PollOutcome::TimedOut,
            status: JobStatus::submitted(),
            polls: 0,
            elapsed: Duration::ZERO,
            last_error: None,
            last_payload: None,
        };
        let timeout = self.endpoint.request_timeout().min(POLL_REQUEST_TIMEOUT);

        loop {
            if cancel.is_cancelled() {
                report.outcome = PollOutcome::Cancelled;
                report.elapsed = self.elapsed_since(started);
                return Ok(report);
            }

            let remaining = self
                .deadline
                .saturating_sub(self.elapsed_since(started))
                .max(self.interval);
            let mut request = HttpRequest::get(url.clone(), timeout.min(remaining));
            for (name, value) in &headers {
                request = request.header(name.clone(), value.clone());
            }
            let shape = self.fetch(request, &mut report);
            report.polls += 1;
            report.elapsed = self.elapsed_since(started);

            if let Some(shape) = &shape {
                if let Err(err) = apply_shape(&mut report.status, shape) {
                    report.last_error = Some(err.to_string());
                }
            }
            self.emit_tick(task_id, &report);

            match shape {
                Some(PollShape::Artifact { .. }) | Some(PollShape::Completed { .. }) => {
                    report.outcome = PollOutcome::Completed {
                        payload: report.last_payload.clone().unwrap_or(Value::Null),
                    };
                    self.emit_terminal(task_id, &report);
                    return Ok(report);
                }
                Some(PollShape::Failed { message, .. }) => {
                    report.outcome = PollOutcome::Failed { message };
                    self.emit_terminal(task_id, &report);
                    return Ok(report);
                }
                Some(PollShape::Pending { .. }) | None => {}
            }

            if report.elapsed >= self.deadline {
                if let Err(err) = report.status.mark_timed_out() {
                    report.last_error = Some(err.to_string());
                }
                report.outcome = PollOutcome::TimedOut;
                self.emit_terminal(task_id, &report);
                return Ok(report);
            }

            let wait = self.interval.min(self.deadline - report.elapsed);
            if self.clock.sleep(wait, cancel) == Wake::Cancelled {
                report.outcome = PollOutcome::Cancelled;
                report.elapsed = self.elapsed_since(started);
                return Ok(report);
            }
        }
    }

    /// One status request. `None` means a soft failure, already recorded.
    fn fetch(&self, request: HttpRequest, report: &mut PollReport) -> Option<PollShape> {
        let reply = match self.transport.send(request) {
            Ok(reply) => reply,
            Err(err) => {
                let kind = if err.timeout {
                    "request timed out"
                } else if err.connect {
                    "connection failed"
                } else {
                    "transport error"
                };
                report.last_error = Some(format!("{kind}: {err}"));
                return None;
            }
        };
        if !reply.is_success() {
            report.last_error = Some(format!(
                "HTTP {}: {}",
                reply.status,
                truncate_text(&reply.text(), 512)
            ));
            return None;
        }
        match reply.json() {
            Ok(body) => {
                let shape = classify_poll(&body);
                report.last_payload = Some(body);
                Some(shape)
            }
            Err(_) => {
                report.last_error = Some(format!(
                    "invalid JSON: {}",
                    truncate_text(&reply.text(), 512)
                ));
                None
            }
        }
    }

    fn elapsed_since(&self, started: Duration) -> Duration {
        self.clock.now().saturating_sub(started)
    }

    fn emit_tick(&self, task_id: &str, report: &PollReport) {
        if let Some(events) = &self.events {
            events.emit(
                EventKind::PollTick,
                json!({
                    "task_id": task_id,
                    "poll": report.polls,
                    "state": report.status.state.as_str(),
                    "raw_status": report.status.raw_status,
                    "progress": report.status.progress,
                    "elapsed_s": report.elapsed.as_secs_f64(),
                    "error": report.last_error,
                }),
            );
        }
    }

    fn emit_terminal(&self, task_id: &str, report: &PollReport) {
        if let Some(events) = &self.events {
            let outcome = match &report.outcome {
                PollOutcome::Completed { .. } => "completed",
                PollOutcome::Failed { .. } => "failed",
                PollOutcome::TimedOut => "timed_out",
                PollOutcome::Cancelled => "cancelled",
            };
            events.emit(
                EventKind::JobTerminal,
                json!({
                    "task_id": task_id,
                    "outcome": outcome,
                    "polls": report.polls,
                    "elapsed_s": report.elapsed.as_secs_f64(),
                    "error": report.status.error,
                }),
            );
        }
    }
}

fn apply_shape(status: &mut JobStatus, shape: &PollShape) -> Result<(), TransitionError> {
    match shape {
        PollShape::Artifact { raw_status, .. } | PollShape::Completed { raw_status } => {
            status.mark_completed(raw_status)
        }
        PollShape::Failed {
            raw_status,
            message,
        } => status.mark_failed(raw_status, message),
        PollShape::Pending {
            raw_status,
            progress,
        } => status.mark_processing(raw_status, *progress),
    }
}
