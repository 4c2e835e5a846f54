use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use vton_contracts::config::PipelineConfig;
use vton_contracts::events::{EventKind, EventWriter};
use vton_contracts::jobs::{
    ArtifactRef, AssetReference, Category, JobHandle, JobRequest, JobState, JobStatus,
    PersistedArtifact, ResultArtifact,
};
use vton_contracts::runs::receipts::{write_receipt, ReceiptOutcome, RunReceipt, UploadRecord};

use crate::clock::{CancellationToken, Clock, SystemClock};
use crate::download::ResultDownloader;
use crate::error::{PipelineError, Stage, UploadError};
use crate::extract::extract;
use crate::poll::{JobPoller, PollOutcome};
use crate::submit::JobSubmitter;
use crate::transport::{ReqwestTransport, Transport};
use crate::upload::{sniff_mime, UploadResolver};
use crate::RunEvents;

/// Inputs of one run: two local images and where the result goes.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub subject: Vec<u8>,
    pub garment: Vec<u8>,
    /// Falls back to the config's default category.
    pub category: Option<Category>,
    pub destination: PathBuf,
}

impl RunInput {
    pub fn from_paths(
        subject: &Path,
        garment: &Path,
        destination: impl Into<PathBuf>,
    ) -> Result<Self> {
        let subject = std::fs::read(subject)
            .with_context(|| format!("failed reading {}", subject.display()))?;
        let garment = std::fs::read(garment)
            .with_context(|| format!("failed reading {}", garment.display()))?;
        Ok(Self {
            subject,
            garment,
            category: None,
            destination: destination.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub artifact: PersistedArtifact,
    pub source: ArtifactRef,
    /// `None` when the submission returned the result directly.
    pub task_id: Option<String>,
    pub polls: u32,
    pub status: JobStatus,
    pub receipt_path: PathBuf,
}

/// A successful run. `Degraded` means a placeholder stood in for at least
/// one upload, or the provider answered with a mock artifact; a file was
/// written but it is not a try-on of the caller's images.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    Degraded {
        report: RunReport,
        reasons: Vec<String>,
    },
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Completed(report) | Self::Degraded { report, .. } => report,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Wires the five stages together for one subject/garment pair per run.
///
/// The pipeline holds only read-only state; `run` may be called from
/// several threads at once. Every run appends to `<run_dir>/events.jsonl`
/// and writes `<run_dir>/<run_id>/receipt.json`, whatever the outcome.
pub struct TryOnPipeline {
    config: Arc<PipelineConfig>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    run_dir: PathBuf,
    events: EventWriter,
}

impl TryOnPipeline {
    pub fn new(config: PipelineConfig, run_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_parts(
            Arc::new(config),
            Arc::new(ReqwestTransport::new()?),
            Arc::new(SystemClock::new()),
            run_dir,
        )
    }

    pub fn with_parts(
        config: Arc<PipelineConfig>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        run_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed creating run dir {}", run_dir.display()))?;
        let events = EventWriter::new(run_dir.join("events.jsonl"), "pipeline");
        Ok(Self {
            config,
            transport,
            clock,
            run_dir,
            events,
        })
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    /// Event sink for work done outside `run` (single uploads, polls).
    pub fn events_for(&self, run_id: impl Into<String>) -> RunEvents {
        RunEvents::new(self.events.clone(), run_id)
    }

    pub fn upload_resolver(&self, events: Option<RunEvents>) -> UploadResolver {
        let resolver = UploadResolver::new(self.config.uploads.clone(), self.transport.clone());
        match events {
            Some(events) => resolver.with_events(events),
            None => resolver,
        }
    }

    pub fn poller(&self, events: Option<RunEvents>) -> JobPoller {
        let poller = JobPoller::new(
            self.config.processing.clone(),
            self.transport.clone(),
            self.clock.clone(),
        );
        match events {
            Some(events) => poller.with_events(events),
            None => poller,
        }
    }

    pub fn downloader(&self) -> ResultDownloader {
        ResultDownloader::new(
            self.transport.clone(),
            self.config.processing.download_timeout(),
        )
    }

    pub fn run(
        &self,
        input: &RunInput,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let events = RunEvents::new(self.events.clone(), run_id.clone());
        let receipt_path = self.run_dir.join(&run_id).join("receipt.json");
        let mut receipt = RunReceipt::new(run_id.clone());
        let category = input.category.unwrap_or(self.config.category);

        events.emit(
            EventKind::RunStarted,
            json!({
                "processing": self.config.processing.name,
                "category": category.as_str(),
                "destination": input.destination.to_string_lossy(),
                "upload_targets": self.config.fallback_policy().names(),
            }),
        );

        let mut run = RunState {
            run_id: run_id.clone(),
            events: &events,
            receipt: &mut receipt,
            receipt_path: receipt_path.clone(),
            degraded: Vec::new(),
        };
        let result = self.execute(input, category, cancel, &mut run);

        let (outcome, payload) = match &result {
            Ok(RunOutcome::Completed(report)) => (
                ReceiptOutcome::Completed,
                json!({
                    "outcome": "completed",
                    "artifact": report.artifact.path.to_string_lossy(),
                }),
            ),
            Ok(RunOutcome::Degraded { report, reasons }) => {
                receipt.degraded_reasons = reasons.clone();
                events.emit(EventKind::RunDegraded, json!({"reasons": reasons}));
                (
                    ReceiptOutcome::Degraded,
                    json!({
                        "outcome": "degraded",
                        "artifact": report.artifact.path.to_string_lossy(),
                    }),
                )
            }
            Err(err) => {
                receipt.failed_stage = Some(err.stage().to_string());
                receipt.error = Some(err.to_string());
                events.emit(
                    EventKind::RunFailed,
                    json!({"stage": err.stage().as_str(), "error": err.to_string()}),
                );
                (ReceiptOutcome::Failed, json!({"outcome": "failed"}))
            }
        };
        receipt.finish(outcome);
        if let Err(err) = write_receipt(&receipt_path, &receipt) {
            eprintln!(
                "vton-rs: failed writing receipt {}: {err:#}",
                receipt_path.display()
            );
        }
        let mut payload = payload;
        payload["receipt"] = Value::String(receipt_path.to_string_lossy().to_string());
        events.emit(EventKind::RunFinished, payload);
        result
    }

    fn execute(
        &self,
        input: &RunInput,
        category: Category,
        cancel: &CancellationToken,
        run: &mut RunState<'_>,
    ) -> Result<RunOutcome, PipelineError> {
        let resolver = self.upload_resolver(Some(run.events.clone()));
        checkpoint(cancel, Stage::Upload)?;
        let mut subject = AssetReference::new(
            "subject",
            input.subject.clone(),
            sniff_mime(&input.subject),
        );
        let subject_url = run.upload(&resolver, &mut subject)?;
        checkpoint(cancel, Stage::Upload)?;
        let mut garment = AssetReference::new(
            "garment",
            input.garment.clone(),
            sniff_mime(&input.garment),
        );
        let garment_url = run.upload(&resolver, &mut garment)?;

        checkpoint(cancel, Stage::Submit)?;
        let request = JobRequest::new(subject_url, garment_url, category);
        run.receipt.request = Some(request.clone());
        let submission = JobSubmitter::new(self.config.processing.clone(), self.transport.clone())
            .with_events(run.events.clone())
            .submit(&request)?;
        run.receipt.record_response("submit", &submission.response);

        let (payload, task_id, polls, status) = match submission.handle {
            JobHandle::Immediate { payload } => {
                let status = JobStatus {
                    state: JobState::Completed,
                    raw_status: String::new(),
                    progress: Some(100.0),
                    error: None,
                };
                (payload, None, 0, status)
            }
            JobHandle::Async { task_id } => {
                checkpoint(cancel, Stage::Poll)?;
                run.receipt.task_id = Some(task_id.clone());
                let report = self
                    .poller(Some(run.events.clone()))
                    .poll(&task_id, cancel)?;
                run.receipt.polls = report.polls;
                run.receipt.job_status = Some(report.status.clone());
                if let Some(last) = &report.last_payload {
                    run.receipt.record_response("poll", last);
                }
                match report.outcome {
                    PollOutcome::Completed { payload } => {
                        (payload, Some(task_id), report.polls, report.status)
                    }
                    PollOutcome::Failed { message } => {
                        return Err(PipelineError::JobFailed {
                            task_id,
                            message,
                            raw_status: report.status.raw_status,
                        });
                    }
                    PollOutcome::TimedOut => {
                        return Err(PipelineError::TimedOut {
                            task_id,
                            elapsed: report.elapsed,
                            polls: report.polls,
                            last_error: report.last_error,
                        });
                    }
                    PollOutcome::Cancelled => {
                        return Err(PipelineError::Cancelled { stage: Stage::Poll });
                    }
                }
            }
        };
        run.receipt.job_status = Some(status.clone());

        checkpoint(cancel, Stage::Extract)?;
        let extracted = extract(&payload)?;
        if let ArtifactRef::Url { url } = &extracted.artifact {
            if let Some(marker) = self.config.processing.mock_marker_in(url) {
                run.degraded.push(format!(
                    "{} returned a mock result ({marker}): {url}",
                    self.config.processing.name
                ));
            }
        }

        checkpoint(cancel, Stage::Download)?;
        let mut artifact = ResultArtifact::new(extracted.artifact);
        let persisted = self
            .downloader()
            .persist_result(&mut artifact, &input.destination)?;
        run.receipt.artifact = Some(persisted.clone());
        run.events.emit(
            EventKind::ArtifactPersisted,
            json!({
                "path": persisted.path.to_string_lossy(),
                "bytes": persisted.bytes,
                "sha256": persisted.sha256,
                "format": persisted.format,
                "source": artifact.source.kind(),
                "field": extracted.field.key(),
            }),
        );

        let report = RunReport {
            run_id: run.run_id.clone(),
            artifact: persisted,
            source: artifact.source,
            task_id,
            polls,
            status,
            receipt_path: run.receipt_path.clone(),
        };
        if run.degraded.is_empty() {
            Ok(RunOutcome::Completed(report))
        } else {
            Ok(RunOutcome::Degraded {
                report,
                reasons: std::mem::take(&mut run.degraded),
            })
        }
    }
}

struct RunState<'a> {
    run_id: String,
    events: &'a RunEvents,
    receipt: &'a mut RunReceipt,
    receipt_path: PathBuf,
    degraded: Vec<String>,
}

impl RunState<'_> {
    /// Resolves one asset and records the attempt chain in the receipt.
    fn upload(
        &mut self,
        resolver: &UploadResolver,
        asset: &mut AssetReference,
    ) -> Result<String, PipelineError> {
        let result = resolver.resolve(asset);
        let failures = match &result {
            Ok(resolution) => resolution.failures().to_vec(),
            Err(UploadError::Exhausted { attempts, .. }) => attempts.clone(),
            Err(UploadError::AlreadySettled(_)) => Vec::new(),
        };
        self.receipt.uploads.push(UploadRecord {
            label: asset.label().to_string(),
            mime: asset.mime().to_string(),
            bytes: asset.bytes().len() as u64,
            state: asset.state().clone(),
            failures: failures
                .into_iter()
                .map(|row| (row.provider, row.reason))
                .collect(),
        });
        let resolution = result?;
        if resolution.is_placeholder() {
            self.degraded.push(format!(
                "{} upload exhausted every target; placeholder {} used",
                asset.label(),
                resolution.url()
            ));
        }
        Ok(resolution.url().to_string())
    }
}

fn checkpoint(cancel: &CancellationToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { stage });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use vton_contracts::config::PipelineConfig;
    use vton_contracts::jobs::{ArtifactRef, JobState};

    use super::{RunInput, RunOutcome, TryOnPipeline};
    use crate::clock::{CancellationToken, ManualClock};
    use crate::error::{PipelineError, Stage, UploadError};
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::Method;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRsubject";
    const RESULT: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRresult";
    const SUBMIT_URL: &str = "https://api.test/r-vton";

    fn config(
        interval: f64,
        deadline: f64,
        placeholder: Option<&str>,
    ) -> anyhow::Result<PipelineConfig> {
        let raw = json!({
            "uploads": {
                "targets": [
                    {
                        "name": "primary",
                        "endpoint": "https://up1.test/upload",
                        "encoding": {"kind": "multipart", "field": "file"}
                    },
                    {
                        "name": "backup",
                        "endpoint": "https://up2.test/upload",
                        "encoding": {"kind": "base64_json", "field": "image"}
                    }
                ],
                "placeholder_url": placeholder
            },
            "processing": {
                "name": "pixazo",
                "endpoint": SUBMIT_URL,
                "poll_interval_s": interval,
                "poll_deadline_s": deadline,
                "mock_artifact_markers": ["mock-results.vton.ai"]
            }
        });
        PipelineConfig::from_json_str(&raw.to_string())
    }

    struct Harness {
        _temp: tempfile::TempDir,
        pipeline: TryOnPipeline,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        input: RunInput,
    }

    fn harness(
        config: PipelineConfig,
        transport: ScriptedTransport,
        clock: Arc<ManualClock>,
    ) -> anyhow::Result<Harness> {
        let temp = tempfile::tempdir()?;
        let transport = Arc::new(transport);
        let pipeline = TryOnPipeline::with_parts(
            Arc::new(config),
            transport.clone(),
            clock.clone(),
            temp.path().join("runs"),
        )?;
        let input = RunInput {
            subject: PNG.to_vec(),
            garment: PNG.to_vec(),
            category: None,
            destination: temp.path().join("out").join("result.png"),
        };
        Ok(Harness {
            _temp: temp,
            pipeline,
            transport,
            clock,
            input,
        })
    }

    fn hosted(transport: &ScriptedTransport) {
        transport
            .json(200, json!({"data": {"url": "https://cdn.test/subject.png"}}))
            .json(200, json!({"data": {"url": "https://cdn.test/garment.png"}}));
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        let mut types = Vec::new();
        for line in raw.lines() {
            let event: Value = serde_json::from_str(line)?;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    fn read_receipt(path: &Path) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    #[test]
    fn async_job_completes_after_three_polls() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"id": "abc"}))
            .json(200, json!({"status": "processing"}))
            .json(200, json!({"status": "processing"}))
            .json(200, json!({"status": "completed", "output_img_url": "http://x/r.png"}))
            .bytes(200, RESULT);
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;

        let outcome = h.pipeline.run(&h.input, &CancellationToken::new())?;
        let report = match &outcome {
            RunOutcome::Completed(report) => report,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(report.polls, 3);
        assert_eq!(report.task_id.as_deref(), Some("abc"));
        assert_eq!(report.status.state, JobState::Completed);
        assert_eq!(
            report.source,
            ArtifactRef::Url {
                url: "http://x/r.png".to_string()
            }
        );
        assert_eq!(std::fs::read(&h.input.destination)?, RESULT);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(10); 2]);

        let requests = h.transport.requests();
        assert_eq!(requests[2].url, SUBMIT_URL);
        assert_eq!(
            requests[2].body,
            crate::transport::RequestBody::Json(json!({
                "category": "upper_body",
                "human_img": "https://cdn.test/subject.png",
                "garm_img": "https://cdn.test/garment.png",
                "callback_url": "",
            }))
        );

        let receipt = read_receipt(&report.receipt_path)?;
        assert_eq!(receipt["outcome"], json!("completed"));
        assert_eq!(receipt["polls"], json!(3));
        assert_eq!(receipt["uploads"][1]["state"]["provider"], json!("primary"));
        assert_eq!(
            event_types(h.pipeline.events_path())?,
            vec![
                "run_started",
                "upload_attempt",
                "upload_resolved",
                "upload_attempt",
                "upload_resolved",
                "job_submitted",
                "poll_tick",
                "poll_tick",
                "poll_tick",
                "job_terminal",
                "artifact_persisted",
                "run_finished",
            ]
        );
        Ok(())
    }

    #[test]
    fn immediate_result_skips_polling() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"output_img_url": "http://x/r.png"}))
            .bytes(200, RESULT);
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;

        let outcome = h.pipeline.run(&h.input, &CancellationToken::new())?;
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.report().polls, 0);
        assert_eq!(outcome.report().task_id, None);
        assert_eq!(h.transport.urls(Method::Get), vec!["http://x/r.png"]);
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(std::fs::read(&h.input.destination)?, RESULT);
        Ok(())
    }

    #[test]
    fn exhausted_uploads_never_submit() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        transport
            .json(500, json!({"error": "internal"}))
            .json(403, json!({"error": "forbidden"}));
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;

        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.stage(), Stage::Upload);
        assert!(matches!(
            &err,
            PipelineError::Upload(UploadError::Exhausted { attempts, .. }) if attempts.len() == 2
        ));
        assert_eq!(
            h.transport.urls(Method::Post),
            vec!["https://up1.test/upload", "https://up2.test/upload"]
        );
        assert!(!h.input.destination.exists());

        let types = event_types(h.pipeline.events_path())?;
        assert!(types.contains(&"upload_exhausted".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("run_finished"));
        Ok(())
    }

    #[test]
    fn deadline_ends_run_as_timed_out() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new());
        let transport = ScriptedTransport::with_latency(clock.clone(), Duration::from_millis(200));
        hosted(&transport);
        transport.json(200, json!({"task_id": "slow"}));
        for _ in 0..5 {
            transport.json(200, json!({"status": "processing"}));
        }
        let h = harness(config(10.0, 20.0, None)?, transport, clock)?;

        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        match &err {
            PipelineError::TimedOut {
                task_id, elapsed, ..
            } => {
                assert_eq!(task_id, "slow");
                assert!(*elapsed >= Duration::from_secs(20));
                assert!(*elapsed < Duration::from_secs(30));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.stage(), Stage::Poll);
        Ok(())
    }

    #[test]
    fn placeholder_fallback_is_reported_as_degraded() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        transport
            .json(500, json!({}))
            .json(500, json!({}))
            .json(200, json!({"data": {"url": "https://cdn.test/garment.png"}}))
            .json(200, json!({"result": "http://x/r.png"}))
            .bytes(200, RESULT);
        let h = harness(
            config(10.0, 300.0, Some("https://placeholder.test/person.png"))?,
            transport,
            Arc::new(ManualClock::new()),
        )?;

        let outcome = h.pipeline.run(&h.input, &CancellationToken::new())?;
        match &outcome {
            RunOutcome::Degraded { reasons, .. } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].starts_with("subject upload"));
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
        let receipt = read_receipt(&outcome.report().receipt_path)?;
        assert_eq!(receipt["outcome"], json!("degraded"));
        assert_eq!(receipt["uploads"][0]["state"]["state"], json!("placeholder"));
        assert_eq!(
            receipt["request"]["subject_url"],
            json!("https://placeholder.test/person.png")
        );
        assert!(event_types(h.pipeline.events_path())?.contains(&"run_degraded".to_string()));
        Ok(())
    }

    #[test]
    fn mock_artifact_from_provider_is_degraded() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"id": "abc"}))
            .json(
                200,
                json!({"status": "completed", "result_url": "https://mock-results.vton.ai/r.png"}),
            )
            .bytes(200, RESULT);
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;

        let outcome = h.pipeline.run(&h.input, &CancellationToken::new())?;
        match &outcome {
            RunOutcome::Degraded { reasons, .. } => {
                assert_eq!(
                    reasons,
                    &vec![
                        "pixazo returned a mock result (mock-results.vton.ai): \
                         https://mock-results.vton.ai/r.png"
                            .to_string()
                    ]
                );
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
        assert_eq!(std::fs::read(&h.input.destination)?, RESULT);
        let receipt = read_receipt(&outcome.report().receipt_path)?;
        assert_eq!(receipt["outcome"], json!("degraded"));
        Ok(())
    }

    #[test]
    fn failed_status_with_result_text_is_a_job_failure() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"id": "abc"}))
            .json(200, json!({"status": "failed", "result": "NSFW content detected"}));
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;

        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        assert!(matches!(
            &err,
            PipelineError::JobFailed { raw_status, .. } if raw_status == "failed"
        ));
        assert_eq!(err.stage(), Stage::Poll);
        assert!(h.transport.urls(Method::Get).iter().all(|url| url.starts_with(SUBMIT_URL)));
        Ok(())
    }

    #[test]
    fn provider_failure_and_missing_result_name_their_stage() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"id": "abc"}))
            .json(200, json!({"status": "error", "error_message": "pose not detected"}));
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;
        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        assert!(matches!(
            &err,
            PipelineError::JobFailed { message, .. } if message == "pose not detected"
        ));

        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"id": "abc"}))
            .json(200, json!({"status": "done", "seed": 7}));
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;
        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.stage(), Stage::Extract);
        assert!(err.to_string().contains("seed, status"));
        Ok(())
    }

    #[test]
    fn failed_download_reports_download_stage() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new();
        hosted(&transport);
        transport
            .json(200, json!({"image_url": "http://x/gone.png"}))
            .bytes(410, b"gone");
        let h = harness(config(10.0, 300.0, None)?, transport, Arc::new(ManualClock::new()))?;
        let err = h.pipeline.run(&h.input, &CancellationToken::new()).unwrap_err();
        assert_eq!(err.stage(), Stage::Download);
        assert!(!h.input.destination.exists());
        Ok(())
    }

    #[test]
    fn cancelled_run_sends_nothing() -> anyhow::Result<()> {
        let h = harness(
            config(10.0, 300.0, None)?,
            ScriptedTransport::new(),
            Arc::new(ManualClock::new()),
        )?;
        let token = CancellationToken::new();
        token.cancel();
        let err = h.pipeline.run(&h.input, &token).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { stage: Stage::Upload }));
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.transport.remaining(), 0);
        Ok(())
    }

    #[test]
    fn pipeline_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TryOnPipeline>();
    }
}
