use crate::capture::CaptureOptions;
use crate::job::Job;
use crate::live::LivePage;
use crate::{Error, Result};
use std::time::Instant;
use stepwright::replay::{StepNotice, StepStatus};
use stepwright::{share, Recording, ReplayReport, Replayer, Snapshot, StepEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of replaying a job.
#[derive(Debug)]
pub struct RunResult {
    /// Every step ran and none failed.
    pub success: bool,
    /// Per-step outcomes.
    pub report: ReplayReport,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

/// What `check` found in a job's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub steps: usize,
    pub interactions: usize,
    pub navigations: usize,
    /// Steps whose element sits behind a frame or shadow root.
    pub crossing_boundaries: usize,
}

/// Replays a job's recording against its page snapshot.
pub struct Runner {
    job: Job,
}

impl Runner {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    fn load_recording(&self) -> Result<Recording> {
        let path = self.job.recording_path();
        debug!("Loading recording {}", path.display());
        Ok(Recording::load(&path)?)
    }

    fn load_snapshot(&self) -> Result<Snapshot> {
        let path = self.job.page_path();
        debug!("Loading snapshot {}", path.display());
        Ok(Snapshot::load(&path)?)
    }

    /// Validate the job's snapshot and recording without replaying.
    pub fn check(&self) -> Result<CheckSummary> {
        self.load_snapshot()?;
        let recording = self.load_recording()?;

        let mut summary = CheckSummary {
            steps: recording.steps.len(),
            interactions: 0,
            navigations: 0,
            crossing_boundaries: 0,
        };
        for (i, step) in recording.steps.iter().enumerate() {
            if step.event == StepEvent::Open {
                summary.navigations += 1;
                continue;
            }
            let bundle = step.bundle.as_ref().ok_or_else(|| {
                Error::Config(format!(
                    "step {} ('{}') is a {:?} with no bundle",
                    i + 1,
                    step.label,
                    step.event
                ))
            })?;
            summary.interactions += 1;
            if bundle.crosses_boundaries() {
                summary.crossing_boundaries += 1;
            }
        }
        Ok(summary)
    }

    /// Replay the recording.
    pub async fn run(&self) -> Result<RunResult> {
        let start = Instant::now();
        let page = share(self.load_snapshot()?.to_dom());
        let recording = self.load_recording()?;
        info!(
            "Replaying '{}' ({} steps) for job '{}'",
            recording.name,
            recording.steps.len(),
            self.job.name
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<StepNotice>();
        let progress = tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                match notice.status {
                    StepStatus::Loading => debug!("Step '{}' started", notice.label),
                    StepStatus::Success => info!("Step '{}' done", notice.label),
                    StepStatus::Error => warn!(
                        "Step '{}' failed: {}",
                        notice.label,
                        notice.message.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
        });

        let replayer = Replayer::new(page, self.job.engine.clone()).with_notifications(tx);
        let report = replayer
            .run_recording(&recording, self.job.abort_on_failure)
            .await;
        drop(replayer);
        if let Err(e) = progress.await {
            warn!("Progress logger stopped: {}", e);
        }

        Ok(RunResult {
            success: report.passed(),
            report,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Replay the recording on a live Chrome tab opened at `url`. The job's
    /// snapshot is not used.
    pub async fn run_live(&self, url: &str, options: &CaptureOptions) -> Result<RunResult> {
        let start = Instant::now();
        let recording = self.load_recording()?;
        info!(
            "Replaying '{}' ({} steps) live on {} for job '{}'",
            recording.name,
            recording.steps.len(),
            url,
            self.job.name
        );

        let live = LivePage::open(url, options, self.job.engine.clone()).await?;
        let report = live
            .run_recording(&recording, self.job.abort_on_failure)
            .await;
        if let Err(e) = live.close().await {
            warn!("Failed to close browser: {}", e);
        }

        Ok(RunResult {
            success: report.passed(),
            report,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
