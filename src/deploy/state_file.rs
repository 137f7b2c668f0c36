// ABOUTME: File-backed state recorder writing a JSON deployment record per plan.
// ABOUTME: The record doubles as the caller-side "deployment in progress" flag.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::recorder::{DeploymentStatus, RecorderError, StateRecorder, StepRecord, StepStatus};

/// Direction the recorded deployment is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPhase {
    Deploying,
    RollingBack,
    Finished,
}

/// Persisted state of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Plan the deployment belongs to.
    pub name: String,
    /// Hostname of the machine running the deployment.
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: RecordPhase,
    pub current_step: usize,
    pub steps: Vec<StepRecord>,
    /// Set once the deployment reached a terminal state.
    pub status: Option<DeploymentStatus>,
}

impl DeploymentRecord {
    pub fn new(name: impl Into<String>, steps: &[StepRecord]) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: now,
            updated_at: now,
            phase: RecordPhase::Deploying,
            current_step: 0,
            steps: steps.to_vec(),
            status: None,
        }
    }

    /// A record not touched for an hour belongs to a run that died.
    pub fn is_stale(&self) -> bool {
        let age = Utc::now() - self.updated_at;
        age.num_hours() >= 1
    }

    /// True while the deployment has neither finished nor gone stale.
    pub fn is_in_progress(&self) -> bool {
        self.status.is_none() && !self.is_stale()
    }

    fn current_mut(&mut self) -> Option<&mut StepRecord> {
        self.steps.get_mut(self.current_step)
    }
}

/// Records deployment progress to `{state_dir}/{name}.json`.
///
/// Only multi-step deployments open a record; calls without an open record
/// are accepted and ignored.
#[derive(Debug)]
pub struct FileStateRecorder {
    path: PathBuf,
    name: String,
    record: Mutex<Option<DeploymentRecord>>,
}

impl FileStateRecorder {
    pub fn new(state_dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: Self::record_path(state_dir.as_ref(), &name),
            name,
            record: Mutex::new(None),
        }
    }

    pub fn record_path(state_dir: &Path, name: &str) -> PathBuf {
        state_dir.join(format!("{name}.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record on disk, if any.
    pub fn load(&self) -> Result<Option<DeploymentRecord>, RecorderError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The record of a deployment still running elsewhere.
    ///
    /// Stale records are logged and ignored.
    pub fn in_progress(&self) -> Result<Option<DeploymentRecord>, RecorderError> {
        let Some(record) = self.load()? else {
            return Ok(None);
        };

        if record.status.is_none() && record.is_stale() {
            tracing::warn!(
                holder = %record.holder,
                pid = record.pid,
                updated_at = %record.updated_at,
                "ignoring stale deployment record"
            );
            return Ok(None);
        }

        Ok(record.is_in_progress().then_some(record))
    }

    fn write(&self, record: &DeploymentRecord) -> Result<(), RecorderError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        // Write then rename so readers never see a partial record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut DeploymentRecord)) -> Result<(), RecorderError> {
        let mut guard = self.record.lock();
        let Some(record) = guard.as_mut() else {
            return Ok(());
        };
        change(record);
        record.updated_at = Utc::now();
        self.write(record)
    }
}

impl StateRecorder for FileStateRecorder {
    fn start_deployment(&self, steps: &[StepRecord]) -> Result<(), RecorderError> {
        let record = DeploymentRecord::new(&self.name, steps);
        self.write(&record)?;
        *self.record.lock() = Some(record);
        tracing::debug!(path = %self.path.display(), "deployment record opened");
        Ok(())
    }

    fn start_rollback(&self) -> Result<(), RecorderError> {
        self.modify(|record| {
            record.phase = RecordPhase::RollingBack;
            let current = record.current_step;
            for step in record.steps.iter_mut().take(current) {
                step.status = StepStatus::WaitingForRollback;
            }
        })
    }

    fn advance_step(&self, status: StepStatus) -> Result<(), RecorderError> {
        self.modify(|record| {
            if let Some(step) = record.current_mut() {
                step.status = status;
            }
            match record.phase {
                RecordPhase::Deploying => record.current_step += 1,
                RecordPhase::RollingBack => {
                    record.current_step = record.current_step.saturating_sub(1)
                }
                RecordPhase::Finished => {}
            }
        })
    }

    fn update_current_step_status(&self, status: StepStatus) -> Result<(), RecorderError> {
        self.modify(|record| {
            if let Some(step) = record.current_mut() {
                step.status = status;
            }
        })
    }

    fn finish_deployment(&self, status: DeploymentStatus) -> Result<(), RecorderError> {
        self.modify(|record| {
            record.phase = RecordPhase::Finished;
            record.status = Some(status);
        })
    }
}
