//! Scripted in-memory engine for tests

use super::traits::{
    EngineFile, EngineHandle, EngineState, EngineStatus, FetchEngine, FetchRequest,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// What one poll of a scripted transfer reports
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Active with these byte counts
    Progress { completed: u64, total: u64 },
    /// Write `size` bytes to the expected path and report complete
    Complete { size: u64 },
    /// Report an engine error
    Fail(String),
    /// Stay active without progress (the last step repeats)
    Hang,
}

struct Transfer {
    request: FetchRequest,
    steps: VecDeque<Step>,
}

/// Engine whose transfers follow pre-loaded scripts, one script per submission
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    transfers: Mutex<HashMap<String, Transfer>>,
    submitted: Mutex<Vec<FetchRequest>>,
    submits: AtomicU32,
    cancels: AtomicU32,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next submission; unscripted submissions complete at once
    pub(crate) fn push_script(&self, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(steps);
    }

    pub(crate) fn submit_count(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_count(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<FetchRequest> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FetchEngine for ScriptedEngine {
    async fn submit(&self, request: &FetchRequest) -> Result<EngineHandle> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        let steps = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| vec![Step::Complete { size: 1024 }]);

        let gid = format!("gid-{}", n);
        self.transfers.lock().unwrap_or_else(|e| e.into_inner()).insert(
            gid.clone(),
            Transfer {
                request: request.clone(),
                steps: steps.into(),
            },
        );
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(EngineHandle(gid))
    }

    async fn poll(&self, handle: &EngineHandle) -> Result<EngineStatus> {
        let (step, request) = {
            let mut transfers = self.transfers.lock().unwrap_or_else(|e| e.into_inner());
            let transfer = transfers
                .get_mut(&handle.0)
                .ok_or_else(|| Error::Transfer(format!("unknown handle {}", handle)))?;
            let step = if transfer.steps.len() > 1 {
                transfer.steps.pop_front()
            } else {
                transfer.steps.front().cloned()
            };
            (step.unwrap_or(Step::Hang), transfer.request.clone())
        };

        Ok(match step {
            Step::Progress { completed, total } => {
                let mut status = EngineStatus::new(EngineState::Active);
                status.completed = completed;
                status.total = total;
                status.download_rate = 1000;
                status
            }
            Step::Hang => EngineStatus::new(EngineState::Active),
            Step::Fail(message) => {
                let mut status = EngineStatus::new(EngineState::Error);
                status.error_message = Some(message);
                status
            }
            Step::Complete { size } => {
                let path = request
                    .expected_path()
                    .unwrap_or_else(|| request.output_dir.join(format!("{}.bin", handle)));
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let file = tokio::fs::File::create(&path).await?;
                file.set_len(size).await?;

                let mut status = EngineStatus::new(EngineState::Complete);
                status.completed = size;
                status.total = size;
                status.files.push(EngineFile { path, length: size });
                status
            }
        })
    }

    async fn cancel(&self, handle: &EngineHandle) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(transfer) = self
            .transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&handle.0)
        {
            transfer.steps = VecDeque::from(vec![Step::Fail("removed".to_string())]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
