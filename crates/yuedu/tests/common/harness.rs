//! Isolated job pipeline for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use yuedu::broadcast::ProgressBus;
use yuedu::jobs::{JobState, JobStatus};
use yuedu::provider::Translator;
use yuedu::worker::{BusProgress, JobRunner, RunnerSettings};
use yuedu::{Database, JobStore, LeaseManager, TranslationService};

pub const CEDICT_SAMPLE: &str = "\
# CC-CEDICT sample
你好 你好 [ni3 hao3] /Hello!/Hi!/How are you?/
世界 世界 [shi4 jie4] /world/CL:個|个[ge4]/
學習 学习 [xue2 xi2] /to learn/to study/
中文 中文 [Zhong1 wen2] /Chinese language/
";

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub store: JobStore,
    pub leases: LeaseManager,
    pub bus: ProgressBus,
    pub service: TranslationService,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_max_attempts(3)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("data").join("yuedu.db"))
            .expect("Failed to open database");
        let store = JobStore::new(db.clone());
        let leases = LeaseManager::new(db.clone(), max_attempts);
        let bus = ProgressBus::default();
        let service = TranslationService::new(store.clone(), bus.clone());
        Self {
            temp_dir,
            db,
            store,
            leases,
            bus,
            service,
        }
    }

    /// A runner publishing to this harness's bus.
    pub fn runner(&self, translator: Arc<dyn Translator>) -> JobRunner {
        self.runner_with(translator, RunnerSettings::default())
    }

    pub fn runner_with(
        &self,
        translator: Arc<dyn Translator>,
        settings: RunnerSettings,
    ) -> JobRunner {
        JobRunner::new(
            self.store.clone(),
            self.leases.clone(),
            translator,
            Arc::new(BusProgress::new(self.bus.clone())),
            settings,
        )
    }

    pub fn write_dictionary(&self) -> PathBuf {
        let path = self.temp_dir.path().join("cedict.u8");
        std::fs::write(&path, CEDICT_SAMPLE).expect("Failed to write dictionary");
        path
    }

    /// Polls the store until `predicate` holds or `timeout` passes.
    pub fn wait_until<F>(&self, id: &str, timeout: Duration, predicate: F) -> Option<JobStatus>
    where
        F: Fn(&JobStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(status) = self.store.job_status(id) {
                if predicate(&status) {
                    return Some(status);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    pub fn wait_for_state(&self, id: &str, state: JobState) -> Option<JobStatus> {
        self.wait_until(id, Duration::from_secs(10), |s| s.state == state)
    }
}
