//! Engine facade
//!
//! Wires the harness, catalog and store together and exposes the operations
//! a caller needs: start a run in the background, poll it, resume it, and
//! submit feedback.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::harness::{create_harness, Harness};
use crate::workflow::{FeedbackProcessor, RunOptions, StateManager, WorkflowRunner, WorkflowState};
use crate::Result;

/// A run executing on its own task
pub struct RunHandle {
    pub run_id: String,
    pub task: JoinHandle<Result<WorkflowState>>,
}

/// Entry point for running and reviewing workflows
#[derive(Clone)]
pub struct Engine {
    runner: Arc<WorkflowRunner>,
    feedback: Arc<FeedbackProcessor>,
    state_manager: Arc<StateManager>,
}

impl Engine {
    pub fn new(
        harness: Arc<dyn Harness>,
        catalog: Arc<Catalog>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        Self {
            runner: Arc::new(WorkflowRunner::new(
                Arc::clone(&harness),
                catalog,
                Arc::clone(&state_manager),
            )),
            feedback: Arc::new(FeedbackProcessor::new(harness, Arc::clone(&state_manager))),
            state_manager,
        }
    }

    /// Build an engine from configuration: chat harness, catalog directory, file store
    pub fn from_config(config: &Config) -> Result<Self> {
        let harness: Arc<dyn Harness> = Arc::from(create_harness(config)?);
        let catalog = Arc::new(Catalog::load(&config.data_dir())?);
        let state_manager = Arc::new(StateManager::file(config.store_dir()));
        Ok(Self::new(harness, catalog, state_manager))
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Start a new run in the background and return its ID
    pub async fn start(&self, project_description: &str) -> Result<String> {
        let handle = self
            .start_with(None, project_description, RunOptions::default())
            .await?;
        Ok(handle.run_id)
    }

    /// Start a run under a caller-chosen ID; an existing run with that ID is resumed
    pub async fn start_with_id(&self, run_id: &str, project_description: &str) -> Result<String> {
        let handle = self
            .start_with(
                Some(run_id.to_string()),
                project_description,
                RunOptions::default(),
            )
            .await?;
        Ok(handle.run_id)
    }

    /// Create the run record, then drive it on a spawned task
    ///
    /// Returns once the record exists, so the ID can be polled right away.
    pub async fn start_with(
        &self,
        run_id: Option<String>,
        project_description: &str,
        options: RunOptions,
    ) -> Result<RunHandle> {
        let run_id = self.runner.create(run_id, project_description).await?;
        let task = self.spawn(run_id.clone(), options);
        Ok(RunHandle { run_id, task })
    }

    /// Continue an existing run in the background
    pub fn resume(&self, run_id: &str, options: RunOptions) -> Result<RunHandle> {
        // Fail fast on unknown runs
        self.state_manager.load(run_id)?;
        info!("Resuming workflow run: {}", run_id);
        Ok(RunHandle {
            run_id: run_id.to_string(),
            task: self.spawn(run_id.to_string(), options),
        })
    }

    /// Create the record for a run without starting it
    pub async fn create(&self, run_id: Option<String>, project_description: &str) -> Result<String> {
        self.runner.create(run_id, project_description).await
    }

    /// Drive an existing run on the current task
    pub async fn run(&self, run_id: &str, options: &RunOptions) -> Result<WorkflowState> {
        self.runner.run(run_id, options).await
    }

    /// Latest persisted state of a run
    pub fn get_state(&self, run_id: &str) -> Result<WorkflowState> {
        self.state_manager.load(run_id)
    }

    pub async fn submit_feedback(
        &self,
        run_id: &str,
        step: &str,
        feedback: &str,
    ) -> Result<WorkflowState> {
        self.feedback.apply_feedback(run_id, step, feedback).await
    }

    pub fn list_runs(&self) -> Result<Vec<String>> {
        self.state_manager.list()
    }

    fn spawn(&self, run_id: String, options: RunOptions) -> JoinHandle<Result<WorkflowState>> {
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let result = runner.run(&run_id, &options).await;
            if let Err(e) = &result {
                error!("Workflow run {} stopped: {}", run_id, e);
            }
            result
        })
    }
}
