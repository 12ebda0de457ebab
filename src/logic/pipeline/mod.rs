//! Background optimization pipeline.
//!
//! `Coordinator::start` moves a plan into `optimizing`, decides its stage
//! chain and queues a job. Workers run each job's stages in order and
//! publish progress on the plan's topic of the [`ProgressBus`].

mod progress;
mod stages;

pub use progress::ProgressBus;
pub use stages::{plan_chain, run_stage, PipelineServices, Stage};

use crate::error::{CropOpsError, Result};
use crate::models::ProgressEvent;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

const JOB_QUEUE_CAPACITY: usize = 256;

/// Fixed at enqueue time and never changed while the job runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    /// Reference date for history windows and default planning periods
    pub today: NaiveDate,
    pub chain: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedPipeline {
    pub plan_id: i64,
    pub stages: Vec<Stage>,
}

struct Job {
    plan_id: i64,
    params: PipelineParams,
}

#[derive(Clone)]
pub struct Coordinator {
    services: Arc<PipelineServices>,
    bus: ProgressBus,
    jobs: mpsc::Sender<Job>,
}

impl Coordinator {
    /// Spawns `pipeline.workers` workers on the current tokio runtime.
    pub fn new(services: PipelineServices) -> Self {
        let services = Arc::new(services);
        let bus = ProgressBus::new();
        let (jobs, rx) = mpsc::channel(JOB_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let workers = services.config.pipeline.workers.max(1);
        for worker in 0..workers {
            let services = services.clone();
            let bus = bus.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    run_job(&services, &bus, job).await;
                }
                info!(worker, "Pipeline worker stopped");
            });
        }
        info!(workers, "Pipeline workers started");

        Self {
            services,
            bus,
            jobs,
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    pub fn subscribe(
        &self,
        plan_id: i64,
    ) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        self.bus.subscribe(plan_id)
    }

    /// Queues the optimization chain for a plan.
    ///
    /// Fails with `AlreadyRunning` if the plan is optimizing already; the
    /// running chain is left alone.
    pub async fn start(&self, plan_id: i64, today: NaiveDate) -> Result<StartedPipeline> {
        let db = self.services.db.clone();
        let schedule_generation = self.services.config.pipeline.schedule_generation;
        let chain = tokio::task::spawn_blocking(move || {
            db.require_plan(plan_id)?;
            let chain = plan_chain(&db, plan_id, schedule_generation)?;
            db.begin_optimization(plan_id)?;
            Ok::<_, CropOpsError>(chain)
        })
        .await
        .map_err(|e| CropOpsError::InvalidData(format!("Start task failed: {}", e)))??;

        self.bus.publish(
            plan_id,
            ProgressEvent::Progress {
                progress: 0,
                phase_message: "Queued".to_string(),
            },
        );

        let params = PipelineParams {
            today,
            chain: chain.clone(),
        };
        if self.jobs.send(Job { plan_id, params }).await.is_err() {
            let message = "Pipeline workers are not running";
            fail(&self.services, &self.bus, plan_id, message, message);
            return Err(CropOpsError::InvalidData(message.to_string()));
        }

        info!(
            plan_id,
            stages = ?chain.iter().map(Stage::as_str).collect::<Vec<_>>(),
            "Queued optimization"
        );
        Ok(StartedPipeline {
            plan_id,
            stages: chain,
        })
    }
}

fn percent(done: usize, total: usize) -> u8 {
    (done * 100 / total.max(1)).min(100) as u8
}

fn fail(services: &PipelineServices, bus: &ProgressBus, plan_id: i64, phase: &str, detail: &str) {
    if let Err(e) = services.db.fail_plan(plan_id, phase, detail) {
        error!(plan_id, error = %e, "Could not mark plan as failed");
    }
    bus.publish(
        plan_id,
        ProgressEvent::Failed {
            phase_message: phase.to_string(),
        },
    );
}

async fn run_job(services: &PipelineServices, bus: &ProgressBus, job: Job) {
    let Job { plan_id, params } = job;
    let total = params.chain.len();

    for (index, stage) in params.chain.iter().copied().enumerate() {
        bus.publish(
            plan_id,
            ProgressEvent::Progress {
                progress: percent(index, total),
                phase_message: stage.start_message().to_string(),
            },
        );
        if let Err(e) = services
            .db
            .set_plan_phase(plan_id, stage.as_str(), stage.start_message())
        {
            warn!(plan_id, stage = %stage, error = %e, "Could not record plan phase");
        }
        info!(plan_id, stage = %stage, "Stage started");

        match run_stage(services, stage, plan_id, &params).await {
            Ok(message) => {
                info!(plan_id, stage = %stage, "{}", message);
                bus.publish(
                    plan_id,
                    ProgressEvent::Progress {
                        progress: percent(index + 1, total),
                        phase_message: message,
                    },
                );
            }
            Err(e) => {
                error!(plan_id, stage = %stage, error = %e, "Stage failed");
                let phase = format!("{}: {}", stage.failure_message(), e);
                fail(services, bus, plan_id, &phase, &e.to_string());
                return;
            }
        }
    }

    bus.publish(
        plan_id,
        ProgressEvent::Redirect {
            redirect_path: services.config.pipeline.redirect_path_for(plan_id),
        },
    );
    bus.publish(plan_id, ProgressEvent::Completed);
}
