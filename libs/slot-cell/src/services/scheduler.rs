use std::sync::Arc;

use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shared_utils::ClinicClock;

use crate::models::MaintenanceReport;
use crate::services::lifecycle::SlotLifecycleService;

/// Daily maintenance jobs, in the order they fire each night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceJob {
    GenerateSlots,
    CleanupAppointments,
    CleanupSlots,
}

impl MaintenanceJob {
    pub const ALL: [MaintenanceJob; 3] = [
        MaintenanceJob::GenerateSlots,
        MaintenanceJob::CleanupAppointments,
        MaintenanceJob::CleanupSlots,
    ];

    /// Clinic wall-clock trigger. Appointment cleanup precedes slot cleanup
    /// so the slots it frees are reclaimed the same night.
    pub fn trigger_time(&self) -> NaiveTime {
        let minute = match self {
            MaintenanceJob::GenerateSlots => 1,
            MaintenanceJob::CleanupAppointments => 5,
            MaintenanceJob::CleanupSlots => 10,
        };
        NaiveTime::from_hms_opt(0, minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// The job due soonest after the clock's current instant.
    pub fn next_due(clock: &ClinicClock) -> (MaintenanceJob, DateTime<Tz>) {
        Self::ALL
            .into_iter()
            .map(|job| (job, clock.next_occurrence(job.trigger_time())))
            .min_by_key(|(_, at)| *at)
            .unwrap_or_else(|| {
                let job = MaintenanceJob::GenerateSlots;
                (job, clock.next_occurrence(job.trigger_time()))
            })
    }
}

pub struct MaintenanceScheduler {
    lifecycle: Arc<SlotLifecycleService>,
    clock: ClinicClock,
    horizon_days: u32,
    is_shutdown: RwLock<bool>,
    wake: Notify,
}

impl MaintenanceScheduler {
    pub fn new(lifecycle: Arc<SlotLifecycleService>, clock: ClinicClock, horizon_days: u32) -> Self {
        Self {
            lifecycle,
            clock,
            horizon_days,
            is_shutdown: RwLock::new(false),
            wake: Notify::new(),
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting maintenance scheduler ({} day horizon)", self.horizon_days);
        tokio::spawn(async move { self.run_loop().await })
    }

    pub async fn shutdown(&self) {
        info!("Stopping maintenance scheduler");
        *self.is_shutdown.write().await = true;
        self.wake.notify_one();
    }

    async fn run_loop(&self) {
        loop {
            if *self.is_shutdown.read().await {
                debug!("Maintenance scheduler received shutdown signal");
                break;
            }

            let (job, at) = MaintenanceJob::next_due(&self.clock);
            let wait = (at - self.clock.now()).to_std().unwrap_or_default();
            debug!("Next maintenance job {:?} at {}", job, at);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run(job).await;
                }
                _ = self.wake.notified() => continue,
            }
        }

        debug!("Maintenance scheduler loop ended");
    }

    pub async fn run(&self, job: MaintenanceJob) -> Option<MaintenanceReport> {
        let result = match job {
            MaintenanceJob::GenerateSlots => self.lifecycle.ensure_rolling_window(self.horizon_days).await,
            MaintenanceJob::CleanupAppointments => self.lifecycle.cleanup_past_appointments().await,
            MaintenanceJob::CleanupSlots => self.lifecycle.cleanup_past_slots().await,
        };

        match result {
            Ok(report) => {
                if !report.is_clean() {
                    warn!("{:?} finished with {} failures", job, report.failures.len());
                }
                Some(report)
            }
            Err(e) => {
                error!("Maintenance job {:?} failed: {}", job, e);
                None
            }
        }
    }
}
