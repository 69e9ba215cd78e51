use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::services::clock::{business_tomorrow, Clock, BUSINESS_TZ};
use crate::services::notifications::NotificationDispatcher;
use crate::store::{BookingStore, StoreError};

/// What invoked a reminder pass. All sources run the same routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Daily,
    Hourly,
    Startup,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Daily => "daily",
            TriggerSource::Hourly => "hourly",
            TriggerSource::Startup => "startup",
            TriggerSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReminderRunStats {
    pub target_date: Option<NaiveDate>,
    pub sent: usize,
    /// Candidates another pass claimed between our query and our claim.
    pub skipped_claimed: usize,
    /// Bookings on the target date that were not candidates (unconfirmed or
    /// already reminded).
    pub skipped_not_due: usize,
    /// Claims we won whose reminder reached no channel. Not retried.
    pub failed: usize,
    /// Another pass was already running in this process; nothing was done.
    pub lock_held: bool,
}

/// Releases the run lock when the pass ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Day-before reminders. The run lock only keeps overlapping triggers in
/// one process from doing duplicate work; the per-booking claim in the
/// store is what guarantees one reminder per booking per date.
pub struct ReminderScheduler {
    store: Arc<dyn BookingStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn BookingStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            running: AtomicBool::new(false),
        }
    }

    fn try_lock(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: &self.running,
            })
    }

    /// Claims and reminds every confirmed booking picking up tomorrow
    /// (business timezone) that has not been reminded for that date.
    ///
    /// Returns immediately with `lock_held` when a pass is already running.
    /// A failed send keeps its claim and is left for a manual resend.
    #[tracing::instrument(skip(self), fields(trigger = %trigger))]
    pub async fn run_reminder_pass(
        &self,
        trigger: TriggerSource,
    ) -> Result<ReminderRunStats, StoreError> {
        let Some(_guard) = self.try_lock() else {
            tracing::info!("Reminder pass already in flight, skipping");
            return Ok(ReminderRunStats {
                lock_held: true,
                ..Default::default()
            });
        };

        let target_date = business_tomorrow(self.clock.now());
        let mut stats = ReminderRunStats {
            target_date: Some(target_date),
            ..Default::default()
        };

        let active_on_date = self.store.count_active_on(target_date).await?;
        let candidates = self.store.find_reminder_candidates(target_date).await?;
        stats.skipped_not_due = usize::try_from(active_on_date)
            .unwrap_or(0)
            .saturating_sub(candidates.len());

        tracing::info!(
            %target_date,
            candidates = candidates.len(),
            "Starting reminder pass"
        );

        for candidate in candidates {
            let booking = match self.store.claim_reminder(candidate.id, target_date).await {
                Ok(Some(booking)) => booking,
                Ok(None) => {
                    tracing::debug!(booking_id = %candidate.id, "Reminder already claimed");
                    stats.skipped_claimed += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(booking_id = %candidate.id, error = %e, "Reminder claim failed");
                    stats.failed += 1;
                    continue;
                }
            };

            let report = self.notifier.send_reminder(&booking).await;
            if !report.any_sent() {
                tracing::error!(
                    booking_id = %booking.id,
                    ?report,
                    "Reminder not delivered on any channel; manual resend required"
                );
                stats.failed += 1;
                continue;
            }
            if report.needs_attention() {
                tracing::warn!(booking_id = %booking.id, ?report, "Reminder partially delivered");
            }

            if let Err(e) = self
                .store
                .mark_reminder_sent(booking.id, self.clock.now())
                .await
            {
                tracing::error!(booking_id = %booking.id, error = %e, "Failed to record reminder time");
            }
            stats.sent += 1;
        }

        tracing::info!(?stats, "Reminder pass completed");
        Ok(stats)
    }
}

/// Cron expressions (with seconds) and delays for the three triggers.
#[derive(Debug, Clone)]
pub struct ReminderSchedule {
    pub daily_cron: String,
    pub hourly_cron: String,
    pub startup_delay: Duration,
}

fn pass_job(
    scheduler: Arc<ReminderScheduler>,
    trigger: TriggerSource,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(e) = scheduler.run_reminder_pass(trigger).await {
            tracing::error!(%trigger, error = %e, "Reminder pass failed");
        }
    })
}

/// Registers the daily (business timezone), hourly and startup triggers and
/// starts the job scheduler.
pub async fn start_reminder_jobs(
    scheduler: Arc<ReminderScheduler>,
    schedule: &ReminderSchedule,
) -> Result<JobScheduler, JobSchedulerError> {
    let jobs = JobScheduler::new().await?;

    let daily = scheduler.clone();
    jobs.add(Job::new_async_tz(
        schedule.daily_cron.as_str(),
        BUSINESS_TZ,
        move |_id, _jobs| pass_job(daily.clone(), TriggerSource::Daily),
    )?)
    .await?;

    let hourly = scheduler.clone();
    jobs.add(Job::new_async(
        schedule.hourly_cron.as_str(),
        move |_id, _jobs| pass_job(hourly.clone(), TriggerSource::Hourly),
    )?)
    .await?;

    let startup = scheduler;
    jobs.add(Job::new_one_shot_async(
        schedule.startup_delay,
        move |_id, _jobs| pass_job(startup.clone(), TriggerSource::Startup),
    )?)
    .await?;

    jobs.start().await?;

    tracing::info!(
        daily = %schedule.daily_cron,
        hourly = %schedule.hourly_cron,
        startup_delay_secs = schedule.startup_delay.as_secs(),
        "Reminder jobs scheduled"
    );

    Ok(jobs)
}
