// Jobs module - Time-driven background work

pub mod reminder_scheduler;

pub use reminder_scheduler::{
    start_reminder_jobs, ReminderRunStats, ReminderSchedule, ReminderScheduler, TriggerSource,
};
