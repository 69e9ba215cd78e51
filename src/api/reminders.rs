use axum::{extract::State, routing::post, Json, Router};

use crate::api::state::AppState;
use crate::error::Result;
use crate::jobs::{ReminderRunStats, TriggerSource};

/// Operator-triggered pass; same dedup routine as the scheduled triggers.
async fn run_reminders(State(state): State<AppState>) -> Result<Json<ReminderRunStats>> {
    let stats = state
        .reminders
        .run_reminder_pass(TriggerSource::Manual)
        .await?;
    Ok(Json(stats))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/reminders/run", post(run_reminders))
}
