use std::{net::SocketAddr, sync::Arc};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ridebook::api::{self, AppState};
use ridebook::config::Config;
use ridebook::db;
use ridebook::jobs::{start_reminder_jobs, ReminderSchedule, ReminderScheduler};
use ridebook::services::{
    bookings::BookingService,
    calendar::{CalendarSync, NoopCalendarSync, WebhookCalendarSync},
    clock::SystemClock,
    distance::{DistanceResolver, GoogleDistanceResolver, UnconfiguredDistanceResolver},
    notifications::{
        EmailTransport, SendGridTransport, SmsTransport, TransportDispatcher, TwilioTransport,
    },
    payment_reconciler::{PaymentReconciler, PaymentSettings},
    stripe::StripeClient,
};
use ridebook::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ridebook=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ridebook server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let store = Arc::new(PgStore::new(pool.clone()));
    let clock = Arc::new(SystemClock);

    let distance: Arc<dyn DistanceResolver> = match &config.maps_api_key {
        Some(key) => Arc::new(GoogleDistanceResolver::new(&config.maps_api_url, key.clone())),
        None => {
            tracing::warn!("No maps API key configured; quotes will use the fallback distance");
            Arc::new(UnconfiguredDistanceResolver)
        }
    };

    let email: Option<Arc<dyn EmailTransport>> =
        match (&config.email_api_key, &config.email_from) {
            (Some(key), Some(from)) => Some(Arc::new(SendGridTransport::new(
                &config.email_api_url,
                key.clone(),
                from.clone(),
            ))),
            _ => None,
        };
    let sms: Option<Arc<dyn SmsTransport>> = match (
        &config.sms_account_sid,
        &config.sms_auth_token,
        &config.sms_from,
    ) {
        (Some(sid), Some(token), Some(from)) => Some(Arc::new(TwilioTransport::new(
            &config.sms_api_url,
            sid.clone(),
            token.clone(),
            from.clone(),
        ))),
        _ => None,
    };
    if email.is_none() || sms.is_none() {
        tracing::warn!(
            email = email.is_some(),
            sms = sms.is_some(),
            "Notification channel(s) not configured; they will be reported as skipped"
        );
    }
    let notifier = Arc::new(TransportDispatcher::new(
        email,
        sms,
        config.admin_email.clone(),
        config.notification_timeout(),
    ));

    let calendar: Arc<dyn CalendarSync> = match &config.calendar_webhook_url {
        Some(url) => Arc::new(WebhookCalendarSync::new(url.clone())),
        None => Arc::new(NoopCalendarSync),
    };

    // Build services
    let bookings = Arc::new(BookingService::new(
        store.clone(),
        distance,
        notifier.clone(),
        calendar.clone(),
        clock.clone(),
        config.fallback_distance_km,
    ));
    let payments = Arc::new(PaymentReconciler::new(
        store.clone(),
        store.clone(),
        Arc::new(StripeClient::new(
            &config.stripe_api_url,
            config.stripe_secret_key.clone(),
        )),
        notifier.clone(),
        calendar,
        clock.clone(),
        PaymentSettings {
            base_url: config.base_url.clone(),
            currency: config.currency.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
        },
    ));
    let reminders = Arc::new(ReminderScheduler::new(store, notifier, clock));

    // Start reminder triggers
    let mut jobs = start_reminder_jobs(
        reminders.clone(),
        &ReminderSchedule {
            daily_cron: config.reminder_daily_cron.clone(),
            hourly_cron: config.reminder_hourly_cron.clone(),
            startup_delay: config.reminder_startup_delay(),
        },
    )
    .await?;

    let app = api::app(AppState {
        bookings,
        payments,
        reminders,
        pool: Some(pool),
    });

    let host: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.port));
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown().await?;
    tracing::info!("Reminder jobs stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
