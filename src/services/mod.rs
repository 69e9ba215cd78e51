// Services module - Business logic and outbound adapters

pub mod bookings;
pub mod calendar;
pub mod clock;
pub mod distance;
pub mod lifecycle;
pub mod notifications;
pub mod payment_reconciler;
pub mod pricing;
pub mod stripe;
