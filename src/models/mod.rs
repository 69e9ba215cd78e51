// Models module - Persisted records and their value types

pub mod booking;
pub mod payment_transaction;

pub use booking::{
    Booking, BookingEdit, BookingRequest, BookingStatus, NewBookingRecord, PaymentMethod,
    PaymentStatus, ReturnTrip, ServiceType, TripDetails,
};
pub use payment_transaction::{CreatePaymentTransactionData, PaymentTransaction};
