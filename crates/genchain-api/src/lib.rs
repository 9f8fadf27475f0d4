//! Webhook receiver for genchain.
//!
//! The remote services post completion notifications here; each one is
//! translated into a [`genchain_core::Notification`] and handed to the
//! scheduler's dispatcher.

pub mod error;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::WebhookState;
