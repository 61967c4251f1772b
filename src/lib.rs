//! sentry_portal: account portal for a defence-community cyber-incident service.
//! Sign-up with role identifiers, session-gated views, evidence metadata and a
//! placeholder attack predictor, served over axum.

pub mod config;
pub mod error;
pub mod evidence;
pub mod flight;
pub mod gate;
pub mod identity;
pub mod notice;
pub mod predictor;
pub mod server;
pub mod signup;
pub mod store;
