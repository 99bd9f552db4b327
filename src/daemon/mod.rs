//! Service side: cleanup orchestrator, service loop, signal handling, and
//! multi-channel notifications.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod notifications;
pub mod orchestrator;
#[cfg(feature = "daemon")]
pub mod signals;
