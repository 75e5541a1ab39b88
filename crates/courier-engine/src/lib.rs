//! # Courier Engine
//!
//! The moving parts around the store: the submission [`Manager`], the
//! in-process [`Scheduler`], lease-based [`LeaderElector`] and terminal
//! webhook dispatch.
//!
//! Gateway calls and webhook transport sit behind [`AttemptExecutor`] and
//! [`WebhookSender`] so the node binary can plug in HTTP implementations.

pub mod election;
pub mod executor;
pub mod leadership;
pub mod manager;
pub mod metrics;
pub mod scheduler;
pub mod webhook;

#[cfg(test)]
mod test_support;

pub use election::{ElectionConfig, LeaderElector};
pub use executor::{AttemptExecutor, ExecRequest};
pub use leadership::{LeadershipEnd, LeaseLost};
pub use manager::{Manager, ManagerConfig};
pub use scheduler::{AttemptRunner, Scheduler};
pub use webhook::{WebhookDelivery, WebhookEvent, WebhookSender};
