//! Trigger dispatch adapters: each converts one external activation
//! source (inbound HTTP connections, broker deliveries, cron firings)
//! into a sequence of [`crate::executor::Executor::execute`] calls.
//!
//! An adapter owns nothing the [`crate::registry::Registry`],
//! [`crate::context::ContextPool`], and [`crate::executor::Executor`]
//! don't already provide; it only knows how to listen for its own kind of
//! event and how to shut down cleanly when asked.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "broker")]
pub mod broker;

#[cfg(feature = "cron")]
pub mod cron;
