//! Call-side runtime for dialflow.
//!
//! One [`runtime::ConversationExecutor`] drives one connected call through the
//! Greeting, Discovery, Pitch and Close phases defined in `dialflow_core::flows`:
//! - caller audio arrives through a [`channel::CallerChannel`]
//! - phase actions run through the [`tools::ToolRegistry`]
//! - ambient audio plays through a [`ambient::SuspensionHook`] while the agent waits
//!
//! [`dialer::LocalCallDialer`] places calls in-process, which is how the CLI simulates
//! a submission end to end.

pub mod ambient;
pub mod channel;
pub mod dialer;
pub mod runtime;
pub mod tools;
