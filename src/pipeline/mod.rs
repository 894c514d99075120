//! The relay's processing paths.
//!
//! - [`submit`] - order submission: publish, persist, observe, respond
//! - [`listener`] - inbound price updates: parse, persist, ack/nack, broadcast
//! - [`decay`] - periodic reset of latency gauges while idle

pub mod decay;
pub mod listener;
pub mod submit;

pub use decay::IdleDecay;
pub use listener::{Outcome, UpdateListener};
pub use submit::{respond, OrderReceipt, SubmissionPipeline, SubmitReply};
