//! Google Cloud Pub/Sub client.
//!
//! This module contains:
//!
//! - [`pubsub`] - REST client implementing [`Transport`](crate::transport::Transport)
//! - [`auth`] - service account JWT signing and access token caching

pub mod auth;
pub mod pubsub;

pub use auth::{ServiceAccountKey, Signer, TokenProvider};
pub use pubsub::PubSubClient;
