//! Outbound role: dial one game server, authenticate with a token, keep
//! reconnecting on a fixed interval. Also carries the REST status client.

pub mod client;
pub mod error;
pub mod poller;
pub mod rest;
pub mod state;

pub use {
    client::{BridgeClient, MessageHandler},
    error::{ClientError, Result},
    poller::spawn_status_poller,
    rest::{RestClient, RestError},
    state::{ClientState, ReconnectOutcome},
};
