//! Gateway: HTTP server for the Messenger webhook.
//!
//! `GET /webhook` answers the subscription handshake, `POST /webhook` takes event deliveries,
//! `GET /` is a health probe. Other methods on `/webhook` get 405.

mod server;

pub use server::{build_state, router, run_gateway, GatewayState};
