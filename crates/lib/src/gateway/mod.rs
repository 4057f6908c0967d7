//! Gateway: HTTP front door over the dispatcher.
//!
//! Single port. `GET /` health, `GET /status`, `POST /send` (send, optionally wait for a
//! reply), `POST /email`. Every send answers with a result envelope.

mod protocol;
mod server;

pub use protocol::{EmailParams, ErrorBody, Health, SendParams};
pub use server::{router, run_gateway, run_gateway_with, GatewayState};
