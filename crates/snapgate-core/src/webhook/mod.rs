//! Webhook delivery: signing, retry policy, transport and the dispatcher.

mod dispatcher;
mod retry;
pub mod signing;
mod transport;

pub use self::dispatcher::{
    DeliveryOutcome, HEADER_JOB_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP, WebhookDispatcher,
    WebhookPayload,
};
pub use self::retry::RetryPolicy;
pub use self::signing::{SigningError, sign, verify};
pub use self::transport::{HttpTransport, OutboundRequest, TransportError, WebhookTransport};
