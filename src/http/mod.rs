//! HTTP wire concerns: headers, request serialization, response parsing,
//! and the protocol exchange state machine.

pub mod exchange;
pub mod headers;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use exchange::{EventSink, Exchange, HttpExchange, StepOutcome};
pub use headers::HeaderMap;
pub use request::RequestBody;
pub use response::{BodyFraming, ResponseHead};
