//! Domain model (IDs, headers, envelopes, errors).

pub mod envelope;
pub mod errors;
pub mod headers;
pub mod ids;

pub use envelope::{OutgoingMessage, TransportMessage};
pub use errors::{BoxError, BusError, ConfigError, ErrorKind};
pub use headers::{Headers, names as header_names};
pub use ids::{Id, IdMarker, MessageId, SagaId};
