//! Outbound - 送信メッセージの準備（default header の付与）
//!
//! Every message leaving this endpoint passes through `prepare`, so it always
//! carries a non-empty message id, a correlation id and a return address.

use std::sync::Arc;

use crate::domain::{BusError, Headers, TransportMessage, header_names};
use crate::ports::{Clock, IdGenerator, Transport};
use crate::typed::codec::PayloadCodec;
use crate::typed::message::Message;

pub struct Outbound {
    transport: Arc<dyn Transport>,
    codec: PayloadCodec,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Outbound {
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: PayloadCodec,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            codec,
            ids,
            clock,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Serialize `message` and assign default headers.
    ///
    /// `incoming` is the message being handled, if any; its correlation id
    /// (or, lacking one, its message id) is propagated.
    pub fn prepare<M: Message>(
        &self,
        message: &M,
        incoming: Option<&Headers>,
    ) -> Result<TransportMessage, BusError> {
        let mut outgoing = self.codec.encode(message)?;
        self.assign_default_headers(&mut outgoing.headers, incoming);
        Ok(outgoing)
    }

    fn assign_default_headers(&self, headers: &mut Headers, incoming: Option<&Headers>) {
        headers.insert_if_absent(header_names::MESSAGE_ID, || {
            self.ids.generate_message_id().to_string()
        });

        let inherited = incoming.and_then(|h| h.correlation_id().or_else(|| h.message_id()));
        let correlation_id = match inherited {
            Some(id) => id.to_string(),
            None => headers
                .message_id()
                .map(str::to_string)
                .unwrap_or_default(),
        };
        headers.insert_if_absent(header_names::CORRELATION_ID, || correlation_id);

        headers.insert_if_absent(header_names::RETURN_ADDRESS, || {
            self.transport.address().to_string()
        });
        headers.insert(header_names::SENT_TIME, self.clock.now().to_rfc3339());
    }
}
