// The downward seam between a call and the channel stack.
//
// A call talks to the stack through exactly one shape of request: a combined
// `TransportOp` that may carry send content, a receive request, and a cancel
// at once. The stack answers asynchronously through `Call::on_done_send` and
// `Call::on_done_recv`.

pub mod mock;

use bytes::Bytes;

use crate::call::Call;
use crate::completion::Pollset;
use crate::metadata::MetadataBatch;
use crate::status::StatusCode;

/// Wire-level unit passed through the channel stack.
#[derive(Debug, Clone)]
pub enum StreamOp {
    /// A metadata frame (initial or trailing).
    Metadata(MetadataBatch),
    /// Start of a message with its declared length.
    BeginMessage { length: usize, flags: u32 },
    /// A chunk of message payload.
    Slice(Bytes),
}

/// Transport-reported progress of the underlying stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    SendClosed,
    RecvClosed,
    Closed,
}

/// One combined request handed to the top of the channel stack.
#[derive(Debug, Clone, Default)]
pub struct TransportOp {
    /// Outbound stream ops, in wire order. Empty means no send content.
    pub send_ops: Vec<StreamOp>,
    /// Marks the send content above as the final write on this stream.
    pub is_last_send: bool,
    /// Asks the stack to deliver the next inbound batch via `on_done_recv`.
    pub request_recv: bool,
    /// Aborts the stream with the given status.
    pub cancel_with_status: Option<StatusCode>,
    /// Readiness set of the submitting completion queue.
    pub bind_pollset: Option<Pollset>,
}

impl TransportOp {
    pub fn has_send_content(&self) -> bool {
        !self.send_ops.is_empty() || self.is_last_send
    }
}

/// The top filter of a channel stack.
///
/// Implementations must tolerate reentrancy: acknowledging a send or
/// delivering a receive from inside `start_transport_op` is allowed, and the
/// call may push another transport op from inside that acknowledgement.
pub trait Transport: Send + Sync {
    /// Binds a newly created call to the stream layer. Server calls pass the
    /// initial receive op issued at birth.
    fn init_call(&self, call: &Call, initial_op: Option<TransportOp>);

    /// Dispatches one combined op down the stack.
    fn start_transport_op(&self, call: &Call, op: TransportOp);
}
