// A scriptable in-process transport.
//
// Records every op a call dispatches and lets a driver feed inbound batches,
// either ahead of time (queued until the call asks for data) or after the
// call has requested a receive (delivered immediately). Send content is
// acknowledged inline unless deferred acks are enabled.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::call::Call;
use crate::status::StatusCode;
use crate::transport::{StreamOp, StreamState, Transport, TransportOp};

/// One inbound delivery: a batch of stream ops plus the stream state the
/// transport observed after producing them.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    pub ops: Vec<StreamOp>,
    pub state: StreamState,
    pub success: bool,
}

#[derive(Default)]
struct MockInner {
    call: Option<Call>,
    ops: Vec<TransportOp>,
    recv_wanted: bool,
    pending_inbound: VecDeque<InboundBatch>,
    defer_send_acks: bool,
    pending_send_acks: usize,
}

#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The call bound to this transport. Panics if no call was created yet.
    pub fn call(&self) -> Call {
        self.inner
            .lock()
            .call
            .clone()
            .expect("no call bound to mock transport")
    }

    /// Every op dispatched so far, in order.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.inner.lock().ops.clone()
    }

    /// The cancel codes dispatched so far, in order.
    pub fn cancels(&self) -> Vec<StatusCode> {
        self.inner
            .lock()
            .ops
            .iter()
            .filter_map(|op| op.cancel_with_status)
            .collect()
    }

    /// Ops that carried send content, in order.
    pub fn sends(&self) -> Vec<TransportOp> {
        self.inner
            .lock()
            .ops
            .iter()
            .filter(|op| op.has_send_content())
            .cloned()
            .collect()
    }

    /// Whether the call currently has a receive outstanding with no inbound
    /// data queued to satisfy it.
    pub fn recv_wanted(&self) -> bool {
        self.inner.lock().recv_wanted
    }

    /// Stops acknowledging send content inline; the driver must call
    /// `ack_send` for each op with send content.
    pub fn defer_send_acks(&self) {
        self.inner.lock().defer_send_acks = true;
    }

    /// Acknowledges one deferred send.
    pub fn ack_send(&self, success: bool) {
        let call = {
            let mut inner = self.inner.lock();
            assert!(inner.pending_send_acks > 0, "no deferred send to ack");
            inner.pending_send_acks -= 1;
            inner.call.clone()
        };
        if let Some(call) = call {
            call.on_done_send(success);
        }
    }

    /// Feeds one inbound batch. Delivered immediately if the call has a
    /// receive outstanding, queued otherwise.
    pub fn deliver(&self, ops: Vec<StreamOp>, state: StreamState, success: bool) {
        let batch = InboundBatch { ops, state, success };
        let delivery = {
            let mut inner = self.inner.lock();
            if inner.recv_wanted {
                inner.recv_wanted = false;
                inner.call.clone().map(|call| (call, batch))
            } else {
                inner.pending_inbound.push_back(batch);
                None
            }
        };
        if let Some((call, batch)) = delivery {
            call.on_done_recv(batch.ops, batch.state, batch.success);
        }
    }
}

impl Transport for MockTransport {
    fn init_call(&self, call: &Call, initial_op: Option<TransportOp>) {
        self.inner.lock().call = Some(call.clone());
        if let Some(op) = initial_op {
            self.start_transport_op(call, op);
        }
    }

    fn start_transport_op(&self, call: &Call, op: TransportOp) {
        // Decide under the lock, act outside it: the call reenters this
        // transport from inside on_done_send/on_done_recv.
        let mut ack_send = false;
        let mut delivery: Option<InboundBatch> = None;
        {
            let mut inner = self.inner.lock();
            if op.has_send_content() {
                if inner.defer_send_acks {
                    inner.pending_send_acks += 1;
                } else {
                    ack_send = true;
                }
            }
            if op.request_recv {
                match inner.pending_inbound.pop_front() {
                    Some(batch) => delivery = Some(batch),
                    None => inner.recv_wanted = true,
                }
            }
            inner.ops.push(op);
        }
        if ack_send {
            call.on_done_send(true);
        }
        if let Some(batch) = delivery {
            call.on_done_recv(batch.ops, batch.state, batch.success);
        }
    }
}
