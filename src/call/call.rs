// The per-invocation call state machine.
//
// All mutable state lives behind one mutex. Work is pumped by `unlock`: every
// path that mutates state under the lock funnels through it, and it decides
// whether a combined transport op must be dispatched and which staged
// completions can be delivered. Outward calls (transport dispatch, completion
// callbacks) always happen with the lock released.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use crate::alarm::Alarm;
use crate::buffer::ByteBufferQueue;
use crate::call::assembler::{AssembleOutcome, MessageAssembler};
use crate::call::ioreq::{
    CompletedRequest, CompletionFn, IoreqOp, Master, OpSet, RefTag, RequestData, RequestSlot,
    OP_COUNT,
};
use crate::call::state::{ReadState, WriteState};
use crate::channel::Channel;
use crate::completion::CompletionQueue;
use crate::error::{Result, RpcError};
use crate::metadata::{MdElem, Metadata, MetadataArray, MetadataBatch};
use crate::status::{OpStatus, StatusCode};
use crate::transport::{StreamOp, StreamState, TransportOp};

/// Where a status came from. Earlier sources override later ones, so the
/// application layer can always outrank the core, and the core the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusSource {
    ApiOverride = 0,
    Core = 1,
    Wire = 2,
}

pub(crate) const STATUS_SOURCE_COUNT: usize = 3;

impl StatusSource {
    pub(crate) const ALL: [StatusSource; STATUS_SOURCE_COUNT] =
        [StatusSource::ApiOverride, StatusSource::Core, StatusSource::Wire];

    fn index(self) -> usize {
        self as usize
    }
}

/// Status reported by one source.
struct ReceivedStatus {
    is_set: bool,
    code: StatusCode,
    details: Option<Bytes>,
}

impl Default for ReceivedStatus {
    fn default() -> Self {
        Self {
            is_set: false,
            code: StatusCode::Ok,
            details: None,
        }
    }
}

/// Everything the call mutex protects.
struct CallState {
    cq: Arc<CompletionQueue>,
    read_state: ReadState,
    write_state: WriteState,
    /// A send-side transport op is in flight.
    sending: bool,
    /// A recv-side transport op is in flight.
    receiving: bool,
    /// A completion drain is in progress.
    completing: bool,
    /// Send ioreqs folded into the in-flight send op.
    last_send_contains: OpSet,
    request_set: [RequestSlot; OP_COUNT],
    request_data: [Option<RequestData>; OP_COUNT],
    masters: [Master; OP_COUNT],
    /// Completions staged under the lock, drained outside it.
    completed_requests: Vec<CompletedRequest>,
    incoming_queue: ByteBufferQueue,
    assembler: MessageAssembler,
    /// Element 0 buffers initial metadata, element 1 trailing metadata.
    buffered_metadata: [MetadataArray; 2],
    status: [ReceivedStatus; STATUS_SOURCE_COUNT],
    alarm: Option<Alarm>,
    /// Metadata to send ahead of user initial metadata, drained on first send.
    send_initial_metadata: Vec<MdElem>,
    send_deadline: Option<Instant>,
}

impl CallState {
    /// An op is live when it is pending and has not completed within its
    /// group yet.
    fn is_op_live(&self, op: IoreqOp) -> bool {
        match self.request_set[op.index()] {
            RequestSlot::Pending(group) => !self.masters[group.index()].complete.contains(op),
            _ => false,
        }
    }
}

struct CallInner {
    channel: Arc<Channel>,
    is_client: bool,
    server_transport_data: Option<u64>,
    /// Count of concurrent activities keeping the call busy; diagnostic
    /// companion to the tags logged on every ref/unref.
    activity: AtomicUsize,
    state: Mutex<CallState>,
}

/// Handle to one RPC invocation. Cheap to clone; the underlying call lives
/// until the user handle is destroyed and every internal activity has
/// drained.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    pub(crate) fn create(
        channel: &Arc<Channel>,
        cq: Arc<CompletionQueue>,
        server_transport_data: Option<u64>,
        prepend_metadata: Vec<Metadata>,
        deadline: Option<Instant>,
    ) -> Call {
        let is_client = server_transport_data.is_none();
        let mut request_set = [RequestSlot::Empty; OP_COUNT];
        if is_client {
            // A client never sends trailing metadata or a status; those
            // slots are born retired.
            request_set[IoreqOp::SendTrailingMetadata.index()] = RequestSlot::Done;
            request_set[IoreqOp::SendStatus.index()] = RequestSlot::Done;
        }
        let mdctx = channel.metadata_context();
        let send_initial_metadata = prepend_metadata
            .into_iter()
            .map(|md| MdElem::new(mdctx.intern_key(&md.key), md.value))
            .collect();
        let state = CallState {
            cq,
            read_state: ReadState::Initial,
            write_state: WriteState::Initial,
            sending: false,
            receiving: !is_client,
            completing: false,
            last_send_contains: OpSet::default(),
            request_set,
            request_data: std::array::from_fn(|_| None),
            masters: std::array::from_fn(|_| Master::default()),
            completed_requests: Vec::new(),
            incoming_queue: ByteBufferQueue::default(),
            assembler: MessageAssembler::default(),
            buffered_metadata: [MetadataArray::default(), MetadataArray::default()],
            status: std::array::from_fn(|_| ReceivedStatus::default()),
            alarm: None,
            send_initial_metadata,
            send_deadline: deadline,
        };
        let call = Call {
            inner: Arc::new(CallInner {
                channel: channel.clone(),
                is_client,
                server_transport_data,
                activity: AtomicUsize::new(1),
                state: Mutex::new(state),
            }),
        };
        // Server calls start receiving at birth so initial metadata can
        // arrive before the application asks for anything.
        let initial_op = if is_client {
            None
        } else {
            call.internal_ref(RefTag::Receiving);
            Some(TransportOp {
                request_recv: true,
                ..TransportOp::default()
            })
        };
        channel.transport().init_call(&call, initial_op);
        if let Some(deadline) = deadline {
            let mut state = call.lock();
            call.set_deadline_alarm(&mut state, deadline);
        }
        call
    }

    pub fn is_client(&self) -> bool {
        self.inner.is_client
    }

    /// The stream handle a server call was created for.
    pub fn server_transport_data(&self) -> Option<u64> {
        self.inner.server_transport_data
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.inner.channel
    }

    pub fn set_completion_queue(&self, cq: Arc<CompletionQueue>) {
        self.lock().cq = cq;
    }

    pub fn completion_queue(&self) -> Arc<CompletionQueue> {
        self.lock().cq.clone()
    }

    /// Cancels the call with the default cancellation status.
    pub fn cancel(&self) {
        self.cancel_with_status(StatusCode::Cancelled, "Cancelled");
    }

    /// Cancels the call: records an application-override status and pushes a
    /// cancel op down the stack. Pending ioreqs unwind as the transport
    /// reports the aborted stream.
    pub fn cancel_with_status(&self, code: StatusCode, description: &str) {
        let op = TransportOp {
            cancel_with_status: Some(code),
            ..TransportOp::default()
        };
        let mut state = self.lock();
        self.set_status_code(&mut state, StatusSource::ApiOverride, code);
        self.set_status_details(
            &mut state,
            StatusSource::ApiOverride,
            Bytes::copy_from_slice(description.as_bytes()),
        );
        self.unlock(state);
        self.execute_op(op);
    }

    /// Releases the user's handle. A stream that is not fully closed is
    /// cancelled so the transport can unwind outstanding work.
    pub fn destroy(self) {
        let mut state = self.lock();
        if let Some(alarm) = state.alarm.take() {
            alarm.cancel();
        }
        let cancel = state.read_state != ReadState::StreamClosed;
        self.unlock(state);
        if cancel {
            self.cancel();
        }
        self.internal_unref(RefTag::Destroy);
    }

    // ------------------------------------------------------------------
    // IOReq engine
    // ------------------------------------------------------------------

    /// Records a group of ioreqs and fires `on_complete` once all of them
    /// have resolved. The first request's op anchors the group.
    pub(crate) fn start_ioreq_and_call_back(
        &self,
        reqs: Vec<RequestData>,
        on_complete: CompletionFn,
    ) -> Result<()> {
        let mut state = self.lock();
        let result = self.start_ioreq(&mut state, reqs, on_complete);
        self.unlock(state);
        result
    }

    fn start_ioreq(
        &self,
        state: &mut CallState,
        reqs: Vec<RequestData>,
        on_complete: CompletionFn,
    ) -> Result<()> {
        let anchor = match reqs.first() {
            Some(first) => first.op(),
            None => return Ok(()),
        };
        let mut have = OpSet::default();
        for req in reqs {
            let op = req.op();
            match state.request_set[op.index()] {
                RequestSlot::Pending(_) => {
                    return Err(self.start_ioreq_error(state, have, RpcError::TooManyOperations));
                }
                RequestSlot::Done => {
                    return Err(self.start_ioreq_error(state, have, RpcError::AlreadyInvoked));
                }
                RequestSlot::Empty => {}
            }
            have.insert(op);
            state.request_data[op.index()] = Some(req);
            state.request_set[op.index()] = RequestSlot::Pending(anchor);
        }

        let master = &mut state.masters[anchor.index()];
        master.status = OpStatus::Ok;
        master.need = have;
        master.complete = OpSet::default();
        master.on_complete = Some(on_complete);

        // Satisfy recv ops already answerable from buffered state and fail
        // send ops impossible in the current write state.
        self.finish_read_ops(state);
        self.early_out_write_ops(state);

        Ok(())
    }

    /// Rolls back the slots this submission touched before reporting `err`.
    fn start_ioreq_error(&self, state: &mut CallState, mutated: OpSet, err: RpcError) -> RpcError {
        for op in IoreqOp::ALL {
            if mutated.contains(op) {
                state.request_set[op.index()] = RequestSlot::Empty;
                state.request_data[op.index()] = None;
            }
        }
        err
    }

    fn finish_ioreq_op(&self, state: &mut CallState, op: IoreqOp, status: OpStatus) {
        if state.is_op_live(op) {
            self.finish_live_ioreq_op(state, op, status);
        }
    }

    fn finish_live_ioreq_op(&self, state: &mut CallState, op: IoreqOp, status: OpStatus) {
        let group = match state.request_set[op.index()] {
            RequestSlot::Pending(group) => group,
            _ => return,
        };
        let finalize = {
            let master = &mut state.masters[group.index()];
            master.complete.insert(op);
            if !status.is_ok() {
                master.status = OpStatus::Error;
            }
            master.complete == master.need
        };
        if !finalize {
            return;
        }

        let group_status = state.masters[group.index()].status;
        let on_complete = state.masters[group.index()].on_complete.take();
        for member in IoreqOp::ALL {
            if state.request_set[member.index()] != RequestSlot::Pending(group) {
                continue;
            }
            state.request_set[member.index()] = RequestSlot::Done;
            let data = state.request_data[member.index()].take();
            match member {
                IoreqOp::SendMessage | IoreqOp::RecvMessage => {
                    if group_status.is_ok() {
                        // Message ops are repeatable; the slot reopens.
                        state.request_set[member.index()] = RequestSlot::Empty;
                    } else {
                        state.write_state.advance_to(WriteState::WriteClosed);
                    }
                }
                IoreqOp::RecvStatus => {
                    if let Some(RequestData::RecvStatus(sink)) = data {
                        sink.deliver(self.final_status(state));
                    }
                }
                IoreqOp::RecvStatusDetails => {
                    if let Some(RequestData::RecvStatusDetails(sink)) = data {
                        *sink.lock() = self.final_details(state);
                    }
                }
                IoreqOp::RecvInitialMetadata => {
                    if let Some(RequestData::RecvInitialMetadata(sink)) = data {
                        std::mem::swap(&mut *sink.lock(), &mut state.buffered_metadata[0]);
                    }
                }
                IoreqOp::RecvTrailingMetadata => {
                    if let Some(RequestData::RecvTrailingMetadata(sink)) = data {
                        std::mem::swap(&mut *sink.lock(), &mut state.buffered_metadata[1]);
                    }
                }
                _ => {}
            }
        }
        let on_complete = on_complete.unwrap_or_else(|| Box::new(|_, _| {}));
        state.completed_requests.push(CompletedRequest {
            status: group_status,
            on_complete,
        });
    }

    // ------------------------------------------------------------------
    // Status aggregation
    // ------------------------------------------------------------------

    fn set_status_code(&self, state: &mut CallState, source: StatusSource, code: StatusCode) {
        let record = &mut state.status[source.index()];
        record.is_set = true;
        record.code = code;

        // Buffered inbound messages are undeliverable once the call has
        // failed: clients flush on cancellation, servers on any non-OK.
        let flush = if self.inner.is_client {
            code == StatusCode::Cancelled
        } else {
            !code.is_ok()
        };
        if flush && !state.incoming_queue.is_empty() {
            tracing::debug!(code = ?code, "flushing inbound message queue");
            state.incoming_queue.flush();
        }
    }

    fn set_status_details(&self, state: &mut CallState, source: StatusSource, details: Bytes) {
        state.status[source.index()].details = Some(details);
    }

    fn final_status(&self, state: &CallState) -> StatusCode {
        for source in StatusSource::ALL {
            let record = &state.status[source.index()];
            if record.is_set {
                return record.code;
            }
        }
        if self.inner.is_client {
            StatusCode::Unknown
        } else {
            StatusCode::Ok
        }
    }

    fn final_details(&self, state: &CallState) -> String {
        for source in StatusSource::ALL {
            if let Some(details) = &state.status[source.index()].details {
                return String::from_utf8_lossy(details).into_owned();
            }
        }
        String::new()
    }

    // ------------------------------------------------------------------
    // Lock / unlock work pump
    // ------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, CallState> {
        self.inner.state.lock()
    }

    fn need_more_data(&self, state: &CallState) -> bool {
        state.is_op_live(IoreqOp::RecvInitialMetadata)
            || state.is_op_live(IoreqOp::RecvMessage)
            || state.is_op_live(IoreqOp::RecvTrailingMetadata)
            || state.is_op_live(IoreqOp::RecvStatus)
            || state.is_op_live(IoreqOp::RecvStatusDetails)
            || (state.is_op_live(IoreqOp::RecvClose) && state.incoming_queue.is_empty())
            || (state.write_state == WriteState::Initial
                && !self.inner.is_client
                && state.read_state != ReadState::StreamClosed)
    }

    /// Releases the lock after examining outstanding work. At most one send
    /// op, one recv op, and one completion drain run concurrently; each pass
    /// that starts outward work takes a tagged reference first.
    ///
    /// Completion callbacks may submit new batches, which stage further
    /// completions; the explicit loop picks those up without recursing.
    fn unlock(&self, guard: MutexGuard<'_, CallState>) {
        let mut guard = guard;
        loop {
            let mut op = TransportOp::default();
            let mut start_op = false;

            if !guard.receiving && self.need_more_data(&guard) {
                op.request_recv = true;
                guard.receiving = true;
                self.internal_ref(RefTag::Receiving);
                start_op = true;
            }
            if !guard.sending && self.fill_send_ops(&mut guard, &mut op) {
                guard.sending = true;
                self.internal_ref(RefTag::Sending);
                start_op = true;
            }
            let completions = if !guard.completing && !guard.completed_requests.is_empty() {
                guard.completing = true;
                self.internal_ref(RefTag::Completing);
                std::mem::take(&mut guard.completed_requests)
            } else {
                Vec::new()
            };

            drop(guard);

            if start_op {
                self.execute_op(op);
            }
            if completions.is_empty() {
                return;
            }
            for completed in completions {
                (completed.on_complete)(self, completed.status);
            }
            let mut next = self.lock();
            next.completing = false;
            self.internal_unref(RefTag::Completing);
            guard = next;
        }
    }

    fn execute_op(&self, op: TransportOp) {
        self.inner.channel.transport().start_transport_op(self, op);
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Folds every currently sendable ioreq into `op`. Returns whether any
    /// content was produced.
    fn fill_send_ops(&self, state: &mut CallState, op: &mut TransportOp) -> bool {
        let mut produced = false;

        if state.write_state == WriteState::Initial
            && state.is_op_live(IoreqOp::SendInitialMetadata)
        {
            let user_md = match &state.request_data[IoreqOp::SendInitialMetadata.index()] {
                Some(RequestData::SendInitialMetadata(md)) => md.clone(),
                _ => Vec::new(),
            };
            let mdctx = self.inner.channel.metadata_context();
            let mut batch = MetadataBatch {
                list: Vec::new(),
                deadline: state.send_deadline,
            };
            batch.list.append(&mut state.send_initial_metadata);
            for md in user_md {
                batch.list.push(MdElem::new(mdctx.intern_key(&md.key), md.value));
            }
            op.send_ops.push(StreamOp::Metadata(batch));
            op.bind_pollset = Some(state.cq.pollset());
            state.last_send_contains.insert(IoreqOp::SendInitialMetadata);
            state.write_state = WriteState::Started;
            produced = true;
        }

        if state.write_state == WriteState::Started {
            if state.is_op_live(IoreqOp::SendMessage) {
                if let Some(RequestData::SendMessage(message)) =
                    &state.request_data[IoreqOp::SendMessage.index()]
                {
                    op.send_ops.push(StreamOp::BeginMessage {
                        length: message.length(),
                        flags: 0,
                    });
                    for slice in message.slices() {
                        op.send_ops.push(StreamOp::Slice(slice.clone()));
                    }
                }
                state.last_send_contains.insert(IoreqOp::SendMessage);
                produced = true;
            }
            if state.is_op_live(IoreqOp::SendClose) {
                op.is_last_send = true;
                state.last_send_contains.insert(IoreqOp::SendClose);
                state.write_state = WriteState::WriteClosed;
                produced = true;
                if !self.inner.is_client {
                    // Trailing metadata carries the user's headers plus the
                    // status pair.
                    let trailing = match &state.request_data[IoreqOp::SendTrailingMetadata.index()]
                    {
                        Some(RequestData::SendTrailingMetadata(md)) => md.clone(),
                        _ => Vec::new(),
                    };
                    let (code, details) = match &state.request_data[IoreqOp::SendStatus.index()] {
                        Some(RequestData::SendStatus { code, details }) => (*code, details.clone()),
                        _ => (StatusCode::Ok, None),
                    };
                    let mdctx = self.inner.channel.metadata_context();
                    let mut batch = MetadataBatch::default();
                    for md in trailing {
                        batch.list.push(MdElem::new(mdctx.intern_key(&md.key), md.value));
                    }
                    batch.list.push(MdElem::new(
                        self.inner.channel.status_key().clone(),
                        Bytes::from(code.encode()),
                    ));
                    if let Some(details) = details {
                        batch.list.push(MdElem::new(
                            self.inner.channel.message_key().clone(),
                            Bytes::from(details),
                        ));
                    }
                    op.send_ops.push(StreamOp::Metadata(batch));
                }
            }
        }

        produced
    }

    /// Transport acknowledgement of the in-flight send op.
    pub fn on_done_send(&self, success: bool) {
        let status = OpStatus::from_success(success);
        let mut state = self.lock();
        if state.last_send_contains.contains(IoreqOp::SendInitialMetadata) {
            self.finish_ioreq_op(&mut state, IoreqOp::SendInitialMetadata, status);
        }
        if state.last_send_contains.contains(IoreqOp::SendMessage) {
            self.finish_ioreq_op(&mut state, IoreqOp::SendMessage, status);
        }
        if state.last_send_contains.contains(IoreqOp::SendClose) {
            self.finish_ioreq_op(&mut state, IoreqOp::SendTrailingMetadata, status);
            self.finish_ioreq_op(&mut state, IoreqOp::SendStatus, status);
            self.finish_ioreq_op(&mut state, IoreqOp::SendClose, OpStatus::Ok);
        }
        state.last_send_contains.clear();
        state.sending = false;
        self.unlock(state);
        self.internal_unref(RefTag::Sending);
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Transport delivery of one inbound batch together with the stream
    /// state it observed after producing it.
    pub fn on_done_recv(&self, ops: Vec<StreamOp>, recv_state: StreamState, success: bool) {
        let mut state = self.lock();
        state.receiving = false;
        let mut framing_cancel: Option<StatusCode> = None;
        if success {
            for stream_op in ops {
                let outcome = match stream_op {
                    StreamOp::Metadata(batch) => {
                        self.route_metadata(&mut state, batch);
                        continue;
                    }
                    StreamOp::BeginMessage { length, .. } => state
                        .assembler
                        .begin_message(length, self.inner.channel.max_message_length()),
                    StreamOp::Slice(slice) => state.assembler.add_slice(slice),
                };
                match outcome {
                    AssembleOutcome::Finished(buffer) => state.incoming_queue.push(buffer),
                    AssembleOutcome::Violation { code, detail } => {
                        tracing::warn!(detail = %detail, "inbound framing violation; cancelling call");
                        self.set_status_code(&mut state, StatusSource::ApiOverride, code);
                        self.set_status_details(
                            &mut state,
                            StatusSource::ApiOverride,
                            Bytes::from(detail),
                        );
                        framing_cancel = Some(code);
                        break;
                    }
                    AssembleOutcome::Incomplete => {}
                }
            }
            if recv_state == StreamState::RecvClosed {
                state.read_state.advance_to(ReadState::ReadClosed);
            }
            if recv_state == StreamState::Closed {
                state.read_state.advance_to(ReadState::StreamClosed);
                if let Some(alarm) = state.alarm.take() {
                    alarm.cancel();
                }
            }
            self.finish_read_ops(&mut state);
        } else {
            for op in [
                IoreqOp::RecvMessage,
                IoreqOp::RecvStatus,
                IoreqOp::RecvClose,
                IoreqOp::RecvTrailingMetadata,
                IoreqOp::RecvInitialMetadata,
                IoreqOp::RecvStatusDetails,
            ] {
                self.finish_ioreq_op(&mut state, op, OpStatus::Error);
            }
        }
        self.unlock(state);
        if let Some(code) = framing_cancel {
            let op = TransportOp {
                cancel_with_status: Some(code),
                ..TransportOp::default()
            };
            self.execute_op(op);
        }
        self.internal_unref(RefTag::Receiving);
    }

    /// Classifies one received metadata batch: status headers feed the wire
    /// status source, everything else lands in the right buffered array.
    fn route_metadata(&self, state: &mut CallState, batch: MetadataBatch) {
        let is_trailing = state.read_state >= ReadState::GotInitialMetadata;
        for elem in &batch.list {
            if elem.key() == self.inner.channel.status_key() {
                let code = elem.decode_status();
                self.set_status_code(state, StatusSource::Wire, code);
            } else if elem.key() == self.inner.channel.message_key() {
                self.set_status_details(state, StatusSource::Wire, elem.value().clone());
            } else {
                let dest = &mut state.buffered_metadata[if is_trailing { 1 } else { 0 }];
                dest.push(elem.to_metadata());
            }
        }
        if let Some(deadline) = batch.deadline {
            self.set_deadline_alarm(state, deadline);
        }
        if !is_trailing {
            state.read_state.advance_to(ReadState::GotInitialMetadata);
        }
    }

    /// Opportunistically completes recv ioreqs answerable from buffered
    /// state, in read-state order.
    fn finish_read_ops(&self, state: &mut CallState) {
        let mut empty;
        if state.is_op_live(IoreqOp::RecvMessage) {
            let sink = match &state.request_data[IoreqOp::RecvMessage.index()] {
                Some(RequestData::RecvMessage(sink)) => Some(sink.clone()),
                _ => None,
            };
            let popped = state.incoming_queue.pop();
            let got_one = popped.is_some();
            if let Some(sink) = sink {
                *sink.lock() = popped;
            }
            if got_one {
                self.finish_live_ioreq_op(state, IoreqOp::RecvMessage, OpStatus::Ok);
                empty = state.incoming_queue.is_empty();
            } else {
                empty = true;
            }
        } else {
            empty = state.incoming_queue.is_empty();
        }

        let read_state = state.read_state;
        if read_state >= ReadState::StreamClosed && empty {
            self.finish_ioreq_op(state, IoreqOp::RecvClose, OpStatus::Ok);
        }
        if read_state >= ReadState::ReadClosed {
            if empty {
                // No more messages will arrive: complete a waiting receive
                // with an empty delivery.
                self.finish_ioreq_op(state, IoreqOp::RecvMessage, OpStatus::Ok);
            }
            self.finish_ioreq_op(state, IoreqOp::RecvStatus, OpStatus::Ok);
            self.finish_ioreq_op(state, IoreqOp::RecvStatusDetails, OpStatus::Ok);
            self.finish_ioreq_op(state, IoreqOp::RecvTrailingMetadata, OpStatus::Ok);
        }
        if read_state >= ReadState::GotInitialMetadata {
            self.finish_ioreq_op(state, IoreqOp::RecvInitialMetadata, OpStatus::Ok);
        }
    }

    /// Fails send ioreqs that can no longer make progress in the current
    /// write state.
    fn early_out_write_ops(&self, state: &mut CallState) {
        let write_state = state.write_state;
        if write_state >= WriteState::WriteClosed {
            self.finish_ioreq_op(state, IoreqOp::SendMessage, OpStatus::Error);
            self.finish_ioreq_op(state, IoreqOp::SendStatus, OpStatus::Error);
            self.finish_ioreq_op(state, IoreqOp::SendTrailingMetadata, OpStatus::Error);
            self.finish_ioreq_op(state, IoreqOp::SendClose, OpStatus::Ok);
        }
        if write_state >= WriteState::Started {
            self.finish_ioreq_op(state, IoreqOp::SendInitialMetadata, OpStatus::Error);
        }
    }

    // ------------------------------------------------------------------
    // Deadline handling
    // ------------------------------------------------------------------

    fn set_deadline_alarm(&self, state: &mut CallState, deadline: Instant) {
        if state.alarm.is_some() {
            tracing::error!("attempt to set deadline alarm twice");
            return;
        }
        self.internal_ref(RefTag::Alarm);
        let call = self.clone();
        state.alarm = Some(Alarm::new(deadline, move |fired| {
            if fired {
                if call.is_client() {
                    call.cancel_with_status(StatusCode::DeadlineExceeded, "Deadline Exceeded");
                } else {
                    call.cancel();
                }
            }
            call.internal_unref(RefTag::Alarm);
        }));
    }

    // ------------------------------------------------------------------
    // Internal references
    // ------------------------------------------------------------------

    fn internal_ref(&self, tag: RefTag) {
        let previous = self.inner.activity.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tag = ?tag, refs = previous + 1, "call internal ref");
    }

    fn internal_unref(&self, tag: RefTag) {
        let previous = self.inner.activity.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!(tag = ?tag, refs = previous.saturating_sub(1), "call internal unref");
    }
}
