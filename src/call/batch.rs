// The public batch surface.
//
// A batch is a list of high-level operations submitted together with a tag.
// Each batch op is rewritten into one or more ioreqs; the whole group
// completes with a single event on the completion queue.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::ByteBuffer;
use crate::call::ioreq::{DetailsSink, MessageSink, MetadataSink, RequestData, StatusSink};
use crate::call::Call;
use crate::error::{Result, RpcError};
use crate::metadata::Metadata;
use crate::status::StatusCode;

/// One operation in a batch.
pub enum BatchOp {
    /// Send the initial metadata frame. Legal exactly once, before any
    /// message.
    SendInitialMetadata(Vec<Metadata>),
    /// Send one message.
    SendMessage(ByteBuffer),
    /// Half-close the stream from the client side. Client calls only.
    SendCloseFromClient,
    /// Send trailing metadata plus the final status, closing the stream.
    /// Server calls only.
    SendStatusFromServer {
        status: StatusCode,
        details: Option<String>,
        trailing_metadata: Vec<Metadata>,
    },
    /// Receive the peer's initial metadata. Client calls only.
    RecvInitialMetadata(MetadataSink),
    /// Receive one message. Delivers `None` once the peer will send no more.
    RecvMessage(MessageSink),
    /// Receive the final status, detail string, and trailing metadata, and
    /// wait for the stream to fully close. Client calls only.
    RecvStatusOnClient {
        status: Arc<Mutex<StatusCode>>,
        details: DetailsSink,
        trailing_metadata: MetadataSink,
    },
    /// Wait for the stream to fully close, reporting whether the call ended
    /// non-OK.
    RecvCloseOnServer { cancelled: Arc<Mutex<bool>> },
}

impl Call {
    /// Submits a batch. On success exactly one completion carrying `tag` is
    /// eventually posted to the call's completion queue; an empty batch
    /// completes immediately.
    pub fn start_batch(&self, ops: Vec<BatchOp>, tag: u64) -> Result<()> {
        tracing::debug!(nops = ops.len(), tag, "starting batch");
        let cq = self.completion_queue();

        if ops.is_empty() {
            cq.begin_op();
            cq.end_op(tag, true);
            return Ok(());
        }

        // Rewrite batch ops into ioreq ops.
        let mut reqs: Vec<RequestData> = Vec::with_capacity(ops.len() + 3);
        for op in ops {
            match op {
                BatchOp::SendInitialMetadata(metadata) => {
                    reqs.push(RequestData::SendInitialMetadata(metadata));
                }
                BatchOp::SendMessage(message) => {
                    reqs.push(RequestData::SendMessage(message));
                }
                BatchOp::SendCloseFromClient => {
                    if !self.is_client() {
                        return Err(RpcError::NotOnServer);
                    }
                    reqs.push(RequestData::SendClose);
                }
                BatchOp::SendStatusFromServer {
                    status,
                    details,
                    trailing_metadata,
                } => {
                    if self.is_client() {
                        return Err(RpcError::NotOnClient);
                    }
                    reqs.push(RequestData::SendTrailingMetadata(trailing_metadata));
                    reqs.push(RequestData::SendStatus {
                        code: status,
                        details,
                    });
                    reqs.push(RequestData::SendClose);
                }
                BatchOp::RecvInitialMetadata(sink) => {
                    if !self.is_client() {
                        return Err(RpcError::NotOnServer);
                    }
                    reqs.push(RequestData::RecvInitialMetadata(sink));
                }
                BatchOp::RecvMessage(sink) => {
                    reqs.push(RequestData::RecvMessage(sink));
                }
                BatchOp::RecvStatusOnClient {
                    status,
                    details,
                    trailing_metadata,
                } => {
                    if !self.is_client() {
                        return Err(RpcError::NotOnServer);
                    }
                    reqs.push(RequestData::RecvStatus(StatusSink::Code(status)));
                    reqs.push(RequestData::RecvStatusDetails(details));
                    reqs.push(RequestData::RecvTrailingMetadata(trailing_metadata));
                    reqs.push(RequestData::RecvClose);
                }
                BatchOp::RecvCloseOnServer { cancelled } => {
                    reqs.push(RequestData::RecvStatus(StatusSink::Cancelled(cancelled)));
                    reqs.push(RequestData::RecvClose);
                }
            }
        }

        cq.begin_op();
        let completion_cq = cq.clone();
        self.start_ioreq_and_call_back(
            reqs,
            Box::new(move |_call, _status| {
                completion_cq.end_op(tag, true);
            }),
        )
    }
}
