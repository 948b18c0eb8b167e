// The internal I/O request vocabulary.
//
// A batch submitted by the application is rewritten into ioreqs, one per
// role. At most one ioreq per role may be active; the ioreqs of one batch
// form a group that completes together, tracked by a master record anchored
// at the first op of the batch.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::ByteBuffer;
use crate::call::Call;
use crate::metadata::{Metadata, MetadataArray};
use crate::status::{OpStatus, StatusCode};

/// Number of distinct ioreq roles.
pub const OP_COUNT: usize = 11;

/// Role of one internal I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoreqOp {
    SendInitialMetadata = 0,
    SendMessage = 1,
    SendTrailingMetadata = 2,
    SendStatus = 3,
    SendClose = 4,
    RecvInitialMetadata = 5,
    RecvMessage = 6,
    RecvStatus = 7,
    RecvStatusDetails = 8,
    RecvTrailingMetadata = 9,
    RecvClose = 10,
}

impl IoreqOp {
    pub const ALL: [IoreqOp; OP_COUNT] = [
        IoreqOp::SendInitialMetadata,
        IoreqOp::SendMessage,
        IoreqOp::SendTrailingMetadata,
        IoreqOp::SendStatus,
        IoreqOp::SendClose,
        IoreqOp::RecvInitialMetadata,
        IoreqOp::RecvMessage,
        IoreqOp::RecvStatus,
        IoreqOp::RecvStatusDetails,
        IoreqOp::RecvTrailingMetadata,
        IoreqOp::RecvClose,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Set of ioreq roles as a bitmask. Eleven roles fit comfortably in 16 bits,
/// so need/complete masks stay machine-word sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpSet(u16);

impl OpSet {
    pub fn insert(&mut self, op: IoreqOp) {
        self.0 |= 1 << op.index();
    }

    pub fn contains(self, op: IoreqOp) -> bool {
        self.0 & (1 << op.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Occupancy of one ioreq slot.
///
/// `Pending` names the group the active ioreq belongs to, by the group's
/// anchor op. `Done` slots are permanently retired; resubmission is an
/// application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSlot {
    Empty,
    Done,
    Pending(IoreqOp),
}

/// Completion callback of an ioreq group. Runs outside the call mutex.
pub type CompletionFn = Box<dyn FnOnce(&Call, OpStatus) + Send + 'static>;

/// Master record of one in-flight ioreq group: what it needs, what has
/// finished, and the callback to fire once the two agree.
#[derive(Default)]
pub struct Master {
    pub status: OpStatus,
    pub need: OpSet,
    pub complete: OpSet,
    pub on_complete: Option<CompletionFn>,
}

/// Where a delivered message lands.
pub type MessageSink = Arc<Mutex<Option<ByteBuffer>>>;

/// Where delivered metadata lands; ownership is swapped in wholesale.
pub type MetadataSink = Arc<Mutex<MetadataArray>>;

/// Where the final status detail string lands.
pub type DetailsSink = Arc<Mutex<String>>;

/// Where the final status code lands, and how it is projected on the way.
#[derive(Clone)]
pub enum StatusSink {
    /// Deliver the raw code.
    Code(Arc<Mutex<StatusCode>>),
    /// Deliver whether the call ended non-OK.
    Cancelled(Arc<Mutex<bool>>),
}

impl StatusSink {
    pub fn deliver(&self, code: StatusCode) {
        match self {
            StatusSink::Code(cell) => *cell.lock() = code,
            StatusSink::Cancelled(cell) => *cell.lock() = !code.is_ok(),
        }
    }
}

/// Payload supplied with one ioreq, as handed over by the initiator.
pub enum RequestData {
    SendInitialMetadata(Vec<Metadata>),
    SendMessage(ByteBuffer),
    SendTrailingMetadata(Vec<Metadata>),
    SendStatus {
        code: StatusCode,
        details: Option<String>,
    },
    SendClose,
    RecvInitialMetadata(MetadataSink),
    RecvMessage(MessageSink),
    RecvStatus(StatusSink),
    RecvStatusDetails(DetailsSink),
    RecvTrailingMetadata(MetadataSink),
    RecvClose,
}

impl RequestData {
    pub fn op(&self) -> IoreqOp {
        match self {
            RequestData::SendInitialMetadata(_) => IoreqOp::SendInitialMetadata,
            RequestData::SendMessage(_) => IoreqOp::SendMessage,
            RequestData::SendTrailingMetadata(_) => IoreqOp::SendTrailingMetadata,
            RequestData::SendStatus { .. } => IoreqOp::SendStatus,
            RequestData::SendClose => IoreqOp::SendClose,
            RequestData::RecvInitialMetadata(_) => IoreqOp::RecvInitialMetadata,
            RequestData::RecvMessage(_) => IoreqOp::RecvMessage,
            RequestData::RecvStatus(_) => IoreqOp::RecvStatus,
            RequestData::RecvStatusDetails(_) => IoreqOp::RecvStatusDetails,
            RequestData::RecvTrailingMetadata(_) => IoreqOp::RecvTrailingMetadata,
            RequestData::RecvClose => IoreqOp::RecvClose,
        }
    }
}

/// A group completion staged under the lock and delivered outside it.
pub struct CompletedRequest {
    pub status: OpStatus,
    pub on_complete: CompletionFn,
}

/// Reason a concurrent activity is keeping the call alive. Logged at trace
/// level so refcount imbalances can be diagnosed per activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTag {
    Sending,
    Receiving,
    Completing,
    Alarm,
    Destroy,
}
