// Call surface: the per-invocation state machine between the batch API and
// the channel stack.
//
// A call tracks how far the stream has progressed in each direction, merges
// status from multiple sources, buffers inbound messages and metadata,
// serializes outbound frames, enforces the deadline, and completes batches
// out of order as their prerequisites resolve.
//
// # Module Organization
//
// | Module | Responsibility |
// |--------|----------------|
// | [`state`] | Monotone read/write progress enums |
// | [`ioreq`] | Internal I/O request roles, slots, groups, sinks |
// | [`assembler`] | Reassembly of inbound stream ops into messages |
// | [`batch`] | Public batch vocabulary and its rewrite into ioreqs |
//
// The state machine itself lives in the private `call` submodule and is
// exported as [`Call`].

pub mod assembler;
pub mod batch;
pub mod ioreq;
pub mod state;

mod call;

pub use batch::BatchOp;
pub use call::Call;
pub use ioreq::{DetailsSink, MessageSink, MetadataSink, StatusSink};
pub use state::{ReadState, WriteState};
