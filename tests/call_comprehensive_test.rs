// Comprehensive Call Surface Integration Tests
//
// Drives complete call lifecycles through the mock transport: unary
// exchanges on both roles, framing violations, deadlines, slot collision
// errors, and batch boundary behaviors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use rusty_rpc::buffer::ByteBuffer;
use rusty_rpc::call::{BatchOp, Call, DetailsSink, MessageSink, MetadataSink};
use rusty_rpc::channel::{Channel, ChannelConfig};
use rusty_rpc::completion::CompletionQueue;
use rusty_rpc::metadata::{MetadataArray, MetadataBatch, STATUS_CODE_KEY, STATUS_MESSAGE_KEY};
use rusty_rpc::status::StatusCode;
use rusty_rpc::transport::mock::MockTransport;
use rusty_rpc::transport::{StreamOp, StreamState};
use rusty_rpc::RpcError;

const WAIT: Duration = Duration::from_millis(500);

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn fixture(
    server_transport_data: Option<u64>,
    deadline: Option<Instant>,
) -> (Arc<MockTransport>, Arc<Channel>, Arc<CompletionQueue>, Call) {
    let mock = Arc::new(MockTransport::new());
    let channel = Channel::new(mock.clone(), ChannelConfig::default());
    let cq = Arc::new(CompletionQueue::new());
    let call = channel.create_call(cq.clone(), server_transport_data, Vec::new(), deadline);
    (mock, channel, cq, call)
}

fn client_fixture() -> (Arc<MockTransport>, Arc<Channel>, Arc<CompletionQueue>, Call) {
    fixture(None, None)
}

fn server_fixture() -> (Arc<MockTransport>, Arc<Channel>, Arc<CompletionQueue>, Call) {
    fixture(Some(7), None)
}

fn metadata_frame(channel: &Arc<Channel>, pairs: &[(&str, &str)]) -> StreamOp {
    let mdctx = channel.metadata_context();
    let list = pairs
        .iter()
        .map(|(key, value)| mdctx.elem(key, Bytes::copy_from_slice(value.as_bytes())))
        .collect();
    StreamOp::Metadata(MetadataBatch {
        list,
        deadline: None,
    })
}

fn metadata_frame_with_deadline(deadline: Instant) -> StreamOp {
    StreamOp::Metadata(MetadataBatch {
        list: Vec::new(),
        deadline: Some(deadline),
    })
}

fn message_frame(payload: &'static [u8]) -> Vec<StreamOp> {
    vec![
        StreamOp::BeginMessage {
            length: payload.len(),
            flags: 0,
        },
        StreamOp::Slice(Bytes::from_static(payload)),
    ]
}

fn new_metadata_sink() -> MetadataSink {
    Arc::new(Mutex::new(MetadataArray::default()))
}

fn new_message_sink() -> MessageSink {
    Arc::new(Mutex::new(None))
}

fn new_details_sink() -> DetailsSink {
    Arc::new(Mutex::new(String::new()))
}

fn wait_for_cancel(mock: &MockTransport) {
    let give_up = Instant::now() + Duration::from_secs(2);
    while mock.cancels().is_empty() && Instant::now() < give_up {
        std::thread::sleep(Duration::from_millis(5));
    }
}

// Scenario: client unary call that completes OK.
#[test]
fn test_client_unary_call_ok() {
    let (mock, channel, cq, call) = client_fixture();

    let initial_md = new_metadata_sink();
    let message = new_message_sink();
    let status = Arc::new(Mutex::new(StatusCode::Unknown));
    let details = new_details_sink();
    let trailing_md = new_metadata_sink();

    call.start_batch(
        vec![
            BatchOp::SendInitialMetadata(Vec::new()),
            BatchOp::SendMessage(ByteBuffer::from_bytes("hi")),
            BatchOp::SendCloseFromClient,
            BatchOp::RecvInitialMetadata(initial_md.clone()),
            BatchOp::RecvMessage(message.clone()),
            BatchOp::RecvStatusOnClient {
                status: status.clone(),
                details: details.clone(),
                trailing_metadata: trailing_md.clone(),
            },
        ],
        1,
    )
    .unwrap();

    // Everything sendable went out as one combined op: the metadata frame,
    // the framed message, and the half-close marker.
    let sends = mock.sends();
    assert_eq!(sends.len(), 1);
    assert!(sends[0].is_last_send);
    assert!(sends[0].bind_pollset.is_some());
    assert!(matches!(sends[0].send_ops[0], StreamOp::Metadata(_)));
    assert!(matches!(
        sends[0].send_ops[1],
        StreamOp::BeginMessage { length: 2, .. }
    ));
    assert!(matches!(sends[0].send_ops[2], StreamOp::Slice(_)));

    mock.deliver(
        vec![metadata_frame(&channel, &[("content-type", "application/grpc")])],
        StreamState::Open,
        true,
    );
    mock.deliver(message_frame(b"world"), StreamState::Open, true);
    mock.deliver(
        vec![metadata_frame(&channel, &[(STATUS_CODE_KEY, "0")])],
        StreamState::Closed,
        true,
    );

    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 1);
    assert!(event.success);

    assert_eq!(message.lock().as_ref().unwrap().to_vec(), b"world");
    assert_eq!(*status.lock(), StatusCode::Ok);
    assert_eq!(*details.lock(), "");
    assert_eq!(initial_md.lock().len(), 1);
    assert_eq!(initial_md.lock().entries()[0].key.as_ref(), "content-type");
    assert!(trailing_md.lock().is_empty());

    // Exactly one completion per batch.
    assert!(cq.next(Duration::from_millis(50)).is_none());
}

// Scenario: server rejects the call with status 9 and a detail string.
#[test]
fn test_server_rejects_with_status_nine() {
    let (mock, channel, cq, call) = server_fixture();

    // The client's request headers and one message arrive first.
    mock.deliver(
        vec![metadata_frame(&channel, &[(":path", "/svc/method")])],
        StreamState::Open,
        true,
    );
    mock.deliver(message_frame(b"q"), StreamState::Open, true);

    call.start_batch(
        vec![
            BatchOp::SendInitialMetadata(Vec::new()),
            BatchOp::SendStatusFromServer {
                status: StatusCode::FailedPrecondition,
                details: Some("nope".to_string()),
                trailing_metadata: Vec::new(),
            },
        ],
        9,
    )
    .unwrap();

    let sends = mock.sends();
    assert_eq!(sends.len(), 1);
    let op = &sends[0];
    assert!(op.is_last_send);
    assert_eq!(op.send_ops.len(), 2);

    // First the (empty) initial metadata frame, then the trailing frame
    // carrying the decimal status and its detail string.
    let initial = match &op.send_ops[0] {
        StreamOp::Metadata(batch) => batch,
        other => panic!("expected metadata frame, got {:?}", other),
    };
    assert!(initial.list.is_empty());

    let trailing = match &op.send_ops[1] {
        StreamOp::Metadata(batch) => batch,
        other => panic!("expected metadata frame, got {:?}", other),
    };
    let pairs: Vec<(String, String)> = trailing
        .list
        .iter()
        .map(|elem| {
            (
                elem.key().to_string(),
                String::from_utf8_lossy(elem.value()).into_owned(),
            )
        })
        .collect();
    assert!(pairs.contains(&(STATUS_CODE_KEY.to_string(), "9".to_string())));
    assert!(pairs.contains(&(STATUS_MESSAGE_KEY.to_string(), "nope".to_string())));

    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 9);
    assert!(event.success);
}

// Scenario: inbound message longer than declared cancels the call.
#[test]
fn test_receiving_message_overflow_cancels_call() {
    let (mock, _channel, cq, call) = client_fixture();

    let message = new_message_sink();
    call.start_batch(vec![BatchOp::RecvMessage(message.clone())], 31)
        .unwrap();

    mock.deliver(
        vec![
            StreamOp::BeginMessage { length: 3, flags: 0 },
            StreamOp::Slice(Bytes::from_static(b"abcd")),
        ],
        StreamState::Open,
        true,
    );

    assert_eq!(mock.cancels(), vec![StatusCode::InvalidArgument]);

    // The transport reports the aborted stream; the pending receive fails.
    mock.deliver(Vec::new(), StreamState::Closed, false);
    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 31);
    assert!(message.lock().is_none());

    // The recorded status and detail are observable through a status batch.
    let status = Arc::new(Mutex::new(StatusCode::Unknown));
    let details = new_details_sink();
    let trailing_md = new_metadata_sink();
    call.start_batch(
        vec![BatchOp::RecvStatusOnClient {
            status: status.clone(),
            details: details.clone(),
            trailing_metadata: trailing_md.clone(),
        }],
        32,
    )
    .unwrap();
    mock.deliver(Vec::new(), StreamState::Closed, true);

    let event = cq.next(WAIT).expect("status batch completion");
    assert_eq!(event.tag, 32);
    assert_eq!(*status.lock(), StatusCode::InvalidArgument);
    assert!(details.lock().starts_with("Receiving message overflow"));
}

// Scenario: the deadline fires and cancels a client call.
#[test]
fn test_deadline_exceeded_cancels_client_call() {
    trace_init();
    let (mock, _channel, cq, call) = fixture(None, Some(Instant::now() + Duration::from_millis(30)));

    let status = Arc::new(Mutex::new(StatusCode::Unknown));
    let details = new_details_sink();
    let trailing_md = new_metadata_sink();
    call.start_batch(
        vec![BatchOp::RecvStatusOnClient {
            status: status.clone(),
            details: details.clone(),
            trailing_metadata: trailing_md.clone(),
        }],
        4,
    )
    .unwrap();

    wait_for_cancel(&mock);
    assert_eq!(mock.cancels(), vec![StatusCode::DeadlineExceeded]);

    mock.deliver(Vec::new(), StreamState::Closed, true);
    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 4);
    assert_eq!(*status.lock(), StatusCode::DeadlineExceeded);
    assert_eq!(*details.lock(), "Deadline Exceeded");
}

// Scenario: overlapping sends of the same kind are rejected without
// disturbing the in-flight batch.
#[test]
fn test_too_many_operations() {
    let (mock, _channel, cq, call) = client_fixture();
    mock.defer_send_acks();

    call.start_batch(
        vec![
            BatchOp::SendInitialMetadata(Vec::new()),
            BatchOp::SendMessage(ByteBuffer::from_bytes("one")),
        ],
        51,
    )
    .unwrap();

    let second = call.start_batch(
        vec![BatchOp::SendMessage(ByteBuffer::from_bytes("two"))],
        52,
    );
    assert_eq!(second, Err(RpcError::TooManyOperations));

    // The first batch is unaffected and completes once the transport acks.
    mock.ack_send(true);
    let event = cq.next(WAIT).expect("first batch completion");
    assert_eq!(event.tag, 51);

    // The message slot reopened, so a fresh send goes through.
    call.start_batch(
        vec![BatchOp::SendMessage(ByteBuffer::from_bytes("three"))],
        53,
    )
    .unwrap();
    mock.ack_send(true);
    let event = cq.next(WAIT).expect("third batch completion");
    assert_eq!(event.tag, 53);
}

// Scenario: repeating a one-shot operation reports ALREADY_INVOKED.
#[test]
fn test_already_invoked() {
    let (_mock, _channel, cq, call) = client_fixture();

    call.start_batch(vec![BatchOp::SendInitialMetadata(Vec::new())], 61)
        .unwrap();
    let event = cq.next(WAIT).expect("first batch completion");
    assert_eq!(event.tag, 61);

    let second = call.start_batch(vec![BatchOp::SendInitialMetadata(Vec::new())], 62);
    assert_eq!(second, Err(RpcError::AlreadyInvoked));
}

#[test]
fn test_empty_batch_completes_immediately() {
    let (mock, _channel, cq, call) = client_fixture();

    call.start_batch(Vec::new(), 99).unwrap();
    let event = cq.next(WAIT).expect("immediate completion");
    assert_eq!(event.tag, 99);
    assert!(event.success);
    assert!(mock.ops().is_empty());
}

#[test]
fn test_initial_metadata_with_no_elements_still_emits_frame() {
    let (mock, _channel, cq, call) = client_fixture();

    call.start_batch(vec![BatchOp::SendInitialMetadata(Vec::new())], 70)
        .unwrap();
    let sends = mock.sends();
    assert_eq!(sends.len(), 1);
    match &sends[0].send_ops[0] {
        StreamOp::Metadata(batch) => assert!(batch.list.is_empty()),
        other => panic!("expected metadata frame, got {:?}", other),
    }
    assert!(cq.next(WAIT).is_some());
}

#[test]
fn test_role_checks() {
    let (_mock, _channel, _cq, client) = client_fixture();
    assert_eq!(
        client.start_batch(
            vec![BatchOp::SendStatusFromServer {
                status: StatusCode::Ok,
                details: None,
                trailing_metadata: Vec::new(),
            }],
            0,
        ),
        Err(RpcError::NotOnClient)
    );

    let (_mock, _channel, _cq, server) = server_fixture();
    assert_eq!(
        server.start_batch(vec![BatchOp::SendCloseFromClient], 0),
        Err(RpcError::NotOnServer)
    );
    assert_eq!(
        server.start_batch(vec![BatchOp::RecvInitialMetadata(new_metadata_sink())], 0),
        Err(RpcError::NotOnServer)
    );
    assert_eq!(
        server.start_batch(
            vec![BatchOp::RecvStatusOnClient {
                status: Arc::new(Mutex::new(StatusCode::Unknown)),
                details: new_details_sink(),
                trailing_metadata: new_metadata_sink(),
            }],
            0,
        ),
        Err(RpcError::NotOnServer)
    );
}

// A read-closed stream completes a waiting receive with an empty delivery.
#[test]
fn test_recv_message_delivers_none_at_read_close() {
    let (mock, _channel, cq, call) = client_fixture();

    let message = new_message_sink();
    *message.lock() = Some(ByteBuffer::from_bytes("stale"));
    call.start_batch(vec![BatchOp::RecvMessage(message.clone())], 80)
        .unwrap();

    mock.deliver(Vec::new(), StreamState::RecvClosed, true);
    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 80);
    assert!(event.success);
    assert!(message.lock().is_none());
}

#[test]
fn test_recv_close_on_server_reports_clean_close() {
    let (mock, channel, cq, call) = server_fixture();

    mock.deliver(vec![metadata_frame(&channel, &[])], StreamState::Open, true);

    let cancelled = Arc::new(Mutex::new(true));
    call.start_batch(
        vec![BatchOp::RecvCloseOnServer {
            cancelled: cancelled.clone(),
        }],
        90,
    )
    .unwrap();

    mock.deliver(Vec::new(), StreamState::Closed, true);
    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 90);
    assert!(!*cancelled.lock());
}

#[test]
fn test_recv_close_on_server_reports_cancellation() {
    let (mock, channel, cq, call) = server_fixture();

    mock.deliver(vec![metadata_frame(&channel, &[])], StreamState::Open, true);

    let cancelled = Arc::new(Mutex::new(false));
    call.start_batch(
        vec![BatchOp::RecvCloseOnServer {
            cancelled: cancelled.clone(),
        }],
        91,
    )
    .unwrap();

    call.cancel();
    mock.deliver(Vec::new(), StreamState::Closed, true);
    let event = cq.next(WAIT).expect("batch completion");
    assert_eq!(event.tag, 91);
    assert!(*cancelled.lock());
}

// A deadline received with initial metadata arms the server-side alarm.
#[test]
fn test_server_arms_alarm_from_received_deadline() {
    trace_init();
    let (mock, _channel, _cq, _call) = server_fixture();

    mock.deliver(
        vec![metadata_frame_with_deadline(
            Instant::now() + Duration::from_millis(30),
        )],
        StreamState::Open,
        true,
    );

    wait_for_cancel(&mock);
    assert_eq!(mock.cancels(), vec![StatusCode::Cancelled]);
}

// Streaming: the message slot reopens after each delivery, so one call can
// receive several messages through successive batches.
#[test]
fn test_streaming_recv_reuses_message_slot() {
    let (mock, channel, cq, call) = client_fixture();

    mock.deliver(vec![metadata_frame(&channel, &[])], StreamState::Open, true);

    for (tag, payload) in [(100u64, b"first" as &'static [u8]), (101, b"second")] {
        let message = new_message_sink();
        call.start_batch(vec![BatchOp::RecvMessage(message.clone())], tag)
            .unwrap();
        mock.deliver(
            vec![
                StreamOp::BeginMessage {
                    length: payload.len(),
                    flags: 0,
                },
                StreamOp::Slice(Bytes::from_static(payload)),
            ],
            StreamState::Open,
            true,
        );
        let event = cq.next(WAIT).expect("message batch completion");
        assert_eq!(event.tag, tag);
        assert_eq!(message.lock().as_ref().unwrap().to_vec(), payload);
    }
}
