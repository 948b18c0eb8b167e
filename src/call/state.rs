// Per-direction stream progress.
//
// Both enums are ordered and only ever move forward; `advance_to` ignores
// attempts to move backward so concurrent observers can race benignly.

/// How far through the stream reads have progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadState {
    /// Still waiting for initial metadata.
    Initial,
    /// Initial metadata arrived; reading messages or trailing metadata.
    GotInitialMetadata,
    /// The stream is closed for reading.
    ReadClosed,
    /// The stream is closed for reading and writing.
    StreamClosed,
}

/// How far through the stream writes have progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteState {
    /// Nothing sent yet; initial metadata must go first.
    Initial,
    /// Initial metadata sent; messages may flow.
    Started,
    /// The stream is closed for writing.
    WriteClosed,
}

impl ReadState {
    pub fn advance_to(&mut self, next: ReadState) {
        if next > *self {
            *self = next;
        }
    }
}

impl WriteState {
    pub fn advance_to(&mut self, next: WriteState) {
        if next > *self {
            *self = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_state_is_monotone() {
        let mut state = ReadState::Initial;
        state.advance_to(ReadState::ReadClosed);
        assert_eq!(state, ReadState::ReadClosed);

        state.advance_to(ReadState::GotInitialMetadata);
        assert_eq!(state, ReadState::ReadClosed);

        state.advance_to(ReadState::StreamClosed);
        assert_eq!(state, ReadState::StreamClosed);
    }

    #[test]
    fn test_write_state_is_monotone() {
        let mut state = WriteState::Initial;
        state.advance_to(WriteState::WriteClosed);
        state.advance_to(WriteState::Started);
        assert_eq!(state, WriteState::WriteClosed);
    }
}
