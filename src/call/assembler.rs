// Reassembles inbound stream ops into discrete messages.
//
// The transport frames a message as `BeginMessage(length)` followed by
// payload slices totalling exactly that length. Framing violations are not
// recoverable at this layer; the assembler reports them and the receive path
// cancels the call.

use bytes::Bytes;

use crate::buffer::{ByteBuffer, SliceBuffer};
use crate::status::StatusCode;

/// Result of feeding one stream op into the assembler.
#[derive(Debug)]
pub enum AssembleOutcome {
    /// The message is still incomplete (or the op carried nothing).
    Incomplete,
    /// One message finished; hand it to the inbound queue.
    Finished(ByteBuffer),
    /// The peer violated framing; cancel the call with this status.
    Violation { code: StatusCode, detail: String },
}

/// Scratch state for the message currently mid-assembly.
#[derive(Default)]
pub struct MessageAssembler {
    reading: bool,
    declared_length: usize,
    scratch: SliceBuffer,
}

impl MessageAssembler {
    /// Handles `BeginMessage(length)` against the channel's message cap.
    pub fn begin_message(&mut self, length: usize, max_length: usize) -> AssembleOutcome {
        if self.reading {
            return AssembleOutcome::Violation {
                code: StatusCode::InvalidArgument,
                detail: format!(
                    "Message terminated early; read {} bytes, expected {}",
                    self.scratch.length(),
                    self.declared_length
                ),
            };
        }
        if length > max_length {
            return AssembleOutcome::Violation {
                code: StatusCode::InvalidArgument,
                detail: format!(
                    "Maximum message length of {} exceeded by a message of length {}",
                    max_length, length
                ),
            };
        }
        if length > 0 {
            self.reading = true;
            self.declared_length = length;
            AssembleOutcome::Incomplete
        } else {
            AssembleOutcome::Finished(self.finish())
        }
    }

    /// Handles a payload `Slice`.
    pub fn add_slice(&mut self, slice: Bytes) -> AssembleOutcome {
        if slice.is_empty() {
            return AssembleOutcome::Incomplete;
        }
        if !self.reading {
            return AssembleOutcome::Violation {
                code: StatusCode::InvalidArgument,
                detail: "Received payload data while not reading a message".to_string(),
            };
        }
        self.scratch.add(slice);
        if self.scratch.length() > self.declared_length {
            return AssembleOutcome::Violation {
                code: StatusCode::InvalidArgument,
                detail: format!(
                    "Receiving message overflow; read {} bytes, expected {}",
                    self.scratch.length(),
                    self.declared_length
                ),
            };
        }
        if self.scratch.length() == self.declared_length {
            AssembleOutcome::Finished(self.finish())
        } else {
            AssembleOutcome::Incomplete
        }
    }

    fn finish(&mut self) -> ByteBuffer {
        self.reading = false;
        ByteBuffer::from_slices(self.scratch.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    fn finished(outcome: AssembleOutcome) -> ByteBuffer {
        match outcome {
            AssembleOutcome::Finished(buf) => buf,
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    fn violation(outcome: AssembleOutcome) -> (StatusCode, String) {
        match outcome {
            AssembleOutcome::Violation { code, detail } => (code, detail),
            other => panic!("expected Violation, got {:?}", other),
        }
    }

    #[test]
    fn test_two_slice_message() {
        let mut asm = MessageAssembler::default();
        assert!(matches!(asm.begin_message(5, MAX), AssembleOutcome::Incomplete));
        assert!(matches!(asm.add_slice(Bytes::from_static(b"wo")), AssembleOutcome::Incomplete));

        let buf = finished(asm.add_slice(Bytes::from_static(b"rld")));
        assert_eq!(buf.to_vec(), b"world");
    }

    #[test]
    fn test_zero_length_message_completes_without_slices() {
        let mut asm = MessageAssembler::default();
        let buf = finished(asm.begin_message(0, MAX));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zero_length_slice_is_dropped() {
        let mut asm = MessageAssembler::default();
        assert!(matches!(asm.begin_message(1, MAX), AssembleOutcome::Incomplete));
        assert!(matches!(asm.add_slice(Bytes::new()), AssembleOutcome::Incomplete));

        let buf = finished(asm.add_slice(Bytes::from_static(b"x")));
        assert_eq!(buf.to_vec(), b"x");
    }

    #[test]
    fn test_overflow_is_a_violation() {
        let mut asm = MessageAssembler::default();
        asm.begin_message(3, MAX);

        let (code, detail) = violation(asm.add_slice(Bytes::from_static(b"abcd")));
        assert_eq!(code, StatusCode::InvalidArgument);
        assert!(detail.starts_with("Receiving message overflow"));
        assert!(detail.contains("read 4 bytes, expected 3"));
    }

    #[test]
    fn test_premature_begin_is_a_violation() {
        let mut asm = MessageAssembler::default();
        asm.begin_message(10, MAX);
        asm.add_slice(Bytes::from_static(b"abc"));

        let (code, detail) = violation(asm.begin_message(4, MAX));
        assert_eq!(code, StatusCode::InvalidArgument);
        assert!(detail.starts_with("Message terminated early"));
        assert!(detail.contains("read 3 bytes, expected 10"));
    }

    #[test]
    fn test_oversized_declaration_is_a_violation() {
        let mut asm = MessageAssembler::default();
        let (code, detail) = violation(asm.begin_message(MAX + 1, MAX));
        assert_eq!(code, StatusCode::InvalidArgument);
        assert!(detail.starts_with("Maximum message length"));
    }

    #[test]
    fn test_stray_slice_is_a_violation() {
        let mut asm = MessageAssembler::default();
        let (code, detail) = violation(asm.add_slice(Bytes::from_static(b"x")));
        assert_eq!(code, StatusCode::InvalidArgument);
        assert_eq!(detail, "Received payload data while not reading a message");
    }
}
