// Call status codes and their wire representation.
//
// Status codes cross the wire as decimal ASCII inside a trailing metadata
// value. Decoding is deliberately lenient: a value that does not parse as a
// known code maps to `Unknown` rather than failing the call.

use serde::{Deserialize, Serialize};

/// Final disposition of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum StatusCode {
    /// The call completed successfully.
    Ok = 0,
    /// The call was cancelled, typically by the caller.
    Cancelled = 1,
    /// The outcome is unknown (also the lenient-decode fallback).
    Unknown = 2,
    /// The peer supplied an invalid argument or violated message framing.
    InvalidArgument = 3,
    /// The deadline expired before the call completed.
    DeadlineExceeded = 4,
    /// A requested entity was not found.
    NotFound = 5,
    /// An entity that was to be created already exists.
    AlreadyExists = 6,
    /// The caller lacks permission for the operation.
    PermissionDenied = 7,
    /// A resource (quota, memory, ...) has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted due to a concurrency conflict.
    Aborted = 10,
    /// The operation ran past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented by the peer.
    Unimplemented = 12,
    /// An internal invariant was broken.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The caller could not be authenticated.
    Unauthenticated = 16,
}

impl StatusCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Maps a raw numeric code onto the known set. Values outside the set
    /// decode to `Unknown`, extending the lenient-decode rule.
    pub fn from_u32(value: u32) -> StatusCode {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    /// Encodes the code as the decimal ASCII string carried in metadata.
    pub fn encode(self) -> String {
        self.as_u32().to_string()
    }

    /// Decodes a metadata value. Non-numeric input yields `Unknown`.
    pub fn decode(value: &[u8]) -> StatusCode {
        match std::str::from_utf8(value).ok().and_then(|s| s.parse::<u32>().ok()) {
            Some(raw) => StatusCode::from_u32(raw),
            None => StatusCode::Unknown,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

/// Completion status of a single I/O request.
///
/// A request group starts `Ok` and degrades to `Error` if any member fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpStatus {
    #[default]
    Ok,
    Error,
}

impl OpStatus {
    pub fn is_ok(self) -> bool {
        self == OpStatus::Ok
    }

    pub fn from_success(success: bool) -> OpStatus {
        if success {
            OpStatus::Ok
        } else {
            OpStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StatusCode; 17] = [
        StatusCode::Ok,
        StatusCode::Cancelled,
        StatusCode::Unknown,
        StatusCode::InvalidArgument,
        StatusCode::DeadlineExceeded,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::Unavailable,
        StatusCode::DataLoss,
        StatusCode::Unauthenticated,
    ];

    #[test]
    fn test_encode_decode_round_trip() {
        for code in ALL {
            assert_eq!(StatusCode::decode(code.encode().as_bytes()), code);
        }
    }

    #[test]
    fn test_decode_is_lenient() {
        assert_eq!(StatusCode::decode(b"not-a-number"), StatusCode::Unknown);
        assert_eq!(StatusCode::decode(b""), StatusCode::Unknown);
        assert_eq!(StatusCode::decode(b"-1"), StatusCode::Unknown);
        assert_eq!(StatusCode::decode(b"4 "), StatusCode::Unknown);
        assert_eq!(StatusCode::decode(b"999"), StatusCode::Unknown);
    }

    #[test]
    fn test_op_status_degrades() {
        assert!(OpStatus::from_success(true).is_ok());
        assert!(!OpStatus::from_success(false).is_ok());
    }
}
