// Metadata elements, batches, and the interning context.
//
// Keys are interned as `Arc<str>` so repeated headers share storage and
// compare cheaply. A received element memoizes the decoded status code it
// carries; transport metadata cannot store a zero value, so the memo is kept
// offset by one as a `NonZeroU32`.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::status::StatusCode;

/// Metadata key carrying the decimal status code of a call.
pub const STATUS_CODE_KEY: &str = "grpc-status";

/// Metadata key carrying the human-readable status detail string.
pub const STATUS_MESSAGE_KEY: &str = "grpc-message";

/// A user-visible metadata key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub key: Arc<str>,
    pub value: Bytes,
}

impl Metadata {
    pub fn new(key: &str, value: impl Into<Bytes>) -> Self {
        Self {
            key: Arc::from(key),
            value: value.into(),
        }
    }
}

/// A metadata element as it travels the channel stack.
#[derive(Debug, Clone)]
pub struct MdElem {
    key: Arc<str>,
    value: Bytes,
    // Decoded wire status, stored offset by one; shared across clones so a
    // value is only parsed once.
    decoded_status: Arc<OnceCell<NonZeroU32>>,
}

impl MdElem {
    pub fn new(key: Arc<str>, value: Bytes) -> Self {
        Self {
            key,
            value,
            decoded_status: Arc::new(OnceCell::new()),
        }
    }

    pub fn key(&self) -> &Arc<str> {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Decodes the value as a status code, memoizing the result.
    pub fn decode_status(&self) -> StatusCode {
        let stored = self
            .decoded_status
            .get_or_init(|| NonZeroU32::MIN.saturating_add(StatusCode::decode(&self.value).as_u32()));
        StatusCode::from_u32(stored.get() - 1)
    }

    pub fn to_metadata(&self) -> Metadata {
        Metadata {
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }
}

/// A batch of metadata elements delivered or sent as one frame, with an
/// optional deadline attached by the peer.
#[derive(Debug, Clone, Default)]
pub struct MetadataBatch {
    pub list: Vec<MdElem>,
    pub deadline: Option<Instant>,
}

/// Buffered metadata awaiting a matching receive request.
///
/// Growth is geometric with a small floor so short header lists do not
/// reallocate per element.
#[derive(Debug, Default)]
pub struct MetadataArray {
    entries: Vec<Metadata>,
}

impl MetadataArray {
    pub fn push(&mut self, md: Metadata) {
        if self.entries.len() == self.entries.capacity() {
            let cap = self.entries.capacity();
            let grown = std::cmp::max(cap + 8, cap * 2);
            self.entries.reserve_exact(grown - self.entries.len());
        }
        self.entries.push(md);
    }

    pub fn entries(&self) -> &[Metadata] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Interning context shared by every call on a channel.
pub struct MetadataContext {
    keys: Mutex<HashMap<String, Arc<str>>>,
}

impl MetadataContext {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the interned form of `key`, creating it on first use.
    pub fn intern_key(&self, key: &str) -> Arc<str> {
        let mut keys = self.keys.lock();
        if let Some(interned) = keys.get(key) {
            return interned.clone();
        }
        let interned: Arc<str> = Arc::from(key);
        keys.insert(key.to_string(), interned.clone());
        interned
    }

    /// Builds an element with an interned key.
    pub fn elem(&self, key: &str, value: impl Into<Bytes>) -> MdElem {
        MdElem::new(self.intern_key(key), value.into())
    }
}

impl Default for MetadataContext {
    fn default() -> Self {
        Self::new()
    }
}
