// Channel: the factory for calls.
//
// A channel owns the transport handle, the metadata interning context, and
// the configuration shared by every call it creates.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::completion::CompletionQueue;
use crate::metadata::{Metadata, MetadataContext, STATUS_CODE_KEY, STATUS_MESSAGE_KEY};
use crate::transport::Transport;

/// Channel-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Largest inbound message the channel accepts, in bytes. A peer
    /// declaring a longer message gets the call cancelled.
    pub max_message_length: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4 * 1024 * 1024,
        }
    }
}

pub struct Channel {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    mdctx: Arc<MetadataContext>,
    status_key: Arc<str>,
    message_key: Arc<str>,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Arc<Channel> {
        let mdctx = Arc::new(MetadataContext::new());
        let status_key = mdctx.intern_key(STATUS_CODE_KEY);
        let message_key = mdctx.intern_key(STATUS_MESSAGE_KEY);
        Arc::new(Channel {
            transport,
            config,
            mdctx,
            status_key,
            message_key,
        })
    }

    /// Creates a call on this channel.
    ///
    /// `server_transport_data` identifies the inbound stream a server call is
    /// answering; passing `None` makes a client call. `prepend_metadata` is
    /// sent ahead of any user-supplied initial metadata. A `None` deadline
    /// means the call may run forever.
    pub fn create_call(
        self: &Arc<Self>,
        cq: Arc<CompletionQueue>,
        server_transport_data: Option<u64>,
        prepend_metadata: Vec<Metadata>,
        deadline: Option<Instant>,
    ) -> Call {
        Call::create(self, cq, server_transport_data, prepend_metadata, deadline)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn max_message_length(&self) -> usize {
        self.config.max_message_length
    }

    pub fn metadata_context(&self) -> &Arc<MetadataContext> {
        &self.mdctx
    }

    /// Interned key under which status codes travel.
    pub fn status_key(&self) -> &Arc<str> {
        &self.status_key
    }

    /// Interned key under which status detail strings travel.
    pub fn message_key(&self) -> &Arc<str> {
        &self.message_key
    }
}
