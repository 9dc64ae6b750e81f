// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Messages and the per-adapter event port.

use crate::codec::{self, CodecError};
use crate::modules::LoadError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An opaque control message. The adapter never looks inside the payload,
/// except that the first one is handed to the module loader as its source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message(Vec<u8>);

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    /// Build a message from byte-range text.
    pub fn from_text(text: &str) -> Result<Self, CodecError> {
        codec::encode(text).map(Self)
    }

    pub fn payload(&self) -> &[u8] {
        &self.0
    }

    /// Payload read back as byte-range text.
    pub fn text(&self) -> String {
        codec::decode(Some(&self.0))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self(payload)
    }
}

impl From<&[u8]> for Message {
    fn from(payload: &[u8]) -> Self {
        Self(payload.to_vec())
    }
}

/// Everything that can arrive on an adapter's port.
#[derive(Debug, Clone)]
pub enum PortEvent {
    /// A control message from the host.
    Message(Message),
    /// The channel failed to deliver a message.
    MessageError(String),
    /// The shared module finished loading.
    ModuleLoaded,
    /// The shared module failed to load.
    ModuleFailed(Arc<LoadError>),
    /// The host is done with this adapter.
    Close,
}

pub type PortSender = mpsc::UnboundedSender<PortEvent>;
pub type PortReceiver = mpsc::UnboundedReceiver<PortEvent>;

/// Create a new adapter port.
pub fn port() -> (PortSender, PortReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_roundtrip() {
        let msg = Message::from_text("/usr/lib/procwrap/tone.so").unwrap();
        assert_eq!(msg.len(), 25);
        assert_eq!(msg.text(), "/usr/lib/procwrap/tone.so");
    }

    #[test]
    fn test_from_text_rejects_wide_characters() {
        assert!(Message::from_text("\u{1f3b5}").is_err());
    }
}
