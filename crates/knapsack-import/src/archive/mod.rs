//! Archive access
//!
//! An archive is a flat, ordered sequence of named byte packets. This module
//! provides:
//!
//! - [`Codec`] / [`Compression`]: the concrete archive encodings (tar, zip,
//!   optionally gzip-compressed)
//! - [`CodecRegistry`]: picks a codec for a path by suffix
//! - [`ArchiveSession`]: a sequential read-or-write handle over one archive
//! - [`entry`]: decoding packet names into [`Coordinate`]s

pub mod codec;
pub mod entry;
pub mod registry;
pub mod session;

use std::borrow::Cow;
use std::fmt;

pub use codec::{Codec, Compression};
pub use entry::{Coordinate, EntryKind, RecordKey};
pub use registry::{CodecRegistry, Selection};
pub use session::{ArchiveSession, SessionMode};

/// One named entry of an archive
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    name: String,
    payload: Vec<u8>,
}

impl Packet {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8 text; invalid sequences are replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("name", &self.name)
            .field("len", &self.payload.len())
            .finish()
    }
}
