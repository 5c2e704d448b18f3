//! Concrete archive encodings
//!
//! Codec work is blocking I/O. [`ArchiveSession`](super::ArchiveSession) runs
//! these functions on tokio's blocking pool and exchanges packets with them
//! over bounded channels.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use knapsack_common::{KnapsackError, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;

use super::Packet;

/// Upper bound on the buffer reserved up front for one entry
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// Archive encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Tar,
    Zip,
}

/// Stream compression wrapped around an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Codec::Tar => "tar",
            Codec::Zip => "zip",
        }
    }

    /// File suffix (without the dot) claimed by this codec
    pub fn suffix(self) -> &'static str {
        self.name()
    }

    /// Zip needs random access to its central directory, so it cannot sit
    /// inside a compressed stream
    pub fn supports_compression(self) -> bool {
        matches!(self, Codec::Tar)
    }

    /// Read every file entry and hand it to `tx`, stopping early when the
    /// receiving side is gone
    pub(crate) fn read_packets(
        self,
        file: File,
        compression: Option<Compression>,
        tx: &mpsc::Sender<Result<Packet>>,
    ) -> Result<()> {
        match (self, compression) {
            (Codec::Tar, None) => read_tar(BufReader::new(file), tx),
            (Codec::Tar, Some(Compression::Gzip)) => {
                read_tar(MultiGzDecoder::new(BufReader::new(file)), tx)
            },
            (Codec::Zip, None) => read_zip(file, tx),
            (Codec::Zip, Some(c)) => Err(KnapsackError::Archive(format!(
                "zip archives cannot be read through {} compression",
                c.name()
            ))),
        }
    }

    /// Write packets from `rx` until the sending side closes, then finish
    /// the archive
    pub(crate) fn write_packets(
        self,
        file: File,
        compression: Option<Compression>,
        rx: &mut mpsc::Receiver<Packet>,
    ) -> Result<()> {
        match (self, compression) {
            (Codec::Tar, None) => {
                let mut out = write_tar(BufWriter::new(file), rx)?;
                out.flush()?;
            },
            (Codec::Tar, Some(Compression::Gzip)) => {
                let encoder = GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
                let mut out = write_tar(encoder, rx)?.finish()?;
                out.flush()?;
            },
            (Codec::Zip, None) => write_zip(file, rx)?,
            (Codec::Zip, Some(c)) => {
                return Err(KnapsackError::Archive(format!(
                    "zip archives cannot be written through {} compression",
                    c.name()
                )))
            },
        }
        Ok(())
    }
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
        }
    }

    pub fn suffix(self) -> &'static str {
        self.name()
    }
}

fn read_tar<R: Read>(reader: R, tx: &mpsc::Sender<Result<Packet>>) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let size = entry.size();
        let payload = read_payload(&mut entry, size, &name)?;
        trace!(entry = %name, bytes = payload.len(), "read tar entry");

        if tx.blocking_send(Ok(Packet::new(name, payload))).is_err() {
            debug!("archive reader dropped, stopping tar scan");
            break;
        }
    }
    Ok(())
}

fn read_zip(file: File, tx: &mpsc::Sender<Result<Packet>>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let size = entry.size();
        let payload = read_payload(&mut entry, size, &name)?;
        trace!(entry = %name, bytes = payload.len(), "read zip entry");

        if tx.blocking_send(Ok(Packet::new(name, payload))).is_err() {
            debug!("archive reader dropped, stopping zip scan");
            break;
        }
    }
    Ok(())
}

/// Read an entry whose header claims `size` bytes
///
/// The claimed size only bounds the read; it is never trusted for
/// allocation, and an entry that ends early is an archive error.
fn read_payload<R: Read>(reader: &mut R, size: u64, name: &str) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(size.min(MAX_PREALLOCATION) as usize);
    reader
        .take(size)
        .read_to_end(&mut payload)
        .map_err(|e| KnapsackError::Archive(format!("cannot read entry {}: {}", name, e)))?;
    if (payload.len() as u64) < size {
        return Err(KnapsackError::Archive(format!(
            "entry {} is truncated: header claims {} bytes, found {}",
            name,
            size,
            payload.len()
        )));
    }
    Ok(payload)
}

fn write_tar<W: Write>(writer: W, rx: &mut mpsc::Receiver<Packet>) -> Result<W> {
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;
    let mut builder = tar::Builder::new(writer);

    while let Some(packet) = rx.blocking_recv() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(packet.payload().len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        builder.append_data(&mut header, packet.name(), packet.payload())?;
    }

    Ok(builder.into_inner()?)
}

fn write_zip(file: File, rx: &mut mpsc::Receiver<Packet>) -> Result<()> {
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    while let Some(packet) = rx.blocking_recv() {
        zip.start_file(packet.name(), options).map_err(zip_error)?;
        zip.write_all(packet.payload())?;
    }

    let mut out = zip.finish().map_err(zip_error)?;
    out.flush()?;
    Ok(())
}

fn zip_error(err: zip::result::ZipError) -> KnapsackError {
    match err {
        zip::result::ZipError::Io(e) => KnapsackError::Io(e),
        other => KnapsackError::Archive(other.to_string()),
    }
}
