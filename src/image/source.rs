//! Lazy, replayable layer byte streams.
//!
//! A layer is modeled as a factory: every call to [`LayerSource::open`]
//! yields a fresh single-pass stream over the entry's bytes, so an upload
//! that has to restart can simply open again. Reads happen on the blocking
//! pool and cross into async land over a small channel, which also applies
//! backpressure when the network is the slow side.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;

use super::EntryLocator;

const CHANNEL_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub(crate) struct LayerSource {
    tar_path: PathBuf,
    locator: EntryLocator,
}

impl LayerSource {
    pub(crate) fn new(tar_path: PathBuf, locator: EntryLocator) -> Self {
        LayerSource { tar_path, locator }
    }

    pub(crate) fn size(&self) -> u64 {
        self.locator.size
    }

    /// Start a fresh pass over the layer bytes, yielding owned chunks of at
    /// most `chunk_size`. Must be called from within a tokio runtime.
    pub(crate) fn open(&self, chunk_size: usize) -> ReceiverStream<io::Result<Bytes>> {
        let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        let path = self.tar_path.clone();
        let EntryLocator { offset, size } = self.locator;

        tokio::task::spawn_blocking(move || {
            let read_all = || -> io::Result<()> {
                let mut file = File::open(&path)?;
                file.seek(SeekFrom::Start(offset))?;
                let mut remaining = size;
                while remaining > 0 {
                    let take = remaining.min(chunk_size as u64) as usize;
                    let mut buf = vec![0u8; take];
                    file.read_exact(&mut buf)?;
                    remaining -= take as u64;
                    // receiver gone means the upload was dropped; stop quietly
                    if tx.blocking_send(Ok(Bytes::from(buf))).is_err() {
                        return Ok(());
                    }
                }
                Ok(())
            };
            if let Err(err) = read_all() {
                let _ = tx.blocking_send(Err(err));
            }
        });

        ReceiverStream::new(rx)
    }

    /// Read the whole layer into memory. Reserved for blobs under the
    /// monolithic-upload threshold.
    pub(crate) async fn read_all(&self) -> io::Result<Bytes> {
        let path = self.tar_path.clone();
        let EntryLocator { offset, size } = self.locator;

        tokio::task::spawn_blocking(move || {
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; size as usize];
            file.read_exact(&mut buf)?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(io::Error::other)?
    }
}
