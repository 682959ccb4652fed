//! Bounded in-memory byte pipe between one producer and one consumer.
//!
//! Bytes travel as owned chunks over a bounded channel, so a producer that
//! runs ahead of its consumer blocks once `depth` chunks are queued. Closing
//! either end is observable from the other: a closed reader turns writes into
//! `BrokenPipe`, a dropped writer turns reads into end-of-stream.

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// Default number of chunks buffered between producer and consumer.
pub const DEFAULT_PIPE_DEPTH: usize = 16;

/// Creates a pipe holding at most `depth` chunks (minimum 1).
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(depth.max(1));
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx: Some(rx),
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

/// Payload of the `BrokenPipe` a writer gets once the reader is closed.
#[derive(Debug, Error)]
#[error("pipe reader closed")]
struct ReaderClosed;

/// Whether `err` is the write failure caused by closing the pipe's reader,
/// as opposed to a `BrokenPipe` from anywhere else.
pub fn is_reader_closed(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<ReaderClosed>())
}

/// Producer side of a [`pipe`].
pub struct PipeWriter {
    tx: Option<Sender<Vec<u8>>>,
}

impl PipeWriter {
    /// Signals end-of-stream to the reader. Also happens on drop.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed"))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, ReaderClosed))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Consumer side of a [`pipe`].
pub struct PipeReader {
    rx: Option<Receiver<Vec<u8>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    /// Closes the consumer side. Blocked and future writes fail.
    pub fn close(&mut self) {
        self.rx = None;
        self.chunk = Vec::new();
        self.pos = 0;
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.chunk.len() {
            let Some(rx) = self.rx.as_ref() else {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"));
            };
            match rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // Every sender is gone: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn bytes_arrive_in_order() {
        let (mut w, mut r) = pipe(2);
        let producer = thread::spawn(move || {
            for i in 0..100u8 {
                w.write_all(&[i; 10]).unwrap();
            }
        });
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        producer.join().unwrap();

        let expected: Vec<u8> = (0..100u8).flat_map(|i| [i; 10]).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn small_reads_split_chunks() {
        let (mut w, mut r) = pipe(4);
        w.write_all(b"hello").unwrap();
        w.close();
        let mut buf = [0u8; 2];
        assert_eq!(r.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"he");
        let mut rest = Vec::new();
        r.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"llo");
    }

    #[test]
    fn closing_reader_unblocks_full_writer() {
        let (mut w, mut r) = pipe(1);
        w.write_all(b"fills the only slot").unwrap();
        let producer = thread::spawn(move || w.write_all(b"blocks until reader closes"));
        r.close();
        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(is_reader_closed(&err));
    }

    #[test]
    fn other_broken_pipes_are_not_reader_closes() {
        let foreign = io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed");
        assert!(!is_reader_closed(&foreign));
        assert!(!is_reader_closed(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn empty_writes_send_nothing() {
        let (mut w, mut r) = pipe(1);
        assert_eq!(w.write(&[]).unwrap(), 0);
        drop(w);
        let mut out = Vec::new();
        assert_eq!(r.read_to_end(&mut out).unwrap(), 0);
    }
}
