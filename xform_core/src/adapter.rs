//! Pull-style reader over an encoder that only knows how to push.
//!
//! Some coders expose a single blocking "read all input, write all output"
//! call. [`PullEncoder`] runs that call on a dedicated worker thread feeding
//! a bounded [`pipe`](crate::pipe), and exposes the consumer side of the pipe
//! as a [`Read`] impl.
//!
//! ```text
//! source ─▶ DigestReader ─▶ encoder (worker) ─▶ PipeWriter ══▶ PipeReader ─▶ caller
//!                                        header ─┘ (written before spawn)
//! ```
//!
//! Lifecycle rules:
//! - The coder header is pushed into the pipe on the constructing thread, so
//!   it is always the first thing a reader sees.
//! - A failure on the worker, including a panic inside the encoder, is
//!   recorded before the producer side is dropped and is re-raised on the
//!   caller's next read, so output never ends silently short.
//! - [`PullEncoder::close`] closes the consumer side first, which fails any
//!   write the worker is blocked on, and only then joins the worker. The
//!   digest of the raw input is complete only after that join.

use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{closed_stream_error, Result, TransformError};
use crate::instrument::{DigestReader, StreamDigest};
use crate::pipe::{is_reader_closed, pipe, PipeReader};

/// A coder that can only run as one blocking stream-to-stream call.
pub trait BlockingEncoder: Send + 'static {
    /// Writes the coder header/properties. Runs on the constructing thread.
    fn write_header(&mut self, out: &mut dyn Write) -> io::Result<()>;

    /// Encodes `input` until EOF into `out`. Runs on the worker thread.
    fn encode(self, input: &mut dyn Read, out: &mut dyn Write) -> io::Result<()>;
}

type FailureSlot = Arc<Mutex<Option<io::Error>>>;

/// Reports whether an encoder worker thread is still alive.
#[derive(Clone, Debug)]
pub struct WorkerProbe {
    running: Arc<AtomicBool>,
}

impl WorkerProbe {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Encoded-byte reader backed by one background encoder worker.
///
/// Single-use: one consumer, one pass, one close.
pub struct PullEncoder {
    reader: PipeReader,
    worker: Option<JoinHandle<Result<StreamDigest>>>,
    failure: FailureSlot,
    running: Arc<AtomicBool>,
    produced: u64,
    eof: bool,
}

impl PullEncoder {
    /// Writes the encoder header into a fresh pipe of `depth` chunks and
    /// starts the worker that encodes `source` behind it.
    pub fn spawn<R, E>(source: R, mut encoder: E, depth: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        E: BlockingEncoder,
    {
        let (mut writer, reader) = pipe(depth);

        // One chunk, so a depth-1 pipe can hold it without a consumer.
        let mut header = Vec::new();
        encoder.write_header(&mut header)?;
        writer.write_all(&header)?;

        let failure: FailureSlot = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let guard = RunningGuard(Arc::clone(&running));
        let worker_failure = Arc::clone(&failure);

        let worker = thread::Builder::new()
            .name("xform-encoder".into())
            .spawn(move || {
                let _guard = guard;
                let mut input = DigestReader::new(source);
                let encoded =
                    panic::catch_unwind(AssertUnwindSafe(|| encoder.encode(&mut input, &mut writer)))
                        .unwrap_or_else(|_| Err(io::Error::other("encoder worker panicked")));
                if let Err(err) = encoded {
                    debug!(error = %err, read = input.byte_count(), "encoder worker stopped with an error");
                    *worker_failure.lock() = Some(err);
                }
                // Failure is recorded first so a reader seeing EOF also sees it.
                writer.close();
                input.close();
                input.digest()
            })?;
        debug!(depth, header_len = header.len(), "spawned encoder worker");

        Ok(Self {
            reader,
            worker: Some(worker),
            failure,
            running,
            produced: 0,
            eof: false,
        })
    }

    /// Encoded bytes handed to the caller so far.
    pub fn byte_count(&self) -> u64 {
        self.produced
    }

    pub fn worker_probe(&self) -> WorkerProbe {
        WorkerProbe {
            running: Arc::clone(&self.running),
        }
    }

    fn raise_failure(&self) -> io::Result<()> {
        match self.failure.lock().as_ref() {
            Some(err) => Err(io::Error::new(err.kind(), err.to_string())),
            None => Ok(()),
        }
    }

    /// Stops the encoder, waits for the worker, and returns the digest of
    /// the raw input it consumed.
    ///
    /// Closing before end-of-stream is allowed; the digest then covers only
    /// the input read so far. Any encoder failure other than the one caused
    /// by this early close is returned here.
    pub fn close(&mut self) -> io::Result<StreamDigest> {
        let worker = self
            .worker
            .take()
            .ok_or(TransformError::IllegalState("encoder already closed"))?;
        let early = !self.eof;

        self.reader.close();
        let joined = worker.join();
        let failure = self.failure.lock().take();
        let digest = joined.map_err(|_| io::Error::other("encoder worker panicked"))?;

        if let Some(err) = failure {
            if !(early && is_reader_closed(&err)) {
                return Err(err);
            }
            debug!(produced = self.produced, "encoder stopped by early close");
        }
        let digest = digest?;
        debug!(read = digest.bytes, produced = self.produced, "encoder worker joined");
        Ok(digest)
    }
}

impl Read for PullEncoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.worker.is_none() {
            return Err(closed_stream_error());
        }
        self.raise_failure()?;
        let n = self.reader.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.raise_failure()?;
            self.eof = true;
        }
        self.produced += n as u64;
        Ok(n)
    }
}

impl Drop for PullEncoder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.close() {
                warn!(error = %err, "encoder failure discarded on drop");
            }
        }
    }
}
