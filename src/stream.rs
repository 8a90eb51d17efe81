//! In-memory stream adapters for document payloads

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_util::Stream;
use parking_lot::Mutex;

/// Maximum number of bytes emitted per chunk.
pub const READ_CHUNK_SIZE: usize = 8192;

struct PauseState {
  paused: bool,
  waker: Option<Waker>,
}

/// Handle to pause and resume a [`ChunkedReadStream`].
#[derive(Clone)]
pub struct PauseHandle {
  state: Arc<Mutex<PauseState>>,
}

impl PauseHandle {
  /// Stop chunk emission until [`resume`](Self::resume) is called.
  pub fn pause(&self) {
    self.state.lock().paused = true;
  }

  /// Resume chunk emission.
  pub fn resume(&self) {
    let mut state = self.state.lock();
    state.paused = false;
    if let Some(waker) = state.waker.take() {
      waker.wake();
    }
  }
}

/// Lazy in-memory read stream over a document payload.
///
/// Emits the payload in chunks of at most [`READ_CHUNK_SIZE`] bytes, one
/// chunk per scheduler turn so concurrent tasks interleave. The stream ends
/// (yields `None`) once the payload is exhausted.
pub struct ChunkedReadStream {
  content: Vec<u8>,
  position: usize,
  emit_ready: bool,
  state: Arc<Mutex<PauseState>>,
}

impl ChunkedReadStream {
  pub fn new(content: Vec<u8>) -> Self {
    Self {
      content,
      position: 0,
      emit_ready: false,
      state: Arc::new(Mutex::new(PauseState {
        paused: false,
        waker: None,
      })),
    }
  }

  /// Total payload length in bytes.
  pub fn len(&self) -> usize {
    self.content.len()
  }

  pub fn is_empty(&self) -> bool {
    self.content.is_empty()
  }

  /// A handle for cooperative backpressure.
  pub fn pause_handle(&self) -> PauseHandle {
    PauseHandle {
      state: self.state.clone(),
    }
  }

  /// Drain the remaining chunks into a single buffer.
  pub async fn read_to_end(mut self) -> Vec<u8> {
    use futures_util::StreamExt;

    let mut out = Vec::with_capacity(self.content.len() - self.position);
    while let Some(chunk) = self.next().await {
      out.extend_from_slice(&chunk);
    }
    out
  }
}

impl Stream for ChunkedReadStream {
  type Item = Vec<u8>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();

    {
      let mut state = this.state.lock();
      if state.paused {
        state.waker = Some(cx.waker().clone());
        return Poll::Pending;
      }
    }

    if this.position >= this.content.len() {
      return Poll::Ready(None);
    }

    // Yield once per chunk so other tasks get a turn between chunks.
    if !this.emit_ready {
      this.emit_ready = true;
      cx.waker().wake_by_ref();
      return Poll::Pending;
    }
    this.emit_ready = false;

    let end = (this.position + READ_CHUNK_SIZE).min(this.content.len());
    let chunk = this.content[this.position..end].to_vec();
    this.position = end;
    Poll::Ready(Some(chunk))
  }
}

/// Write sink accumulating a document payload in memory.
///
/// The queue-limit surface exists for symmetry with the streaming callers
/// but is a no-op at this layer: the queue is never full.
#[derive(Debug, Default)]
pub struct ByteWriteSink {
  buffer: Vec<u8>,
}

impl ByteWriteSink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append bytes to the pending payload.
  pub fn write(&mut self, data: &[u8]) {
    self.buffer.extend_from_slice(data);
  }

  pub fn set_write_queue_max_size(&mut self, _max_size: usize) {}

  pub fn write_queue_full(&self) -> bool {
    false
  }

  /// Bytes collected so far.
  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  /// Consume the sink, yielding the collected payload.
  pub fn into_bytes(self) -> Vec<u8> {
    self.buffer
  }
}
