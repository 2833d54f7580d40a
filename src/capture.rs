//! Response capture at the output sink.
//!
//! [`CaptureBody`] sits between a response body and the connection. Every
//! data frame the connection pulls is forwarded untouched and also recorded.
//! Once the final frame has been handed over, the attached delivery hook
//! receives the exact bytes the client was sent.
//!
//! ```text
//! handler ─▶ Response ─▶ CaptureBody ─▶ hyper ─▶ socket
//!                            │
//!                            └─ last frame pulled ─▶ hook(bytes)
//! ```
//!
//! If the connection drops the body early (client went away, write error),
//! the hook is discarded unfired. Anything hanging off the hook therefore
//! only ever sees a response that was delivered in full.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use tracing::debug;

/// Called once with the delivered body bytes.
pub type DeliveryHook = Box<dyn FnOnce(Bytes) + Send + 'static>;

/// An outgoing body that records what it forwards.
pub struct CaptureBody<B = Full<Bytes>> {
    inner: B,
    hook: Option<DeliveryHook>,
    frames: Vec<Bytes>,
}

impl<B> CaptureBody<B> {
    /// Wraps `inner`. With no hook this is a plain pass-through.
    pub fn new(inner: B, hook: Option<DeliveryHook>) -> Self {
        Self { inner, hook, frames: Vec::new() }
    }

    fn complete(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(concat(std::mem::take(&mut self.frames)));
        }
    }
}

/// Joins recorded frames. A single frame is returned as-is, no copy.
fn concat(mut frames: Vec<Bytes>) -> Bytes {
    match frames.len() {
        0 => Bytes::new(),
        1 => frames.pop().unwrap_or_default(),
        _ => {
            let mut buf = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
            for frame in &frames {
                buf.extend_from_slice(frame);
            }
            buf.freeze()
        }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if this.hook.is_some() {
                    if let Some(data) = frame.data_ref() {
                        this.frames.push(data.clone());
                    }
                }
                // hyper stops polling once `is_end_stream` turns true, so the
                // last data frame is the completion point, not the `None`.
                if this.inner.is_end_stream() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                this.hook = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.complete();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        if self.hook.is_some() {
            debug!("response body dropped before delivery completed, capture discarded");
        }
    }
}
