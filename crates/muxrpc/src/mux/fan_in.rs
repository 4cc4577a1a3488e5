//! Merges every outbound frame onto the single write half.

use super::source::OutboundSource;
use crate::protocol::EncodedFrame;
use futures::stream::{SelectAll, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// The stream of frames written to the transport.
///
/// Three inputs feed it: single frames pushed on the control queue
/// (requests and async replies), new outbound sources arriving on the attach
/// queue, and the active sources themselves. Control frames and source
/// frames take turns so a busy source cannot starve replies. Frames from one
/// source keep their order.
///
/// The transport writer pulls from this stream only when it can accept more
/// bytes, so a slow transport stops sources from being polled.
///
/// The stream ends when every input has closed, or, once the idle signal
/// set by [`finish_when_idle`](Self::finish_when_idle) fires, as soon as no
/// frame is ready.
#[derive(Debug)]
pub struct FanIn {
    control: mpsc::UnboundedReceiver<EncodedFrame>,
    attach: mpsc::UnboundedReceiver<OutboundSource>,
    sources: SelectAll<OutboundSource>,
    control_closed: bool,
    attach_closed: bool,
    control_first: bool,
    idle_signal: Option<oneshot::Receiver<()>>,
    draining: bool,
}

impl FanIn {
    /// Build a fan-in over the two queues.
    #[must_use]
    pub fn new(
        control: mpsc::UnboundedReceiver<EncodedFrame>,
        attach: mpsc::UnboundedReceiver<OutboundSource>,
    ) -> Self {
        Self {
            control,
            attach,
            sources: SelectAll::new(),
            control_closed: false,
            attach_closed: false,
            control_first: true,
            idle_signal: None,
            draining: false,
        }
    }

    /// End the stream at the first moment nothing is ready, once `signal`
    /// receives a value. Dropping the sender leaves the stream running.
    pub fn finish_when_idle(&mut self, signal: oneshot::Receiver<()>) {
        self.idle_signal = Some(signal);
    }

    /// Number of sources still producing.
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    fn poll_idle_signal(&mut self, cx: &mut Context<'_>) {
        if let Some(signal) = self.idle_signal.as_mut() {
            if let Poll::Ready(result) = Pin::new(signal).poll(cx) {
                self.idle_signal = None;
                self.draining = result.is_ok();
            }
        }
    }

    fn adopt_sources(&mut self, cx: &mut Context<'_>) {
        while !self.attach_closed {
            match self.attach.poll_recv(cx) {
                Poll::Ready(Some(source)) => self.sources.push(source),
                Poll::Ready(None) => self.attach_closed = true,
                Poll::Pending => break,
            }
        }
    }

    fn poll_control(&mut self, cx: &mut Context<'_>) -> Option<EncodedFrame> {
        if self.control_closed {
            return None;
        }
        match self.control.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Some(frame),
            Poll::Ready(None) => {
                self.control_closed = true;
                None
            }
            Poll::Pending => None,
        }
    }

    fn poll_sources(&mut self, cx: &mut Context<'_>) -> Option<EncodedFrame> {
        // An empty set reports Ready(None); that only means nothing is active.
        match self.sources.poll_next_unpin(cx) {
            Poll::Ready(frame) => frame,
            Poll::Pending => None,
        }
    }
}

impl Stream for FanIn {
    type Item = EncodedFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.poll_idle_signal(cx);
        this.adopt_sources(cx);

        let control_first = this.control_first;
        this.control_first = !control_first;

        let next = if control_first {
            this.poll_control(cx).or_else(|| this.poll_sources(cx))
        } else {
            this.poll_sources(cx).or_else(|| this.poll_control(cx))
        };

        match next {
            Some(frame) => Poll::Ready(Some(frame)),
            None if this.draining => Poll::Ready(None),
            None if this.control_closed && this.attach_closed && this.sources.is_empty() => {
                Poll::Ready(None)
            }
            None => Poll::Pending,
        }
    }
}
