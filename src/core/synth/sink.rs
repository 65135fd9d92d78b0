//! Delivery of audio frames to the consumer.
//!
//! A session writes into an [`AudioSink`]; the caller reads the matching
//! [`AudioStream`]. The stream is lazy: the session driving it is spawned the
//! first time the stream is polled, so an unpolled stream never touches the
//! connection.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::base::{AudioFrame, SynthError, SynthResult};

/// Writing half: frames go out in order, an error goes out at most once.
pub struct AudioSink {
    tx: mpsc::Sender<SynthResult<AudioFrame>>,
    failed: bool,
    delivered: usize,
}

impl AudioSink {
    fn new(tx: mpsc::Sender<SynthResult<AudioFrame>>) -> Self {
        Self {
            tx,
            failed: false,
            delivered: 0,
        }
    }

    /// Hand a frame to the consumer.
    ///
    /// Returns false when the consumer is gone (or an error was already
    /// delivered); the producer should stop.
    pub async fn deliver(&mut self, frame: AudioFrame) -> bool {
        if self.failed {
            return false;
        }
        if self.tx.send(Ok(frame)).await.is_err() {
            debug!("Audio consumer dropped the stream");
            return false;
        }
        self.delivered += 1;
        true
    }

    /// Signal a terminal error. Later calls are ignored.
    pub async fn fail(&mut self, error: SynthError) {
        if self.failed {
            return;
        }
        self.failed = true;
        let _ = self.tx.send(Err(error)).await;
    }

    /// Frames successfully delivered.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Whether the consumer dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ordered, lazily started sequence of audio frames.
///
/// Yields `Ok(frame)` items and at most one `Err`, after which it ends.
pub struct AudioStream {
    rx: mpsc::Receiver<SynthResult<AudioFrame>>,
    pending: Option<BoxFuture<'static, ()>>,
    task: Option<JoinHandle<()>>,
    finished: bool,
}

impl AudioStream {
    /// Build a stream whose frames are produced by `producer`.
    ///
    /// `producer` is called immediately to build its future, which only
    /// starts running on the first poll.
    pub fn lazy<F, Fut>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(AudioSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let driver = producer(AudioSink::new(tx));
        Self {
            rx,
            pending: Some(Box::pin(driver)),
            task: None,
            finished: false,
        }
    }

    /// A stream with no frames.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            rx,
            pending: None,
            task: None,
            finished: true,
        }
    }

    /// Whether the producing session has been started.
    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    /// Read the whole stream.
    ///
    /// Returns every frame received and the terminal error, if any.
    pub async fn collect_frames(mut self) -> (Vec<AudioFrame>, Option<SynthError>) {
        use futures::StreamExt;

        let mut frames = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(frame) => frames.push(frame),
                Err(e) => return (frames, Some(e)),
            }
        }
        (frames, None)
    }
}

impl Stream for AudioStream {
    type Item = SynthResult<AudioFrame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(driver) = this.pending.take() {
            this.task = Some(tokio::spawn(driver));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                this.rx.close();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("started", &self.is_started())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn frame(byte: u8) -> AudioFrame {
        AudioFrame::new(Bytes::from(vec![byte; 4]), 24000, 1)
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let mut stream = AudioStream::lazy(4, move |mut sink| async move {
            flag.store(true, Ordering::SeqCst);
            sink.deliver(frame(1)).await;
        });

        tokio::task::yield_now().await;
        assert!(!started.load(Ordering::SeqCst));
        assert!(!stream.is_started());

        assert_eq!(stream.next().await.unwrap().unwrap(), frame(1));
        assert!(started.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let stream = AudioStream::lazy(1, |mut sink| async move {
            for i in 0..5 {
                sink.deliver(frame(i)).await;
            }
        });

        let (frames, error) = stream.collect_frames().await;
        assert!(error.is_none());
        let firsts: Vec<u8> = frames.iter().map(|f| f.data[0]).collect();
        assert_eq!(firsts, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_is_terminal_and_single() {
        let mut stream = AudioStream::lazy(4, |mut sink| async move {
            sink.deliver(frame(1)).await;
            sink.fail(SynthError::StreamInitTimeout).await;
            sink.fail(SynthError::SynthesisTimeout).await;
            assert!(!sink.deliver(frame(2)).await);
        });

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(
            stream.next().await.unwrap().unwrap_err(),
            SynthError::StreamInitTimeout
        );
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_sees_dropped_consumer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut stream = AudioStream::lazy(1, move |mut sink| async move {
            let mut delivered = true;
            while delivered {
                delivered = sink.deliver(frame(0)).await;
            }
            let _ = done_tx.send(sink.is_closed());
        });

        assert!(stream.next().await.is_some());
        drop(stream);
        assert!(done_rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (frames, error) = AudioStream::empty().collect_frames().await;
        assert!(frames.is_empty());
        assert!(error.is_none());
    }
}
