//! Streaming body relay.
//!
//! Wraps a body so frames pass through untouched while the owner learns how
//! the stream ended. Used in both directions: the inbound request body going
//! upstream, and the upstream response body going back to the client.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::BoxError;
use hyper::body::{Body, Frame, SizeHint};
use parking_lot::Mutex;
use tokio::time::{Instant, Sleep};

/// How a relayed stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every frame was delivered and the inner body reported its end.
    Complete,
    /// The inner body produced an error, or went idle for too long.
    Failed,
    /// The relay was dropped before the stream finished.
    Abandoned,
}

type OnEnd = Box<dyn FnOnce(StreamEnd) + Send>;

/// Last time traffic moved through an exchange. Cheap to clone.
#[derive(Clone)]
pub struct Activity {
    last: Arc<Mutex<Instant>>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Resolve once `window` has passed without a [`Activity::touch`].
    pub async fn idle_for(&self, window: Duration) {
        loop {
            let deadline = *self.last.lock() + window;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// A body adapter that reports its termination exactly once.
pub struct RelayBody<B: Body> {
    inner: B,
    on_end: Option<OnEnd>,
    idle: Option<(Duration, Pin<Box<Sleep>>)>,
    activity: Option<Activity>,
}

/// Raised when a relayed stream stays silent past its idle window.
#[derive(Debug)]
pub struct IdleTimeout(Duration);

impl fmt::Display for IdleTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream idle for more than {:?}", self.0)
    }
}

impl std::error::Error for IdleTimeout {}

impl<B: Body> RelayBody<B> {
    pub fn new(inner: B, on_end: impl FnOnce(StreamEnd) + Send + 'static) -> Self {
        Self {
            inner,
            on_end: Some(Box::new(on_end)),
            idle: None,
            activity: None,
        }
    }

    /// Touch `activity` on every frame that passes through.
    pub fn with_activity(mut self, activity: Activity) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Abort the stream when no frame arrives within `window`.
    pub fn with_idle_timeout(mut self, window: Duration) -> Self {
        self.idle = Some((window, Box::pin(tokio::time::sleep(window))));
        self
    }

    fn finish(&mut self, end: StreamEnd) {
        if let Some(on_end) = self.on_end.take() {
            on_end(end);
        }
    }
}

impl<B> Body for RelayBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some((window, sleep)) = this.idle.as_mut() {
                    sleep.as_mut().reset(Instant::now() + *window);
                }
                if let Some(activity) = &this.activity {
                    activity.touch();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(StreamEnd::Failed);
                Poll::Ready(Some(Err(err.into())))
            }
            Poll::Ready(None) => {
                this.finish(StreamEnd::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some((window, sleep)) = this.idle.as_mut() {
                    if sleep.as_mut().poll(cx).is_ready() {
                        let window = *window;
                        this.finish(StreamEnd::Failed);
                        return Poll::Ready(Some(Err(Box::new(IdleTimeout(window)))));
                    }
                }
                Poll::Pending
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

impl<B: Body> Drop for RelayBody<B> {
    fn drop(&mut self) {
        // Bodies that are already exhausted (empty, or the last frame was
        // taken) may never be polled to `None`.
        let end = if self.inner.is_end_stream() {
            StreamEnd::Complete
        } else {
            StreamEnd::Abandoned
        };
        self.finish(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body as AxumBody, Bytes};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<StreamEnd>>>, impl FnOnce(StreamEnd) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |end| sink.lock().unwrap().push(end))
    }

    #[tokio::test]
    async fn reports_completion_once() {
        let (seen, on_end) = recorder();
        let relay = RelayBody::new(AxumBody::from("<ENVELOPE/>"), on_end);

        let bytes = to_bytes(AxumBody::new(relay), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<ENVELOPE/>");
        assert_eq!(*seen.lock().unwrap(), vec![StreamEnd::Complete]);
    }

    fn never_ending() -> AxumBody {
        AxumBody::from_stream(futures_util::stream::pending::<Result<Bytes, std::io::Error>>())
    }

    #[tokio::test]
    async fn dropping_unread_body_is_abandoned() {
        let (seen, on_end) = recorder();
        drop(RelayBody::new(never_ending(), on_end));

        assert_eq!(*seen.lock().unwrap(), vec![StreamEnd::Abandoned]);
    }

    #[test]
    fn empty_body_counts_as_complete_when_dropped() {
        let (seen, on_end) = recorder();
        drop(RelayBody::new(AxumBody::empty(), on_end));
        assert_eq!(*seen.lock().unwrap(), vec![StreamEnd::Complete]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_fails_after_idle_window() {
        let (seen, on_end) = recorder();
        let relay = RelayBody::new(never_ending(), on_end).with_idle_timeout(Duration::from_secs(2));

        assert!(to_bytes(AxumBody::new(relay), usize::MAX).await.is_err());
        assert_eq!(*seen.lock().unwrap(), vec![StreamEnd::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_window_restarts_on_touch() {
        let activity = Activity::new();
        let window = Duration::from_millis(300);
        let started = Instant::now();

        let toucher = {
            let activity = activity.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    activity.touch();
                }
            })
        };

        activity.idle_for(window).await;
        toucher.await.unwrap();
        // Last touch at 500ms, so the window closes at 800ms.
        assert_eq!(started.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn frames_touch_activity() {
        let activity = Activity::new();
        let before = *activity.last.lock();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let relay = RelayBody::new(AxumBody::from("<ENVELOPE/>"), |_| {}).with_activity(activity.clone());
        to_bytes(AxumBody::new(relay), usize::MAX).await.unwrap();

        assert!(*activity.last.lock() > before);
    }
}
