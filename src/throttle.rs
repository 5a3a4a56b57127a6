//! Bandwidth throttling for outbound downloads.
//!
//! Chunks are forwarded as soon as they are produced. After each chunk the
//! stream works out how long that chunk should have taken at the configured
//! rate and holds back the next one for whatever part of that time has not
//! already elapsed. The result is an average-rate limit that tolerates bursts
//! at chunk boundaries.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Converts the configured MB/s into bytes per second. Non-positive values
/// disable throttling.
pub fn bytes_per_second_from_mbps(mbps: f64) -> Option<f64> {
    if mbps.is_finite() && mbps > 0.0 {
        Some(mbps * 1024.0 * 1024.0)
    } else {
        None
    }
}

/// Pacing arithmetic, kept apart from the stream so it can be reasoned about
/// with explicit instants.
#[derive(Debug, Clone)]
pub struct Pacer {
    bytes_per_second: f64,
    last_push: Instant,
}

impl Pacer {
    pub fn new(bytes_per_second: f64, now: Instant) -> Self {
        Self {
            bytes_per_second,
            last_push: now,
        }
    }

    /// Delay to apply after pushing `chunk_len` bytes at `now`.
    pub fn after_chunk(&mut self, chunk_len: usize, now: Instant) -> Duration {
        let required = Duration::from_secs_f64(chunk_len as f64 / self.bytes_per_second);
        let since_last = now.saturating_duration_since(self.last_push);
        let delay = required.saturating_sub(since_last);
        self.last_push = now + delay;
        delay
    }
}

pub struct ThrottledStream<S> {
    inner: S,
    pacer: Option<Pacer>,
    pending_delay: Option<Pin<Box<Sleep>>>,
}

impl<S> ThrottledStream<S> {
    /// `bytes_per_second` of `None` passes the stream through untouched.
    pub fn new(inner: S, bytes_per_second: Option<f64>) -> Self {
        Self {
            inner,
            pacer: bytes_per_second
                .filter(|bps| *bps > 0.0)
                .map(|bps| Pacer::new(bps, Instant::now())),
            pending_delay: None,
        }
    }
}

impl<S, B, E> Stream for ThrottledStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<B, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(delay) = this.pending_delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            this.pending_delay = None;
        }

        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));
        if let (Some(Ok(chunk)), Some(pacer)) = (&item, this.pacer.as_mut()) {
            let delay = pacer.after_chunk(chunk.as_ref().len(), Instant::now());
            if !delay.is_zero() {
                this.pending_delay = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
        Poll::Ready(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io;

    #[test]
    fn converts_megabytes_per_second() {
        assert_eq!(bytes_per_second_from_mbps(5.0), Some(5.0 * 1024.0 * 1024.0));
        assert_eq!(bytes_per_second_from_mbps(0.0), None);
        assert_eq!(bytes_per_second_from_mbps(-1.0), None);
        assert_eq!(bytes_per_second_from_mbps(f64::NAN), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_charges_only_the_shortfall() {
        let start = Instant::now();
        let mut pacer = Pacer::new(1000.0, start);

        // 500 bytes need 500ms; nothing elapsed yet.
        assert_eq!(pacer.after_chunk(500, start), Duration::from_millis(500));

        // Next chunk arrives 700ms after the delayed push: already paid for.
        let later = start + Duration::from_millis(1200);
        assert_eq!(pacer.after_chunk(500, later), Duration::ZERO);

        // 200ms after that, a 1000 byte chunk still owes 800ms.
        let then = later + Duration::from_millis(200);
        assert_eq!(pacer.after_chunk(1000, then), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_drains_at_configured_rate() {
        let chunks: Vec<Result<Vec<u8>, io::Error>> = (0..3).map(|_| Ok(vec![0u8; 1000])).collect();
        let start = Instant::now();

        let mut stream = ThrottledStream::new(futures::stream::iter(chunks), Some(1000.0));
        let mut received = 0;
        while let Some(chunk) = stream.next().await {
            received += chunk.unwrap().len();
        }

        assert_eq!(received, 3000);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3100), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn first_chunk_is_not_delayed() {
        let chunks: Vec<Result<Vec<u8>, io::Error>> = vec![Ok(vec![1u8; 4000])];
        let start = Instant::now();

        let mut stream = ThrottledStream::new(futures::stream::iter(chunks), Some(1000.0));
        let first = stream.next().await.unwrap().unwrap();

        assert_eq!(first.len(), 4000);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unthrottled_stream_passes_through() {
        let chunks: Vec<Result<Vec<u8>, io::Error>> = (0..5).map(|_| Ok(vec![0u8; 1_000_000])).collect();
        let start = Instant::now();

        let collected: Vec<_> = ThrottledStream::new(futures::stream::iter(chunks), None)
            .collect()
            .await;

        assert_eq!(collected.len(), 5);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_forwarded() {
        let chunks: Vec<Result<Vec<u8>, io::Error>> = vec![
            Ok(vec![0u8; 10]),
            Err(io::Error::new(io::ErrorKind::Other, "disk")),
        ];
        let collected: Vec<_> = ThrottledStream::new(futures::stream::iter(chunks), Some(10.0))
            .collect()
            .await;

        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }
}
