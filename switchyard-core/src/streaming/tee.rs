//! Fan-out of a streamed body to a telemetry consumer

use super::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Buffered chunks the stats branch may lag behind the client
pub const DEFAULT_STATS_CAPACITY: usize = 256;

/// Split a stream into a client branch and a bounded stats branch
///
/// The client branch yields every item of `input` unchanged. Each successful
/// chunk is offered to the stats branch with `try_send`: when the buffer is
/// full or the receiver is gone the chunk is dropped for stats only, so the
/// client never waits on telemetry. The stats receiver closes when the client
/// branch finishes or is dropped.
pub fn tee_for_stats(input: ByteStream, capacity: usize) -> (ByteStream, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut lagged = false;

    let client = input.inspect(move |item| {
        if let Ok(chunk) = item {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    if !lagged {
                        debug!("Stats branch lagging; dropping chunks for telemetry only");
                        lagged = true;
                    }
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    });

    (Box::pin(client), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use futures::stream;

    fn chunks(n: usize) -> ByteStream {
        Box::pin(stream::iter(
            (0..n).map(|i| Ok::<_, GatewayError>(Bytes::from(format!("c{}", i)))),
        ))
    }

    #[tokio::test]
    async fn test_both_branches_see_chunks_in_order() {
        let (client, mut rx) = tee_for_stats(chunks(3), 8);
        let seen: Vec<Bytes> = client.map(Result::unwrap).collect().await;
        assert_eq!(seen.len(), 3);

        let mut stats = Vec::new();
        while let Some(chunk) = rx.recv().await {
            stats.push(chunk);
        }
        assert_eq!(stats, seen);
    }

    #[tokio::test]
    async fn test_full_stats_buffer_never_blocks_client() {
        let (client, mut rx) = tee_for_stats(chunks(100), 2);
        let seen: Vec<_> = client.collect().await;
        assert_eq!(seen.len(), 100);

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_client_unaffected_when_stats_receiver_dropped() {
        let (client, rx) = tee_for_stats(chunks(5), 1);
        drop(rx);
        let seen: Vec<_> = client.collect().await;
        assert_eq!(seen.len(), 5);
    }
}
