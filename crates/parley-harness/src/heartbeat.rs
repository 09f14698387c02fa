//! Keep-alive pings for quiet rounds

use crate::request::ChatResponse;
use crate::round::{RoundState, StreamGate};
use parley_core::BlockId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ping the client whenever a full `interval` passes without a real event.
///
/// Stops on `stop`, or after the first failed send. Resolves to the number
/// of pings delivered.
pub fn spawn(
    gate: Arc<StreamGate>,
    state: Arc<RoundState>,
    block_id: Option<BlockId>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if state.idle_for() < interval {
                        continue;
                    }
                    if let Err(e) = gate.send(ChatResponse::ping(block_id)).await {
                        debug!(error = %e, "heartbeat send failed, stopping");
                        break;
                    }
                    sent += 1;
                    metrics::counter!("parley.heartbeat.ping").increment(1);
                }
            }
        }
        sent
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ChatStream;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_core::{EmitError, EventKind};

    #[derive(Default)]
    struct Pings(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl ChatStream for Pings {
        async fn send(&self, response: ChatResponse) -> Result<(), EmitError> {
            self.0.lock().push(response.kind);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pings_only_when_idle() {
        let stream = Arc::new(Pings::default());
        let state = Arc::new(RoundState::new());
        let stop = CancellationToken::new();
        let handle = spawn(
            Arc::new(StreamGate::new(stream.clone())),
            state.clone(),
            None,
            Duration::from_secs(5),
            stop.clone(),
        );

        // activity at 4s keeps the 5s tick quiet
        tokio::time::sleep(Duration::from_secs(4)).await;
        state.touch();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(stream.0.lock().is_empty());

        // idle from 4s, so the 10s and 15s ticks ping
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        stop.cancel();
        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(*stream.0.lock(), vec![EventKind::Ping, EventKind::Ping]);
    }
}
