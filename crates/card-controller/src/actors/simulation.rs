//! Simulation driver: periodic ticks that make simulated participants act.
//!
//! The driver itself never touches meeting state. It only posts
//! `SimulationTick` messages to its channel's mailbox; the channel does the
//! random draws, folds them and broadcasts. Stopping the driver therefore
//! cannot leave a sweep half-applied, and any tick already queued when the
//! driver stops is discarded by generation.

use super::messages::ChannelMessage;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// A running simulation driver owned by one channel.
#[derive(Debug)]
pub struct SimulationDriver {
    generation: u64,
    cancel_token: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl SimulationDriver {
    /// Start ticking `mailbox` every `interval`, first tick immediately.
    ///
    /// The driver holds only a weak reference to the mailbox, so it never
    /// keeps a channel alive on its own.
    #[must_use]
    pub fn spawn(
        meeting_code: String,
        generation: u64,
        interval: Duration,
        mailbox: mpsc::WeakSender<ChannelMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        let task_handle = tokio::spawn(run(
            meeting_code,
            generation,
            interval,
            mailbox,
            cancel_token.clone(),
        ));

        Self {
            generation,
            cancel_token,
            task_handle,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if the task ended without being stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    /// Cancel the driver. Takes effect at its next suspension point.
    pub fn stop(self) {
        self.cancel_token.cancel();
    }

    /// Kill the task without cancelling it, as a crash would.
    #[cfg(test)]
    pub(crate) fn abort(&self) {
        self.task_handle.abort();
    }

    /// Join a finished driver, returning the panic if it died of one.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task_handle.await
    }
}

#[instrument(skip_all, name = "cc.actor.simulation", fields(meeting_code = %meeting_code, generation = generation))]
async fn run(
    meeting_code: String,
    generation: u64,
    interval: Duration,
    mailbox: mpsc::WeakSender<ChannelMessage>,
    cancel_token: CancellationToken,
) {
    debug!(
        target: "cc.actor.simulation",
        meeting_code = %meeting_code,
        generation,
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "Simulation driver started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            _ = ticker.tick() => {
                let Some(sender) = mailbox.upgrade() else {
                    break;
                };
                if sender
                    .send(ChannelMessage::SimulationTick { generation })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    debug!(
        target: "cc.actor.simulation",
        meeting_code = %meeting_code,
        generation,
        "Simulation driver stopped"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn generation_of(message: ChannelMessage) -> u64 {
        match message {
            ChannelMessage::SimulationTick { generation } => generation,
            _ => panic!("expected a simulation tick"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_ticks_immediately_then_every_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let driver = SimulationDriver::spawn(
            "AbCdEf".to_string(),
            7,
            Duration::from_secs(5),
            tx.downgrade(),
            CancellationToken::new(),
        );

        assert_eq!(generation_of(rx.recv().await.unwrap()), 7);

        let started = tokio::time::Instant::now();
        assert_eq!(generation_of(rx.recv().await.unwrap()), 7);
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        driver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_stops_on_cancel() {
        let (tx, mut rx) = mpsc::channel(8);
        let driver = SimulationDriver::spawn(
            "AbCdEf".to_string(),
            1,
            Duration::from_secs(5),
            tx.downgrade(),
            CancellationToken::new(),
        );
        rx.recv().await.unwrap();

        let token = driver.cancel_token.clone();
        let handle = driver.task_handle;
        token.cancel();
        handle.await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_exits_when_mailbox_dropped() {
        let (tx, rx) = mpsc::channel(8);
        let weak = tx.downgrade();
        drop(tx);
        drop(rx);

        let driver = SimulationDriver::spawn(
            "AbCdEf".to_string(),
            1,
            Duration::from_secs(5),
            weak,
            CancellationToken::new(),
        );

        driver.join().await.unwrap();
    }
}
