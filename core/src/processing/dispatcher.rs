use crate::protocol::MeterMessage;
use crate::telemetry::StatusTracker;
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// How long the consumer gets to accept a message.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The consumer accepted the message within the budget.
    Delivered,
    /// The consumer did not accept within the budget; the message was dropped.
    TimedOut,
    /// The consumer channel is closed; the message was dropped.
    Disconnected,
    /// The stop signal fired while waiting.
    Cancelled,
}

/// A message offered to the consumer.
///
/// Nothing counts as delivered until the consumer calls [`Handoff::accept`].
/// Offers the dispatcher already gave up on stay undeliverable.
#[derive(Debug)]
pub struct Handoff {
    message: MeterMessage,
    accepted: oneshot::Sender<()>,
}

impl Handoff {
    pub fn message(&self) -> &MeterMessage {
        &self.message
    }

    /// Takes the message, or `None` when its delivery budget already ran out.
    pub fn accept(self) -> Option<MeterMessage> {
        let Self { message, accepted } = self;
        accepted.send(()).ok().map(|()| message)
    }
}

/// Consumer channel with room for the single offer in flight and nothing else.
pub fn consumer_channel() -> (mpsc::Sender<Handoff>, mpsc::Receiver<Handoff>) {
    mpsc::channel(1)
}

/// Forwards messages to the consumer without ever waiting past the budget.
#[derive(Clone)]
pub struct Dispatcher {
    consumer: mpsc::Sender<Handoff>,
    status: Arc<StatusTracker>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(consumer: mpsc::Sender<Handoff>, status: Arc<StatusTracker>) -> Self {
        Self {
            consumer,
            status,
            timeout: DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn forward(&self, msg: MeterMessage, stop: &CancellationToken) -> DispatchOutcome {
        let outcome = self.hand_off(msg.clone(), stop).await;
        match outcome {
            DispatchOutcome::Delivered => self.status.record_processed(),
            DispatchOutcome::TimedOut => {
                self.status.record_failure();
                warn!("timeout for message processing: {:?}", msg);
            }
            DispatchOutcome::Disconnected => {
                self.status.record_failure();
                warn!("consumer closed, dropping message: {:?}", msg);
            }
            DispatchOutcome::Cancelled => {}
        }
        outcome
    }

    /// Queue slot and acceptance share one deadline.
    async fn hand_off(&self, message: MeterMessage, stop: &CancellationToken) -> DispatchOutcome {
        let deadline = Instant::now() + self.timeout;
        let permit = tokio::select! {
            _ = stop.cancelled() => return DispatchOutcome::Cancelled,
            reserved = timeout_at(deadline, self.consumer.reserve()) => match reserved {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return DispatchOutcome::Disconnected,
                Err(_) => return DispatchOutcome::TimedOut,
            },
        };

        let (accepted, mut acceptance) = oneshot::channel();
        permit.send(Handoff { message, accepted });
        let gave_up = tokio::select! {
            _ = stop.cancelled() => DispatchOutcome::Cancelled,
            waited = timeout_at(deadline, &mut acceptance) => match waited {
                Ok(Ok(())) => return DispatchOutcome::Delivered,
                Ok(Err(_)) => return DispatchOutcome::Disconnected,
                Err(_) => DispatchOutcome::TimedOut,
            },
        };

        // An acceptance racing the give-up is either seen here or refused.
        acceptance.close();
        match acceptance.try_recv() {
            Ok(()) => DispatchOutcome::Delivered,
            Err(_) => gave_up,
        }
    }
}
