// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The long-running loops: subscription consumers and outbound publishers.

use std::{future::Future, sync::Arc, time::Duration};

use crowdle_common::{EventEnvelope, EventSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    bus::{EventTransport, OutboundQueue, Subscription},
    error::{EngineError, EngineResult, Retryable, StoreError, TransportError},
    handlers::HandlerRegistry,
    orchestrator::Orchestrator,
    retry::RetryPolicy,
    scheduler::RoundRecheck,
};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Upper bound on one poll, and so on how long cancellation goes unnoticed.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// What to do with a delivery whose handler failed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Drop,
    Fail,
}

fn disposition(error: &EngineError) -> Disposition {
    match error {
        EngineError::Command(_) | EngineError::Dictionary(_) => Disposition::Drop,
        EngineError::Store(StoreError::Conflict { .. }) => Disposition::Drop,
        EngineError::Transport(
            TransportError::Decode(_) | TransportError::Encode(_) | TransportError::UnknownEventType(_),
        ) => Disposition::Drop,
        EngineError::Store(_) | EngineError::Transport(_) => Disposition::Fail,
    }
}

/// Polls `subscription` until cancelled, handing each payload to `handle` and
/// acknowledging it once handled or dropped.
///
/// Transient failures are retried under the policy; running out of attempts,
/// or a failure that is neither a rejection nor a bad payload, ends the loop
/// with an error.
pub async fn consume<T, F, Fut>(
    name: &str,
    mut subscription: Box<dyn Subscription<T>>,
    settings: &ConsumerSettings,
    cancel: &CancellationToken,
    handle: F,
) -> EngineResult<()>
where
    T: Clone + Send,
    F: Fn(T) -> Fut,
    Fut: Future<Output = EngineResult<()>>,
{
    info!(consumer = name, "consumer loop started");
    let mut failed_polls = 0;
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = subscription.poll(settings.poll_interval) => polled,
        };
        let delivery = match polled {
            Ok(Some(delivery)) => {
                failed_polls = 0;
                delivery
            }
            Ok(None) => {
                failed_polls = 0;
                continue;
            }
            Err(error) if error.is_transient() && failed_polls + 1 < settings.retry.max_attempts => {
                failed_polls += 1;
                let delay = settings.retry.delay_for(failed_polls);
                warn!(
                    consumer = name,
                    attempt = failed_polls,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "poll failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
            Err(error) => {
                error!(consumer = name, error = %error, "poll failed, stopping consumer");
                return Err(error.into());
            }
        };

        let payload = delivery.payload;
        let result = settings
            .retry
            .run(name, || handle(payload.clone()))
            .await;
        if let Err(error) = result {
            match disposition(&error) {
                Disposition::Drop if error.is_conflict() => {
                    warn!(consumer = name, error = %error, "version conflict, dropping delivery");
                }
                Disposition::Drop if error.as_command().is_some() => {
                    warn!(consumer = name, error = %error, "command rejected, dropping delivery");
                }
                Disposition::Drop => {
                    warn!(consumer = name, error = %error, "unusable delivery, dropping");
                }
                Disposition::Fail => {
                    error!(consumer = name, error = %error, "handler failed, stopping consumer");
                    return Err(error);
                }
            }
        }

        if let Err(error) = subscription.ack(delivery.receipt).await {
            warn!(
                consumer = name,
                partition = delivery.receipt.partition,
                offset = delivery.receipt.offset,
                error = %error,
                "failed to acknowledge delivery"
            );
        }
    }
    info!(consumer = name, "consumer loop stopped");
    Ok(())
}

/// Dispatches domain events to `handlers`, skipping envelopes this instance
/// published itself when `own_source` is given.
pub async fn run_event_consumer(
    name: &str,
    subscription: Box<dyn Subscription<EventEnvelope>>,
    handlers: Arc<HandlerRegistry>,
    own_source: Option<EventSource>,
    settings: &ConsumerSettings,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    consume(name, subscription, settings, cancel, |envelope: EventEnvelope| {
        let handlers = handlers.clone();
        let own = own_source
            .as_ref()
            .is_some_and(|source| envelope.is_from(source));
        async move {
            if own {
                debug!(
                    event_type = %envelope.event_type,
                    event_id = %envelope.id,
                    "skipping own event"
                );
                return Ok(());
            }
            handlers.dispatch(&envelope).await
        }
    })
    .await
}

pub async fn run_recheck_consumer(
    subscription: Box<dyn Subscription<RoundRecheck>>,
    orchestrator: Arc<Orchestrator>,
    settings: &ConsumerSettings,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    consume("rechecks", subscription, settings, cancel, |recheck: RoundRecheck| {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.on_recheck(recheck).await }
    })
    .await
}

/// Drains one outbound queue into the transport, in order.
pub async fn run_publish_loop(
    queue: OutboundQueue,
    transport: Arc<dyn EventTransport>,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    let event_type = queue.event_type();
    info!(event_type, "publish loop started");
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.next() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let sending = &envelope;
        let transport = &transport;
        retry
            .run("publish", move || transport.send(sending))
            .await?;
        queue.mark_sent();
        debug!(
            event_type,
            event_id = %envelope.id,
            session_id = %envelope.session_id,
            "event published"
        );
    }
    info!(event_type, "publish loop stopped");
    Ok(())
}
