//! # Delivery Stream
//!
//! Turns a polling [`Broker`] into a lazy stream of deliveries for one queue.
//! The stream suspends while the queue is empty and ends only once shutdown
//! is signalled; broker errors are yielded and the stream keeps going.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::watch;

use super::traits::Broker;
use super::types::Delivery;
use crate::messaging::errors::MessagingError;
use crate::messaging::router::QueueName;

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, MessagingError>> + Send>>;

/// Receive parameters for a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub visibility_timeout: Duration,
    /// Longest idle wait between receive attempts on an empty queue
    pub poll_interval: Duration,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

struct ConsumerState<B> {
    broker: Arc<B>,
    queue: QueueName,
    options: ConsumeOptions,
    shutdown: watch::Receiver<bool>,
    backoff_next: bool,
}

impl<B: Broker> ConsumerState<B> {
    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait up to `duration` or until shutdown, whichever comes first
    async fn idle(&self, duration: Duration, wait_for_message: bool) {
        let wait = async {
            if wait_for_message {
                self.broker.wait_for_message(&self.queue, duration).await;
            } else {
                tokio::time::sleep(duration).await;
            }
        };
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = wait => {}
            _ = wait_for_shutdown(&mut shutdown) => {}
        }
    }
}

/// Resolve once the shutdown flag is `true`; pends forever if the sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Consume `queue` until `shutdown` flips to `true`
pub fn consume<B: Broker>(
    broker: Arc<B>,
    queue: QueueName,
    options: ConsumeOptions,
    shutdown: watch::Receiver<bool>,
) -> DeliveryStream {
    let state = ConsumerState {
        broker,
        queue,
        options,
        shutdown,
        backoff_next: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if state.is_shutdown() {
                return None;
            }
            if state.backoff_next {
                state.backoff_next = false;
                let interval = state.options.poll_interval;
                state.idle(interval, false).await;
                continue;
            }

            match state
                .broker
                .receive(&state.queue, state.options.visibility_timeout)
                .await
            {
                Ok(Some(delivery)) => return Some((Ok(delivery), state)),
                Ok(None) => {
                    let interval = state.options.poll_interval;
                    state.idle(interval, true).await;
                }
                Err(err) => {
                    state.backoff_next = true;
                    return Some((Err(err), state));
                }
            }
        }
    }))
}
