//! Per-subscriber progress streams.
//!
//! A stream opened on a finished job yields a single terminal frame built
//! from the store. A stream on a live job replays the bus backlog and then
//! relays live events until a terminal event, a bus close or a lagged
//! disconnect.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::broadcast::{ProgressBus, ProgressEvent, Subscription, SubscriptionError};
use crate::error::JobError;
use crate::jobs::{Job, JobState, JobStore};
use crate::sanitize;

pub const NOT_FOUND_MESSAGE: &str = "Translation not found";

#[derive(Clone)]
pub struct StreamHandler {
    store: JobStore,
    bus: ProgressBus,
}

enum Phase {
    Replay {
        events: VecDeque<ProgressEvent>,
        subscription: Subscription,
    },
    Live(Subscription),
    Done,
}

async fn next_live(mut subscription: Subscription) -> Option<(ProgressEvent, Phase)> {
    match subscription.recv().await {
        Ok(event) => {
            let next = if event.is_terminal() {
                Phase::Done
            } else {
                Phase::Live(subscription)
            };
            Some((event, next))
        }
        Err(SubscriptionError::Lagged(skipped)) => {
            log::debug!(
                "Ending stream for {} after skipping {} events",
                subscription.job_id(),
                skipped
            );
            None
        }
        Err(SubscriptionError::Closed) => None,
    }
}

/// The terminal frame for a job the store already considers finished.
fn terminal_event(job: &Job) -> ProgressEvent {
    match job.state {
        JobState::Completed => ProgressEvent::complete(
            &job.paragraphs,
            job.full_translation.as_deref().unwrap_or_default(),
        ),
        _ => ProgressEvent::error(job.error.as_deref().unwrap_or("Translation failed")),
    }
}

fn lookup_error(err: JobError) -> ProgressEvent {
    match err {
        JobError::NotFound(_) => ProgressEvent::error(NOT_FOUND_MESSAGE),
        other => ProgressEvent::error(sanitize::truncate_message(&other.to_string())),
    }
}

impl StreamHandler {
    pub fn new(store: JobStore, bus: ProgressBus) -> Self {
        Self { store, bus }
    }

    pub fn open(&self, job_id: &str) -> ProgressStream {
        match self.store.get_job(job_id) {
            Err(e) => ProgressStream::single(lookup_error(e)),
            Ok(job) if job.state.is_terminal() => ProgressStream::single(terminal_event(&job)),
            Ok(_) => self.follow(job_id),
        }
    }

    fn follow(&self, job_id: &str) -> ProgressStream {
        let mut subscription = self.bus.subscribe(job_id);
        let events: VecDeque<ProgressEvent> = subscription.take_backlog().into();
        let replays_terminal = events.iter().any(ProgressEvent::is_terminal);

        // The job may have finished or vanished between the lookup and the
        // subscription; the store has the final word when the bus lacks it.
        // Short circuits must not leave an unfinished channel behind.
        if !replays_terminal {
            match self.store.get_job(job_id) {
                Err(e) => {
                    if matches!(e, JobError::NotFound(_)) {
                        self.bus.close(job_id);
                    }
                    return ProgressStream::single(lookup_error(e));
                }
                Ok(job) if job.state.is_terminal() => {
                    self.bus.mark_finished(job_id);
                    return ProgressStream::single(terminal_event(&job));
                }
                Ok(_) => {}
            }
        }

        let inner = stream::unfold(
            Phase::Replay {
                events,
                subscription,
            },
            |phase| async move {
                match phase {
                    Phase::Replay {
                        mut events,
                        subscription,
                    } => match events.pop_front() {
                        Some(event) => {
                            let next = if event.is_terminal() {
                                Phase::Done
                            } else {
                                Phase::Replay {
                                    events,
                                    subscription,
                                }
                            };
                            Some((event, next))
                        }
                        None => next_live(subscription).await,
                    },
                    Phase::Live(subscription) => next_live(subscription).await,
                    Phase::Done => None,
                }
            },
        );
        ProgressStream {
            inner: Some(inner.boxed()),
        }
    }
}

/// Events for one subscriber. Dropping or cancelling the stream
/// unregisters it from the bus.
pub struct ProgressStream {
    inner: Option<BoxStream<'static, ProgressEvent>>,
}

impl ProgressStream {
    fn single(event: ProgressEvent) -> Self {
        Self {
            inner: Some(stream::iter([event]).boxed()),
        }
    }

    pub fn cancel(&mut self) {
        self.inner = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
