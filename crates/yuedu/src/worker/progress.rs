use crate::broadcast::{ProgressBus, ProgressEvent};

/// Sink for the events a worker produces while it holds a job's lease.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, job_id: &str, event: ProgressEvent);
}

/// Discards every event. Used where nobody follows progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job_id: &str, _event: ProgressEvent) {}
}

/// Publishes worker events on the progress bus.
pub struct BusProgress {
    bus: ProgressBus,
}

impl BusProgress {
    pub fn new(bus: ProgressBus) -> Self {
        Self { bus }
    }
}

impl ProgressReporter for BusProgress {
    fn report(&self, job_id: &str, event: ProgressEvent) {
        self.bus.publish(job_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_progress_publishes() {
        let bus = ProgressBus::default();
        let reporter = BusProgress::new(bus.clone());
        reporter.report("t1", ProgressEvent::error("boom"));
        assert_eq!(bus.backlog("t1"), vec![ProgressEvent::error("boom")]);
    }
}
