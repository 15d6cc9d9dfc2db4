//! End-to-end job lifecycle through the runner: success, retries, the
//! attempt cap and deletion while a worker is mid-stream.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{
    hello_world_script, outline, release, segment, transient, GatedProvider, ScriptedProvider,
    TestHarness,
};
use yuedu::broadcast::{ProgressEvent, SubscriptionError};
use yuedu::error::JobError;
use yuedu::jobs::model::reconstruct;
use yuedu::jobs::{AcquireOutcome, JobState, Segment, SourceKind};
use yuedu::worker::{RunOutcome, RunnerSettings};
use yuedu::DictionaryTranslator;

fn drain(sub: &mut yuedu::broadcast::Subscription) -> Vec<ProgressEvent> {
    let mut events = sub.take_backlog();
    while let Ok(Some(event)) = sub.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_hello_world_scenario() {
    let h = TestHarness::new();
    let id = h.service.submit("你好，世界。", SourceKind::Text).unwrap();

    let status = h.service.status(&id).unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert_eq!(status.progress, 0);

    let mut sub = h.bus.subscribe(&id);
    let runner = h.runner(Arc::new(ScriptedProvider::new(vec![hello_world_script()])));
    assert_eq!(runner.run(&id, "w1"), RunOutcome::Completed);

    let events = drain(&mut sub);
    assert_eq!(events.len(), 4);
    match &events[0] {
        ProgressEvent::Start {
            translation_id,
            total,
            ..
        } => {
            assert_eq!(translation_id, &id);
            assert_eq!(*total, 2);
        }
        other => panic!("expected start, got {:?}", other),
    }
    let texts: Vec<(u64, String)> = events[1..3]
        .iter()
        .map(|e| match e {
            ProgressEvent::Progress {
                current, result, ..
            } => (*current, result.segment.clone()),
            other => panic!("expected progress, got {:?}", other),
        })
        .collect();
    assert_eq!(
        texts,
        vec![(1, "你好".to_string()), (2, "，世界。".to_string())]
    );
    match &events[3] {
        ProgressEvent::Complete {
            full_translation, ..
        } => assert_eq!(full_translation, "Hello, world."),
        other => panic!("expected complete, got {:?}", other),
    }

    let job = h.service.get(&id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 2);
    assert_eq!(job.total, 2);
    let segments: Vec<&str> = job.paragraphs[0]
        .segments
        .iter()
        .map(|s| s.text.as_str())
        .collect();
    assert_eq!(segments, vec!["你好", "，世界。"]);
    assert_eq!(reconstruct(&job.paragraphs), "你好，世界。");
}

#[test]
fn test_transient_failure_then_success() {
    let h = TestHarness::new();
    let id = h.service.submit("你好，世界。", SourceKind::Text).unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![
            Ok(outline(&[2])),
            Ok(segment(0, 0, "你好", "nǐ hǎo", "hello")),
            transient("upstream timeout"),
        ],
        hello_world_script(),
    ]));
    let runner = h.runner(provider.clone());

    assert_eq!(runner.run(&id, "w1"), RunOutcome::Requeued);
    let lease = h.leases.get(&id).unwrap();
    assert_eq!(lease.state, JobState::Pending);
    assert!(lease.last_error.unwrap().contains("upstream timeout"));

    assert_eq!(runner.run(&id, "w2"), RunOutcome::Completed);
    assert_eq!(provider.calls(), 2);
    assert_eq!(h.leases.get(&id).unwrap().attempts, 2);

    let job = h.service.get(&id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.paragraphs.len(), 1);
    assert_eq!(job.paragraphs[0].segments.len(), 2);

    // The retry repeats segment (0, 0); the log carries it once.
    let keys: Vec<(usize, usize)> = h
        .bus
        .backlog(&id)
        .iter()
        .filter_map(ProgressEvent::segment_key)
        .collect();
    assert_eq!(keys, vec![(0, 0), (0, 1)]);
}

#[test]
fn test_attempt_cap_fails_job() {
    let h = TestHarness::with_max_attempts(3);
    let id = h.service.submit("你好", SourceKind::Text).unwrap();
    let runner = h.runner(Arc::new(ScriptedProvider::new(vec![])));

    assert_eq!(runner.run(&id, "w1"), RunOutcome::Requeued);
    assert_eq!(runner.run(&id, "w2"), RunOutcome::Requeued);
    assert_eq!(runner.run(&id, "w3"), RunOutcome::Failed);

    let status = h.service.status(&id).unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("provider unavailable"));

    let lease = h.leases.get(&id).unwrap();
    assert_eq!(lease.state, JobState::Failed);
    assert_eq!(lease.attempts, 3);
    assert!(matches!(
        h.bus.backlog(&id).last(),
        Some(ProgressEvent::Error { .. })
    ));

    assert_eq!(runner.run(&id, "w4"), RunOutcome::Skipped);
}

#[test]
fn test_dictionary_output_reconstructs_input() {
    let h = TestHarness::new();
    let input = "\n  你好，世界。\n\n学习中文！\n";
    let id = h.service.submit(input, SourceKind::Text).unwrap();
    let translator = DictionaryTranslator::from_path(&h.write_dictionary()).unwrap();

    assert_eq!(h.runner(Arc::new(translator)).run(&id, "w1"), RunOutcome::Completed);

    let job = h.service.get(&id).unwrap();
    assert_eq!(job.paragraphs.len(), 2);
    assert_eq!(reconstruct(&job.paragraphs), input);
    assert_eq!(job.progress, job.total);
}

#[test]
fn test_delete_during_processing() {
    let h = TestHarness::new();
    let id = h.service.submit("你好，世界。", SourceKind::Text).unwrap();
    let (provider, gate) = GatedProvider::new(hello_world_script());
    let runner = h.runner(Arc::new(provider));

    let worker = {
        let id = id.clone();
        thread::spawn(move || runner.run(&id, "w1"))
    };

    // Outline and first segment.
    release(&gate, 2);
    let published = (0..1000).any(|_| {
        if h.bus.backlog(&id).len() == 2 {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
        false
    });
    assert!(published);

    let mut sub = h.bus.subscribe(&id);
    assert!(h.service.delete(&id).unwrap());

    release(&gate, 2);
    assert_eq!(worker.join().unwrap(), RunOutcome::Aborted);

    assert_eq!(sub.take_backlog().len(), 2);
    assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));

    let late = Segment {
        paragraph_index: 0,
        segment_index: 1,
        text: "，世界。".to_string(),
        pinyin: String::new(),
        english: "world".to_string(),
    };
    assert!(matches!(
        h.store.append_segment(&id, "w1", &late),
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(h.service.get(&id), Err(JobError::NotFound(_))));
}

#[test]
fn test_lease_takeover_mid_stream_aborts_first_worker() {
    let h = TestHarness::new();
    let id = h.service.submit("你好，世界。", SourceKind::Text).unwrap();
    let (provider, gate) = GatedProvider::new(hello_world_script());
    let runner = h.runner_with(
        Arc::new(provider),
        RunnerSettings {
            lease_ttl: Duration::ZERO,
            renew_interval: Duration::from_secs(60),
        },
    );

    let worker = {
        let id = id.clone();
        thread::spawn(move || runner.run(&id, "w1"))
    };

    // Outline and first segment land while w1 still owns the lease.
    release(&gate, 2);
    let published = (0..1000).any(|_| {
        if h.bus.backlog(&id).len() == 2 {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
        false
    });
    assert!(published);

    // w1's lease has already expired; w2 takes the job over.
    thread::sleep(Duration::from_millis(5));
    assert!(matches!(
        h.leases.acquire(&id, "w2", Duration::from_secs(30)).unwrap(),
        AcquireOutcome::Acquired(_)
    ));

    release(&gate, 2);
    assert_eq!(worker.join().unwrap(), RunOutcome::Aborted);

    let job = h.service.get(&id).unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.progress, 1);
    assert!(job.full_translation.is_none());
    assert_eq!(h.bus.backlog(&id).len(), 2);

    let lease = h.leases.get(&id).unwrap();
    assert_eq!(lease.state, JobState::Processing);
    assert_eq!(lease.token.as_deref(), Some("w2"));
    assert_eq!(lease.attempts, 2);
}
