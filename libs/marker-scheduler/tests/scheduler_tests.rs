//! Queue ordering and position tests for the execution scheduler.
//!
//! These tests validate that:
//! - Jobs are dispatched strictly in submission order
//! - Queue positions are 1-based, ascending, and partition the queue
//! - Running jobs no longer report a position
//! - Cancellation and refresh keep the ordering intact


use std::collections::BTreeSet;
use std::sync::Arc;

use marker_common::{AssessmentId, JobId, JobState, Membership, SubjectKey};
use marker_scheduler::{JobRefresher, Refresh, Scheduler, SubmitError};
use test_harness::*;

#[tokio::test]
async fn test_single_worker_dispatches_in_submission_order() {
    let runner = TestRunner::gated();
    let (scheduler, sink) = start(config(1, 1), &runner);

    let ids: Vec<JobId> = (0..10)
        .map(|i| scheduler.submit(submission(&format!("student{}", i))).unwrap())
        .collect();

    runner.release(10);
    wait_until("all results", || sink.len() == 10).await;

    assert_eq!(runner.dispatched(), ids);
    let stored: Vec<JobId> = sink.results().iter().map(|r| r.job_id).collect();
    assert_eq!(stored, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_never_overtakes_earlier_jobs() {
    let runner = TestRunner::gated();
    let (scheduler, sink) = start(config(3, 3), &runner);

    let ids: Vec<JobId> = (0..9)
        .map(|i| scheduler.submit(submission(&format!("s{}", i))).unwrap())
        .collect();

    for finished in 0..9 {
        let expected = (finished + 3).min(9);
        wait_until("dispatch", || runner.dispatched().len() == expected).await;

        // whatever has been dispatched is always a prefix of the queue
        let dispatched: BTreeSet<JobId> = runner.dispatched().into_iter().collect();
        let prefix: BTreeSet<JobId> = ids[..expected].iter().copied().collect();
        assert_eq!(dispatched, prefix);

        runner.release(1);
        wait_until("completion", || sink.len() == finished + 1).await;
    }
}

#[tokio::test]
async fn test_five_students_two_workers() {
    let runner = TestRunner::gated();
    let (scheduler, sink) = start(config(2, 2), &runner);

    let students: Vec<SubjectKey> = (1..=5).map(|i| student(&format!("student{}", i))).collect();
    let ids: Vec<JobId> = students
        .iter()
        .map(|s| {
            scheduler
                .submit(job_for(s.clone(), 1, &format!("subs/{}", s.name())))
                .unwrap()
        })
        .collect();

    wait_until("two dispatched", || runner.dispatched().len() == 2).await;
    assert_eq!(runner.dispatched(), ids[..2].to_vec());

    let position = |s: &SubjectKey| scheduler.queue_position(s, AssessmentId(1));
    assert!(position(&students[0]).is_empty());
    assert!(position(&students[1]).is_empty());
    assert_eq!(position(&students[2]), vec![1]);
    assert_eq!(position(&students[3]), vec![2]);
    assert_eq!(position(&students[4]), vec![3]);

    runner.release(1);
    wait_until("third dispatched", || runner.dispatched().len() == 3).await;
    assert!(position(&students[2]).is_empty());
    assert_eq!(scheduler.job_state(ids[2]), Some(JobState::Running));
    assert_eq!(position(&students[3]), vec![1]);
    assert_eq!(position(&students[4]), vec![2]);

    runner.release(4);
    wait_until("all results", || sink.len() == 5).await;
    for s in &students {
        assert!(position(s).is_empty());
    }
}

#[tokio::test]
async fn test_same_subject_reports_every_position() {
    let runner = TestRunner::gated();
    let (scheduler, _sink) = start(config(1, 1), &runner);

    let blocker = scheduler.submit(submission("blocker")).unwrap();
    wait_until("blocker running", || {
        scheduler.job_state(blocker) == Some(JobState::Running)
    })
    .await;

    scheduler.submit(submission("alice")).unwrap();
    scheduler.submit(submission("bob")).unwrap();
    scheduler.submit(submission("carol")).unwrap();
    scheduler.submit(submission("carol")).unwrap();

    assert_eq!(
        scheduler.queue_position(&student("carol"), AssessmentId(1)),
        vec![3, 4]
    );
    // other assessments are not mixed in
    assert!(scheduler
        .queue_position(&student("carol"), AssessmentId(2))
        .is_empty());
}

#[tokio::test]
async fn test_member_sees_group_submission_positions() {
    let runner = TestRunner::gated();
    let (scheduler, _sink) = start(config(1, 1), &runner);

    let blocker = scheduler.submit(submission("blocker")).unwrap();
    wait_until("blocker running", || {
        scheduler.job_state(blocker) == Some(JobState::Running)
    })
    .await;

    scheduler
        .submit(job_for(SubjectKey::group("team-4"), 1, "groups/team-4"))
        .unwrap();
    scheduler.submit(submission("erin")).unwrap();
    scheduler.submit(submission("frank")).unwrap();

    let frank = Membership::new("frank", Some("team-4".to_string()));
    assert_eq!(scheduler.queue_position(&frank, AssessmentId(1)), vec![1, 3]);

    let erin = Membership::new("erin", None);
    assert_eq!(scheduler.queue_position(&erin, AssessmentId(1)), vec![2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_positions_partition_the_queue() {
    let runner = TestRunner::gated();
    let (scheduler, _sink) = start(config(2, 2), &runner);

    let mut submitters = Vec::new();
    for t in 0..4 {
        let scheduler = scheduler.clone();
        submitters.push(tokio::spawn(async move {
            for i in 0..25 {
                let name = format!("s{}", (t * 25 + i) % 7);
                scheduler.submit(submission(&name)).unwrap();
            }
        }));
    }

    let reader = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                for s in 0..7 {
                    let positions =
                        scheduler.queue_position(&student(&format!("s{}", s)), AssessmentId(1));
                    assert!(positions.windows(2).all(|w| w[0] < w[1]));
                    assert!(positions.iter().all(|&p| p >= 1 && p <= 100));
                }
                tokio::task::yield_now().await;
            }
        })
    };

    for submitter in submitters {
        submitter.await.unwrap();
    }
    reader.await.unwrap();
    wait_until("two running", || scheduler.stats().running == 2).await;

    let queued = scheduler.stats().queued;
    assert_eq!(queued, 98);

    let mut all: Vec<usize> = (0..7)
        .flat_map(|s| scheduler.queue_position(&student(&format!("s{}", s)), AssessmentId(1)))
        .collect();
    all.sort_unstable();
    assert_eq!(all, (1..=queued).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cancelled_job_is_never_run() {
    let runner = TestRunner::gated();
    let (scheduler, sink) = start(config(1, 1), &runner);

    let first = scheduler.submit(submission("alice")).unwrap();
    let second = scheduler.submit(submission("bob")).unwrap();
    let third = scheduler.submit(submission("carol")).unwrap();
    wait_until("first running", || {
        scheduler.job_state(first) == Some(JobState::Running)
    })
    .await;

    assert!(!scheduler.cancel(first));
    assert!(scheduler.cancel(second));
    assert_eq!(
        scheduler.queue_position(&student("carol"), AssessmentId(1)),
        vec![1]
    );

    runner.release(2);
    wait_until("results", || sink.len() == 2).await;
    assert_eq!(runner.dispatched(), vec![first, third]);
    assert!(sink.results().iter().all(|r| r.job_id != second));
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let runner = TestRunner::open();
    let (scheduler, _sink) = start(config(1, 1), &runner);
    assert!(!scheduler.cancel(JobId(999)));
}

#[tokio::test]
async fn test_malformed_submission_rejected() {
    let runner = TestRunner::open();
    let (scheduler, sink) = start(config(1, 1), &runner);

    let err = scheduler
        .submit(job_for(student("alice"), 0, "subs/alice"))
        .unwrap_err();
    assert_eq!(err, SubmitError::MissingAssessment);

    let err = scheduler.submit(job_for(student("alice"), 1, "  ")).unwrap_err();
    assert_eq!(err, SubmitError::MissingSubmission);

    assert_eq!(scheduler.stats().queued, 0);
    assert!(sink.is_empty());
}

struct DropGroups;

impl JobRefresher for DropGroups {
    fn refresh(&self, job: &marker_common::Job) -> Refresh {
        match job.subject {
            SubjectKey::Group(_) => Refresh::Drop,
            SubjectKey::Individual(_) => Refresh::Keep,
        }
    }
}

#[tokio::test]
async fn test_refresh_preserves_fifo_and_resumes_dispatch() {
    let runner = TestRunner::gated();
    let sink = Arc::new(marker_scheduler::MemorySink::new());
    let scheduler =
        Scheduler::start_with_refresher(config(1, 1), runner.clone(), sink.clone(), DropGroups)
            .unwrap();

    let a = scheduler.submit(submission("alice")).unwrap();
    let group = scheduler
        .submit(job_for(SubjectKey::group("team-1"), 1, "groups/team-1"))
        .unwrap();
    let b = scheduler.submit(submission("bob")).unwrap();
    let c = scheduler.submit(submission("carol")).unwrap();
    wait_until("first running", || scheduler.job_state(a) == Some(JobState::Running)).await;

    let report = scheduler.drain_and_refresh();
    assert_eq!(report.requeued, 2);
    assert_eq!(report.dropped, 1);
    assert_eq!(scheduler.job_state(group), None);
    assert_eq!(
        scheduler.queue_position(&student("carol"), AssessmentId(1)),
        vec![2]
    );

    runner.release(3);
    wait_until("results", || sink.len() == 3).await;
    assert_eq!(runner.dispatched(), vec![a, b, c]);
}

#[tokio::test]
async fn test_submit_after_shutdown_is_rejected() {
    let runner = TestRunner::open();
    let (scheduler, sink) = start(config(2, 2), &runner);

    scheduler.submit(submission("alice")).unwrap();
    wait_until("result", || sink.len() == 1).await;

    assert_eq!(scheduler.shutdown().await, 0);
    assert_eq!(scheduler.stats().live_workers, 0);
    assert_eq!(
        scheduler.submit(submission("bob")),
        Err(SubmitError::ShuttingDown)
    );
}
