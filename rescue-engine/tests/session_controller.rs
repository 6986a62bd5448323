// SPDX-License-Identifier: GPL-3.0-only

mod common;

use common::{BANNER, FakeMountBackend, FakeRunner, Harness, status_block};
use rescue_contracts::{RescueError, SessionEvent, StopSignal};
use rescue_types::{EndReason, PrivilegeEscalation, RescueOptions, SessionState};

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn progress_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SessionEvent::ProgressUpdated(_)))
        .count()
}

#[tokio::test]
async fn completed_rescue_finishes_with_everything_rescued() {
    let mut harness = Harness::new(FakeRunner::new());
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    let process = harness.runner.last_process();
    process.push(BANNER);
    for rescued in [2_000, 6_000, 10_485] {
        process.push(status_block(rescued));
    }
    process.push("Finished                              \n");
    process.exit(0);

    let events = harness.events_until_end().await;
    assert_eq!(
        states(&events),
        vec![SessionState::Starting, SessionState::Running, SessionState::Finished]
    );
    assert!(progress_count(&events) >= 3);

    match events.last() {
        Some(SessionEvent::SessionEnded {
            reason,
            final_snapshot: Some(snapshot),
            report,
            error: None,
        }) => {
            assert_eq!(*reason, EndReason::Finished);
            assert!(snapshot.finished);
            assert_eq!(Some(snapshot.bytes_rescued), snapshot.total_size);
            assert!(report.all_recovered);
            assert_eq!(report.exit_code, Some(0));
        }
        other => panic!("unexpected final event: {other:?}"),
    }
    assert_eq!(harness.controller.state(), SessionState::Finished);
}

#[tokio::test]
async fn exit_without_completion_is_unexpected_termination() {
    let mut harness = Harness::new(FakeRunner::new());
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    let process = harness.runner.last_process();
    process.push(BANNER);
    process.push(status_block(4_000));
    process.exit(1);

    let events = harness.events_until_end().await;
    match events.last() {
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Failed,
            error:
                Some(RescueError::UnexpectedTermination {
                    exit_code,
                    last_snapshot,
                }),
            ..
        }) => {
            assert_eq!(*exit_code, Some(1));
            let last = last_snapshot.as_ref().expect("last snapshot carried");
            assert_eq!(last.bytes_rescued, 4_000_000);
        }
        other => panic!("unexpected final event: {other:?}"),
    }
    assert_eq!(harness.controller.state(), SessionState::Failed);
}

#[tokio::test]
async fn abort_discards_queued_progress() {
    let mut harness = Harness::new(FakeRunner::exiting_on_interrupt(1));
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    let process = harness.runner.last_process();
    process.push(format!(
        "{BANNER}{}{}{}",
        status_block(1_000),
        status_block(2_000),
        status_block(3_000)
    ));
    harness.controller.abort().await.expect("abort");

    let events = harness.events_until_end().await;
    assert_eq!(progress_count(&events), 0, "queued blocks leaked: {events:?}");
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Aborted,
            error: None,
            ..
        })
    ));
    assert_eq!(harness.controller.state(), SessionState::Idle);
    assert_eq!(process.signals(), vec![StopSignal::Interrupt]);

    tokio::task::yield_now().await;
    assert!(harness.events.try_recv().is_err(), "nothing follows SessionEnded");
}

#[tokio::test]
async fn start_is_refused_while_a_session_is_live() {
    let mut harness = Harness::new(FakeRunner::new());
    let options = harness.options();
    harness.controller.start(options.clone()).await.expect("start");

    for expected in [SessionState::Running, SessionState::Pausing, SessionState::Aborting] {
        match expected {
            SessionState::Pausing => harness.controller.pause().await.expect("pause"),
            SessionState::Aborting => harness.controller.abort().await.expect("abort"),
            _ => {}
        }
        let error = harness
            .controller
            .start(options.clone())
            .await
            .expect_err("busy");
        assert_eq!(error, RescueError::SessionBusy { state: expected });
        assert_eq!(harness.controller.state(), expected);
    }

    let process = harness.runner.last_process();
    assert_eq!(process.signals(), vec![StopSignal::Interrupt]);
    assert_eq!(harness.runner.launches().len(), 1);

    process.exit(130);
    let events = harness.events_until_end().await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Aborted,
            ..
        })
    ));
}

#[tokio::test]
async fn paused_session_resumes_with_the_same_map_file() {
    let mut harness = Harness::new(FakeRunner::exiting_on_interrupt(1));
    let options = harness.options();
    let first = harness.controller.start(options).await.expect("start");

    let process = harness.runner.last_process();
    process.push(format!("{BANNER}{}", status_block(3_000)));
    tokio::task::yield_now().await;
    harness.controller.pause().await.expect("pause");

    let events = harness.events_until_end().await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Paused,
            error: None,
            ..
        })
    ));
    assert_eq!(harness.controller.state(), SessionState::Idle);

    let second = harness.controller.resume().await.expect("resume");
    assert_ne!(first, second);
    let launches = harness.runner.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].args, launches[1].args);
    assert!(
        launches[1]
            .args
            .last()
            .is_some_and(|arg| arg.ends_with("disk.map"))
    );
}

#[tokio::test]
async fn resume_without_a_paused_session_is_rejected() {
    let harness = Harness::new(FakeRunner::new());
    let error = harness.controller.resume().await.expect_err("nothing to resume");
    assert!(matches!(error, RescueError::InvalidState { .. }));
}

#[tokio::test]
async fn invalid_options_leave_the_state_untouched() {
    let mut harness = Harness::new(FakeRunner::new());
    let options = RescueOptions::new("/dev/sdz", "/dev/sdz");

    let error = harness.controller.start(options).await.expect_err("same path");
    assert!(matches!(error, RescueError::InvalidOptions(_)));
    assert_eq!(harness.controller.state(), SessionState::Idle);
    assert!(harness.runner.launches().is_empty());
    assert!(harness.events.try_recv().is_err());
}

#[tokio::test]
async fn launch_failure_ends_the_session_failed() {
    let mut harness = Harness::new(FakeRunner::failing(RescueError::Launch(
        "ddrescue not found".to_string(),
    )));
    let options = harness.options();

    let error = harness.controller.start(options).await.expect_err("launch fails");
    assert!(matches!(error, RescueError::Launch(_)));
    assert_eq!(harness.controller.state(), SessionState::Failed);

    let events = harness.events_until_end().await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Failed,
            error: Some(RescueError::Launch(_)),
            ..
        })
    ));
}

#[tokio::test]
async fn refused_elevation_is_reported_as_launch_failure() {
    let mut harness = Harness::with(
        FakeRunner::new(),
        FakeMountBackend::with_volumes(&[]),
        |config| config.tool.escalation = PrivilegeEscalation::Pkexec,
    );
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    harness.runner.last_process().exit(126);
    let events = harness.events_until_end().await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            error: Some(RescueError::Launch(_)),
            ..
        })
    ));
}

#[tokio::test]
async fn finished_rescue_is_mounted_for_inspection_when_configured() {
    let mut harness = Harness::with(
        FakeRunner::new(),
        FakeMountBackend::with_volumes(&["/dev/loop7"]),
        |config| config.auto_mount_on_finish = true,
    );
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    let process = harness.runner.last_process();
    process.push(format!("{BANNER}{}Finished\n", status_block(10_485)));
    process.exit(0);

    let events = harness.events_until_end().await;
    let Some(SessionEvent::SessionEnded { report, .. }) = events.last() else {
        panic!("session did not end");
    };
    let mount = report.inspection_mount.as_ref().expect("auto mount");
    assert!(mount.read_only);
    assert_eq!(mount.volume.device, "/dev/loop7");

    harness.controller.unmount_output().await.expect("unmount");
    harness.controller.unmount_output().await.expect("second unmount is a no-op");
    let unmounts = harness
        .backend
        .calls()
        .iter()
        .filter(|call| call.starts_with("unmount"))
        .count();
    assert_eq!(unmounts, 1);
}

#[tokio::test]
async fn inspection_mount_taken_mid_run_is_released_on_abort() {
    let mut harness = Harness::new(FakeRunner::exiting_on_interrupt(1));
    let options = harness.options();
    let output = options.output.clone();
    harness.controller.start(options).await.expect("start");

    let record = harness.controller.mount_output(None).await.expect("mount");
    assert!(record.read_only);

    harness.controller.abort().await.expect("abort");
    let events = harness.events_until_end().await;
    let Some(SessionEvent::SessionEnded { reason, report, .. }) = events.last() else {
        panic!("session did not end");
    };
    assert_eq!(*reason, EndReason::Aborted);
    assert!(report.inspection_mount.is_none());
    assert!(report.mount_note.is_none());

    assert!(harness.controller.mount_coordinator().record(&output).await.is_none());
    let calls = harness.backend.calls();
    assert!(calls.contains(&format!("unmount {}", record.mount_point.display())));
    assert!(calls.contains(&"detach /dev/loop7".to_string()));
}

#[tokio::test]
async fn new_session_releases_the_previous_inspection_mount_first() {
    let mut harness = Harness::with(
        FakeRunner::new(),
        FakeMountBackend::with_volumes(&["/dev/loop7"]),
        |config| config.auto_mount_on_finish = true,
    );
    let options = harness.options();
    let output = options.output.clone();
    harness.controller.start(options.clone()).await.expect("start");

    let process = harness.runner.last_process();
    process.push(format!("{BANNER}{}Finished\n", status_block(10_485)));
    process.exit(0);
    harness.events_until_end().await;

    let mounts = harness.controller.mount_coordinator();
    let record = mounts.record(&output).await.expect("auto mount kept");

    harness.controller.start(options).await.expect("second start");
    assert!(mounts.record(&output).await.is_none());
    assert_eq!(harness.runner.launches().len(), 2);

    let calls = harness.backend.calls();
    let unmount = format!("unmount {}", record.mount_point.display());
    assert_eq!(calls.iter().filter(|call| **call == unmount).count(), 1);
    assert_eq!(calls.last().map(String::as_str), Some("detach /dev/loop7"));
}

#[tokio::test]
async fn shutdown_aborts_the_live_session() {
    let mut harness = Harness::new(FakeRunner::exiting_on_interrupt(1));
    let options = harness.options();
    harness.controller.start(options).await.expect("start");

    harness.controller.shutdown().await.expect("shutdown");
    let events = harness.events_until_end().await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionEnded {
            reason: EndReason::Aborted,
            ..
        })
    ));
    assert_eq!(
        harness.controller.abort().await,
        Err(RescueError::ChannelClosed)
    );
}
