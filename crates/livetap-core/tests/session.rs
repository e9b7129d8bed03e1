mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{After, FakeLauncher};
use livetap_core::{
    CaptureConfig, CaptureError, CaptureLauncher, CaptureSession, Interrupt, StopReason,
};

fn session(launcher: &Arc<FakeLauncher>) -> CaptureSession {
    CaptureSession::with_launcher(
        CaptureConfig::default().with_interface("eth0"),
        Arc::clone(launcher) as Arc<dyn CaptureLauncher>,
    )
    .unwrap()
}

#[test]
fn sniff_stops_at_packet_count() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(5), After::Hang),
    );
    let mut session = session(&launcher);

    let outcome = session
        .sniff_with(Some(3), None, &Interrupt::never())
        .unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.captured, 3);
    let numbers: Vec<u64> = session.packets().iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(!session.is_attached());
    assert_eq!(launcher.process(0).terminations(), 1);
    assert!(launcher.launches()[0].windows(2).any(|w| w == ["-c", "3"]));
}

#[test]
fn sniff_runs_until_stream_ends_without_limit() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(4), After::Exit),
    );
    let mut session = session(&launcher);

    let outcome = session.sniff_with(None, None, &Interrupt::never()).unwrap();

    assert!(outcome.completed());
    assert_eq!(session.packets().len(), 4);
    assert!(!session.is_attached());
}

#[test]
fn timeout_keeps_packets_and_clears_the_process() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(2), After::Hang),
    );
    let mut session = session(&launcher);

    let started = Instant::now();
    let outcome = session
        .sniff_with(Some(10), Some(Duration::from_millis(300)), &Interrupt::never())
        .unwrap();

    assert_eq!(outcome.reason, StopReason::TimedOut);
    assert_eq!(session.packets().len(), 2);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!session.is_attached());
    assert!(!launcher.process(0).is_running());
    assert_eq!(launcher.process(0).terminations(), 1);
}

#[test]
fn silent_source_times_out_promptly() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);

    let started = Instant::now();
    let outcome = session
        .sniff_with(None, Some(Duration::from_millis(10)), &Interrupt::never())
        .unwrap();

    assert_eq!(outcome.reason, StopReason::TimedOut);
    assert_eq!(outcome.captured, 0);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!session.is_attached());

    // The session is reusable after a timeout.
    let again = session
        .sniff_with(None, Some(Duration::from_millis(10)), &Interrupt::never())
        .unwrap();
    assert_eq!(again.reason, StopReason::TimedOut);
    assert_eq!(launcher.process_count(), 2);
}

#[test]
fn interrupt_keeps_packets_already_captured() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(2), After::Hang),
    );
    let mut session = session(&launcher);
    let (trigger, interrupt) = Interrupt::manual();

    let presser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.trigger();
    });
    let outcome = session.sniff_with(None, None, &interrupt).unwrap();
    presser.join().unwrap();

    assert_eq!(outcome.reason, StopReason::Interrupted);
    assert_eq!(outcome.captured, 2);
    assert_eq!(session.packets().len(), 2);
    assert!(!session.is_attached());
}

#[test]
fn dropped_interrupt_trigger_does_not_stop_the_run() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(3), After::Exit),
    );
    let mut session = session(&launcher);
    let (trigger, interrupt) = Interrupt::manual();
    drop(trigger);

    let outcome = session.sniff_with(None, None, &interrupt).unwrap();
    assert!(outcome.completed());
    assert_eq!(outcome.captured, 3);
}

#[test]
fn repeated_sniffs_accumulate_and_use_fresh_processes() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"])
            .plan(common::pcapng_capture(2), After::Exit)
            .plan(common::pcapng_capture(3), After::Exit),
    );
    let mut session = session(&launcher);

    session.sniff_with(None, None, &Interrupt::never()).unwrap();
    let second = session.sniff_with(None, None, &Interrupt::never()).unwrap();

    assert_eq!(second.captured, 3);
    assert_eq!(session.packets().len(), 5);
    assert_eq!(launcher.process_count(), 2);
    assert_eq!(session.take_packets().len(), 5);
    assert!(session.packets().is_empty());
}

#[test]
fn decode_error_is_raised_after_cleanup() {
    let mut bytes = common::pcapng_capture(1);
    let packet = common::pcapng_udp_packet(9_000_000, 4000);
    bytes.extend_from_slice(&packet[..packet.len() - 6]);
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]).plan(bytes, After::Exit));
    let mut session = session(&launcher);

    let err = session
        .sniff_with(None, None, &Interrupt::never())
        .unwrap_err();

    assert!(matches!(err, CaptureError::Decode(_)));
    assert!(!session.is_attached());
    assert_eq!(launcher.process(0).terminations(), 1);
    assert_eq!(session.packets().len(), 1);
}

#[test]
fn failing_capture_tool_is_an_error_after_cleanup() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(2), After::Fail),
    );
    let mut session = session(&launcher);

    let err = session
        .sniff_with(Some(5), None, &Interrupt::never())
        .unwrap_err();

    match err {
        CaptureError::ProcessFailed { status, stderr } => {
            assert!(status.contains('2'));
            assert_eq!(stderr, common::FAILURE_MESSAGE);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.packets().len(), 2);
    assert!(!session.is_attached());
    assert_eq!(launcher.process(0).terminations(), 1);
}

#[test]
fn tool_exiting_without_a_capture_is_an_error() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]).plan(Vec::new(), After::Exit));
    let mut session = session(&launcher);

    let err = session
        .sniff_with(None, Some(Duration::from_secs(5)), &Interrupt::never())
        .unwrap_err();

    assert!(matches!(
        &err,
        CaptureError::ProcessFailed { status, .. } if status.contains("without writing a capture")
    ));
    assert!(!session.is_attached());
}

#[test]
fn empty_capture_from_a_clean_exit_completes() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_header(), After::Exit),
    );
    let mut session = session(&launcher);

    let outcome = session.sniff_with(Some(3), None, &Interrupt::never()).unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.captured, 0);
}

#[test]
fn stream_yields_the_tool_failure_last() {
    let launcher = Arc::new(
        FakeLauncher::new(&["eth0"]).plan(common::pcapng_capture(1), After::Fail),
    );
    let mut session = session(&launcher);
    let mut stream = session.sniff_continuously(None).unwrap();

    assert_eq!(stream.next().unwrap().unwrap().number, 1);
    assert!(matches!(
        stream.next(),
        Some(Err(CaptureError::ProcessFailed { .. }))
    ));
    assert!(stream.next().is_none());
    assert!(!session.is_attached());
}

#[test]
fn timeout_is_not_reported_as_a_tool_failure() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]).plan(Vec::new(), After::Hang));
    let mut session = session(&launcher);

    let outcome = session
        .sniff_with(None, Some(Duration::from_millis(100)), &Interrupt::never())
        .unwrap();

    assert_eq!(outcome.reason, StopReason::TimedOut);
    assert!(!session.is_attached());
}

#[test]
fn started_process_is_only_streamed_with_its_own_count() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);
    session.start(Some(5)).unwrap();

    let err = session.sniff_continuously(Some(3)).unwrap_err();
    assert!(matches!(err, CaptureError::Configuration(_)));
    assert!(session.sniff_continuously(None).is_err());
    assert!(session.is_attached());

    let stream = session.sniff_continuously(Some(5)).unwrap();
    assert_eq!(launcher.launches().len(), 1);
    assert!(launcher.launches()[0].windows(2).any(|w| w == ["-c", "5"]));
    drop(stream);
    assert!(!session.is_attached());
}

#[test]
fn display_filter_is_rejected_before_anything_runs() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let err = CaptureSession::with_launcher(
        CaptureConfig::default()
            .with_interface("eth0")
            .with_display_filter("dns"),
        Arc::clone(&launcher) as Arc<dyn CaptureLauncher>,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CaptureError::Configuration(message) if message.contains("display filter")
    ));
    assert!(launcher.launches().is_empty());

    let blank = CaptureSession::with_launcher(
        CaptureConfig::default()
            .with_interface("eth0")
            .with_display_filter(""),
        Arc::clone(&launcher) as Arc<dyn CaptureLauncher>,
    );
    assert!(blank.is_ok());
}

#[test]
fn start_failure_leaves_nothing_attached() {
    let launcher = Arc::new(FakeLauncher::failing(&["eth0"]));
    let mut session = session(&launcher);

    let err = session
        .sniff_with(Some(1), None, &Interrupt::never())
        .unwrap_err();

    assert!(matches!(err, CaptureError::SubprocessStart { .. }));
    assert!(!session.is_attached());
}

#[test]
fn stream_yields_packets_lazily_and_cleans_up_at_limit() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);

    let mut stream = session.sniff_continuously(Some(2)).unwrap();
    let process = launcher.process(0);
    process.push(common::pcapng_udp_packet(0, 1000));
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.number, 1);
    assert!(session.is_attached());

    process.push(common::pcapng_udp_packet(1_000_000, 1001));
    process.push(common::pcapng_udp_packet(2_000_000, 1002));
    assert_eq!(stream.next().unwrap().unwrap().number, 2);
    assert!(stream.next().is_none());
    assert!(stream.is_closed());
    assert!(!session.is_attached());
    assert_eq!(process.terminations(), 1);
}

#[test]
fn stream_cancel_from_another_thread_unblocks_the_reader() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);
    let stream = session.sniff_continuously(None).unwrap();
    let canceller = stream.canceller();

    let consumer = thread::spawn(move || stream.count());
    thread::sleep(Duration::from_millis(100));
    canceller.cancel().unwrap();

    assert_eq!(consumer.join().unwrap(), 0);
    assert!(!session.is_attached());
    assert!(matches!(
        canceller.cancel(),
        Err(CaptureError::CancellationDelivery)
    ));
    assert_eq!(launcher.process(0).terminations(), 1);
}

#[test]
fn closing_a_stream_twice_terminates_once() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);
    let mut stream = session.sniff_continuously(None).unwrap();

    stream.close();
    stream.close();
    drop(stream);
    session.cleanup();

    assert_eq!(launcher.process(0).terminations(), 1);
}

#[test]
fn dropping_the_session_terminates_a_live_stream() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0"]));
    let mut session = session(&launcher);
    let mut stream = session.sniff_continuously(None).unwrap();
    drop(session);

    assert_eq!(launcher.process(0).terminations(), 1);
    assert!(stream.next().is_none());
}

#[test]
fn parameters_follow_interface_order() {
    let launcher = Arc::new(FakeLauncher::new(&["eth0", "wlan0", "lo"]));
    let session = CaptureSession::with_launcher(
        CaptureConfig::default().with_bpf_filter("udp"),
        Arc::clone(&launcher) as Arc<dyn CaptureLauncher>,
    )
    .unwrap();

    let params = session.get_parameters(None);
    let interfaces: Vec<&str> = params
        .windows(2)
        .filter(|w| w[0] == "-i")
        .map(|w| w[1].as_str())
        .collect();
    assert_eq!(interfaces, vec!["eth0", "wlan0", "lo"]);
    assert_eq!(params[params.len() - 2..], ["-f", "udp"]);
    assert!(launcher.launches().is_empty());
}
