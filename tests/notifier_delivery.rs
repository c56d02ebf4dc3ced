// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, frame, GateTransport, RecordingTransport, SteppingClock, FIRE_BOX};
use fire_sentinel::config::NotifierConfig;
use fire_sentinel::detection::{BBox, ReplayDetector};
use fire_sentinel::error::{DeliveryError, QueueOverflow};
use fire_sentinel::notify::AlertMessage;
use fire_sentinel::{AlertSink, Dispatcher, FirePipeline, ManualClock, Notifier, SystemClock};

fn alert(event_id: u64) -> AlertMessage {
    AlertMessage {
        event_id,
        frame_id: event_id,
        snapshot: None,
        bbox: BBox::new(10.0, 10.0, 50.0, 50.0),
        confidence: 0.9,
        timestamp: event_id as f64,
        raised_at: chrono::Utc::now(),
        location: "test site".into(),
        track_count: 1,
    }
}

#[test]
fn pipeline_alert_reaches_the_transport() {
    let clock = Arc::new(ManualClock::new(0.0));
    let transport = RecordingTransport::new(clock.clone());
    let cfg = config(3, 2.0);
    let dispatcher = Dispatcher::new(&cfg.notifier, transport.clone(), clock, "chat");
    let notifier = Notifier::start(&cfg.notifier, dispatcher).unwrap();

    let mut p = FirePipeline::new(&cfg, ReplayDetector, notifier);
    for i in 1..=10u64 {
        p.process_frame(frame(i, i as f64 * 0.5, &[FIRE_BOX]));
    }
    let metrics = p.into_sink().shutdown();

    assert_eq!(metrics.submitted, 1);
    assert_eq!(metrics.delivered, 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].caption.contains("Event: #1"));
    assert!(sent[0].caption.contains("Drone surveillance area"));
    assert!(!sent[0].has_image);
}

#[test]
fn notifier_respects_rate_limit_without_dropping() {
    let clock = Arc::new(ManualClock::new(0.0));
    let transport = RecordingTransport::new(clock.clone());
    let cfg = NotifierConfig {
        max_alerts_per_minute: 3,
        ..NotifierConfig::default()
    };
    let mut notifier = Notifier::start(&cfg, Dispatcher::new(&cfg, transport.clone(), clock, "chat")).unwrap();

    for id in 1..=7 {
        notifier.submit(alert(id)).unwrap();
    }
    let metrics = notifier.shutdown();

    assert_eq!(metrics.delivered, 7);
    assert_eq!(metrics.dropped, 0);
    let times: Vec<f64> = transport.sent().iter().map(|s| s.at).collect();
    for (i, &start) in times.iter().enumerate() {
        let in_window = times[i..].iter().filter(|&&t| t - start < 60.0).count();
        assert!(in_window <= 3, "{times:?}");
    }
}

#[test]
fn concurrent_workers_share_limit_and_dedup() {
    let clock = Arc::new(SteppingClock::default());
    let transport = RecordingTransport::new(clock.clone());
    let cfg = NotifierConfig {
        concurrency: 4,
        max_alerts_per_minute: 2,
        min_realert_interval_seconds: 3_600.0,
        queue_capacity: 16,
        drain_timeout_ms: 30_000,
        ..NotifierConfig::default()
    };
    let mut notifier = Notifier::start(&cfg, Dispatcher::new(&cfg, transport.clone(), clock, "chat")).unwrap();

    for id in 1..=8 {
        notifier.submit(alert(id)).unwrap();
    }
    // 同一事件的重复告警, 无论落在哪个工作线程都只发送一次
    notifier.submit(alert(3)).unwrap();
    let metrics = notifier.shutdown();

    assert_eq!(metrics.submitted, 9);
    assert_eq!(metrics.delivered, 8);
    assert_eq!(metrics.deduplicated, 1);
    assert_eq!(metrics.dropped, 0);
    assert_eq!(metrics.abandoned, 0);

    let sent = transport.sent();
    let mut events: Vec<String> = sent
        .iter()
        .filter_map(|s| s.caption.lines().find(|l| l.starts_with("Event: #")).map(str::to_string))
        .collect();
    events.sort();
    events.dedup();
    assert_eq!(sent.len(), 8);
    assert_eq!(events.len(), 8);

    let mut times: Vec<f64> = sent.iter().map(|s| s.at).collect();
    times.sort_by(f64::total_cmp);
    for (i, &start) in times.iter().enumerate() {
        let in_window = times[i..].iter().filter(|&&t| t - start < 60.0).count();
        assert!(in_window <= 2, "{times:?}");
    }
}

#[test]
fn transient_failures_are_retried_and_permanent_ones_are_not() {
    let clock = Arc::new(ManualClock::new(0.0));
    let transport = RecordingTransport::scripted(
        clock.clone(),
        vec![
            Err(DeliveryError::Transient("HTTP 502".into())),
            Ok(Some(1)),
            Err(DeliveryError::Permanent("HTTP 403: bot was blocked".into())),
        ],
    );
    let cfg = NotifierConfig::default();
    let mut notifier = Notifier::start(&cfg, Dispatcher::new(&cfg, transport.clone(), clock, "chat")).unwrap();

    notifier.submit(alert(1)).unwrap();
    notifier.submit(alert(2)).unwrap();
    let metrics = notifier.shutdown();

    assert_eq!(transport.sent().len(), 3);
    assert_eq!(metrics.delivered, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.retries, 1);
}

#[test]
fn full_queue_drops_after_timeout() {
    let (transport, started, gate) = GateTransport::new();
    let cfg = NotifierConfig {
        queue_capacity: 1,
        enqueue_timeout_ms: 20,
        ..NotifierConfig::default()
    };
    let dispatcher = Dispatcher::new(&cfg, transport.clone(), Arc::new(SystemClock::new()), "chat");
    let mut notifier = Notifier::start(&cfg, dispatcher).unwrap();

    // 工作线程阻塞在第1条, 第2条占满队列
    notifier.submit(alert(1)).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    notifier.submit(alert(2)).unwrap();

    assert_eq!(
        notifier.submit(alert(3)),
        Err(QueueOverflow::Full {
            event_id: 3,
            capacity: 1
        })
    );

    gate.send(()).unwrap();
    gate.send(()).unwrap();
    let metrics = notifier.shutdown();

    assert_eq!(metrics.dropped, 1);
    assert_eq!(metrics.delivered, 2);
    assert_eq!(transport.captions.lock().len(), 2);
}

#[test]
fn expired_event_supersedes_queued_alert() {
    let (transport, started, gate) = GateTransport::new();
    let cfg = NotifierConfig::default();
    let dispatcher = Dispatcher::new(&cfg, transport.clone(), Arc::new(SystemClock::new()), "chat");
    let mut notifier = Notifier::start(&cfg, dispatcher).unwrap();

    notifier.submit(alert(1)).unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    notifier.submit(alert(2)).unwrap();
    notifier.supersede(2);
    // 正在发送的告警不受影响
    notifier.supersede(1);

    gate.send(()).unwrap();
    let metrics = notifier.shutdown();

    assert_eq!(metrics.superseded, 1);
    assert_eq!(metrics.delivered, 1);
    let captions = transport.captions.lock();
    assert_eq!(captions.len(), 1);
    assert!(captions[0].contains("Event: #1"));
}

#[test]
fn closed_notifier_rejects_alerts() {
    let clock = Arc::new(ManualClock::new(0.0));
    let transport = RecordingTransport::new(clock.clone());
    let cfg = NotifierConfig::default();
    let mut notifier = Notifier::start(&cfg, Dispatcher::new(&cfg, transport, clock, "chat")).unwrap();

    notifier.shutdown();
    assert_eq!(notifier.submit(alert(1)), Err(QueueOverflow::Closed(1)));
    assert_eq!(notifier.metrics().dropped, 1);
}

#[test]
fn drain_timeout_abandons_pending_work() {
    let clock = Arc::new(SystemClock::new());
    let script = (0..10).map(|_| Err(DeliveryError::Transient("HTTP 503".into()))).collect();
    let transport = RecordingTransport::scripted(clock.clone(), script);
    let cfg = NotifierConfig {
        initial_backoff_ms: 30_000,
        drain_timeout_ms: 50,
        ..NotifierConfig::default()
    };
    let mut notifier = Notifier::start(&cfg, Dispatcher::new(&cfg, transport.clone(), clock, "chat")).unwrap();

    notifier.submit(alert(1)).unwrap();
    notifier.submit(alert(2)).unwrap();
    let metrics = notifier.shutdown();

    assert_eq!(metrics.delivered, 0);
    assert_eq!(metrics.abandoned, 2);
    assert_eq!(transport.sent().len(), 1);
}
