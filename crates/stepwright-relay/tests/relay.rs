//! A relay session: record against one page, replay on a copy of it.

use std::time::Duration;

use stepwright::{EngineConfig, Snapshot, StepEvent, StepRequest, StepStatus};
use stepwright_relay::Relay;

const PAGE: &str = r#"{
    "url": "https://example.com/consent",
    "children": [{
        "tag": "html",
        "children": [{
            "tag": "body",
            "children": [
                {"tag": "label", "attrs": {"for": "name"}, "children": [{"text": "Full name"}]},
                {"tag": "input", "attrs": {"id": "name"},
                 "rect": {"x": 0, "y": 0, "width": 200, "height": 30}},
                {"tag": "button", "rect": {"x": 0, "y": 40, "width": 80, "height": 30},
                 "children": [{"text": "Allow all"}]}
            ]
        }]
    }]
}"#;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.replay.step_delay_ms = 0;
    config.replay.step_jitter_ms = 0;
    config.executor.settle_ms = 1;
    config
}

#[tokio::test]
async fn test_recorded_steps_replay_on_a_fresh_page() {
    let snapshot = Snapshot::from_json(PAGE).expect("parse page");
    let mut recorder = Relay::new(config());
    recorder.load_snapshot(&snapshot);
    recorder
        .capture("/html/body/input", StepEvent::Input, Some("Ada Lovelace"))
        .expect("capture input");
    recorder
        .capture("/html/body/button", StepEvent::Click, None)
        .expect("capture click");
    let recording = recorder.export_recording(None).expect("export");
    assert_eq!(recording.steps.len(), 3);

    let mut player = Relay::new(config());
    player.load_snapshot(&snapshot);
    let replayer = player.replayer().expect("page loaded");
    for step in &recording.steps {
        assert!(replayer.run_step(&StepRequest::from(step)).await, "step {}", step.label);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    let notices = player.drain_notices();
    assert_eq!(notices.len(), 6);
    assert!(notices.iter().all(|n| n.status != StepStatus::Error));
}

#[tokio::test(start_paused = true)]
async fn test_poll_clicks_consent_until_stopped() {
    let snapshot = Snapshot::from_json(PAGE).expect("parse page");
    let mut relay = Relay::new(config());
    relay.load_snapshot(&snapshot);

    // The button stays, so stop once it has been clicked a few times.
    let replayer = relay.replayer().expect("page loaded");
    let stop = replayer.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stop.stop();
    });

    let config = relay.poll_config(Some(vec!["allow".into()]), Some(10), Some(1000));
    let outcome = replayer.poll_and_click(&config).await;
    assert_eq!(outcome.clicks, 3);
    assert!(!outcome.timed_out);
}
