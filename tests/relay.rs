use std::time::Duration;

use glucolink::{
    ChannelKind, Companion, CompanionConfig, LoopbackChannel, Screen, ScreenConfig,
    ScreenController, ScreenState, StatusColor, TransportAdapter, UiAction, WidgetSurface,
};
use httpmock::{Method::GET, MockServer};
use serde_json::json;
use tokio::sync::{mpsc, watch};

/// Surface publishing every render so tests can wait for a state
struct WatchedSurface {
    renders: watch::Sender<Vec<(String, StatusColor)>>,
}

impl WatchedSurface {
    fn new() -> (Self, watch::Receiver<Vec<(String, StatusColor)>>) {
        let (renders, rx) = watch::channel(Vec::new());
        (Self { renders }, rx)
    }
}

impl WidgetSurface for WatchedSurface {
    fn show_status(&mut self, text: &str, color: StatusColor) {
        self.renders
            .send_modify(|renders| renders.push((text.to_string(), color)));
    }

    fn set_button(&mut self, _label: &str, _style: glucolink::ButtonStyle) {}
}

async fn wait_for_render(
    renders: &mut watch::Receiver<Vec<(String, StatusColor)>>,
    count: usize,
) -> Vec<(String, StatusColor)> {
    let renders = tokio::time::timeout(
        Duration::from_secs(5),
        renders.wait_for(|renders| renders.len() >= count),
    )
    .await
    .expect("render timed out")
    .expect("surface dropped");
    renders.clone()
}

async fn nightscout() -> MockServer {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/status");
            then.status(200)
                .json_body(json!({"status": "ok", "version": "15.0.2"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/entries.json")
                .query_param("count", "10");
            then.status(200).json_body(json!([
                {"sgv": 154, "date": 1_700_000_300_000_i64, "direction": "FortyFiveUp", "type": "sgv"},
                {"sgv": 149, "date": 1_700_000_000_000_i64, "direction": "Flat", "type": "sgv"}
            ]));
        })
        .await;
    server
}

#[tokio::test]
async fn glucose_screen_against_live_companion() {
    let server = nightscout().await;
    let (watch_end, phone_end) = LoopbackChannel::pair(ChannelKind::PeerSocket);

    let companion = Companion::new(CompanionConfig {
        nightscout_url: Some(server.base_url()),
        ..CompanionConfig::default()
    })
    .unwrap();
    let serving = tokio::spawn(companion.serve(TransportAdapter::new(phone_end)));

    let (surface, mut renders) = WatchedSurface::new();
    let screen = ScreenController::new(
        Screen::glucose(),
        surface,
        TransportAdapter::new(watch_end),
        ScreenConfig::default(),
    );
    let (actions, actions_rx) = mpsc::unbounded_channel();
    let running = tokio::spawn(screen.run(actions_rx));

    actions.send(UiAction::Tap).unwrap();
    let renders_seen = wait_for_render(&mut renders, 2).await;
    assert_eq!(renders_seen[0], ("Loading...".to_string(), StatusColor::Pending));
    assert_eq!(renders_seen[1], ("154 ↗ (+5)".to_string(), StatusColor::Success));

    actions.send(UiAction::Exit).unwrap();
    running.await.unwrap().unwrap();
    serving.abort();
}

#[tokio::test]
async fn settings_then_verify_over_ble_kind_channel() {
    let server = nightscout().await;
    let (watch_end, phone_end) = LoopbackChannel::pair(ChannelKind::Ble);

    let companion = Companion::new(CompanionConfig::default()).unwrap();
    let serving = tokio::spawn(companion.serve(TransportAdapter::new(phone_end)));

    let mut watch_adapter = TransportAdapter::new(watch_end);
    let mut inbound = watch_adapter
        .subscribe::<glucolink::ResponseEnvelope>()
        .unwrap();

    let settings = glucolink::MessageEnvelope::request(
        glucolink::MessageType::UpdateSettings,
        Some(json!({"url": server.base_url(), "count": 10})),
    )
    .with_request_id(1);
    watch_adapter.send(&settings).await.unwrap();
    let saved = inbound.recv().await.unwrap();
    assert_eq!(saved.request_id, Some(1));
    assert!(saved.data.success);

    let verify = glucolink::MessageEnvelope::request(glucolink::MessageType::VerifyUrl, None)
        .with_request_id(2);
    watch_adapter.send(&verify).await.unwrap();
    let verified = inbound.recv().await.unwrap();
    assert_eq!(verified.request_id, Some(2));
    assert_eq!(verified.data.version.as_deref(), Some("15.0.2"));

    drop(watch_adapter);
    drop(inbound);
    let companion = serving.await.unwrap().unwrap();
    assert_eq!(
        companion.config().nightscout_url.as_deref(),
        Some(server.base_url().as_str())
    );
}

#[tokio::test]
async fn settings_screen_saves_form_and_glucose_screen_uses_it() {
    let server = nightscout().await;
    let (watch_end, phone_end) = LoopbackChannel::pair(ChannelKind::PeerSocket);
    let companion = Companion::new(CompanionConfig::default()).unwrap();
    let serving = tokio::spawn(companion.serve(TransportAdapter::new(phone_end)));

    let (surface, mut renders) = WatchedSurface::new();
    let screen = ScreenController::new(
        Screen::settings(),
        surface,
        TransportAdapter::new(watch_end),
        ScreenConfig::default(),
    );
    let (actions, actions_rx) = mpsc::unbounded_channel();
    let running = tokio::spawn(screen.run(actions_rx));

    actions
        .send(UiAction::TapWith(json!({"url": server.base_url()})))
        .unwrap();
    let renders_seen = wait_for_render(&mut renders, 2).await;
    assert_eq!(
        renders_seen[1],
        ("Settings saved".to_string(), StatusColor::Success)
    );

    actions.send(UiAction::Exit).unwrap();
    running.await.unwrap().unwrap();

    // The watch end is gone with the screen, so the companion stops serving.
    let mut companion = serving.await.unwrap().unwrap();
    let response = companion
        .handle(&glucolink::MessageEnvelope::request(
            glucolink::MessageType::FetchData,
            None,
        ))
        .await;
    assert_eq!(response.data.entries.map(|entries| entries.len()), Some(2));
}

#[tokio::test]
async fn tap_without_host_messaging_renders_error() {
    let (surface, mut renders) = WatchedSurface::new();
    let screen = ScreenController::new(
        Screen::verify_url(),
        surface,
        TransportAdapter::new(LoopbackChannel::unavailable(ChannelKind::PeerSocket)),
        ScreenConfig::default(),
    );
    let (actions, actions_rx) = mpsc::unbounded_channel();
    let running = tokio::spawn(screen.run(actions_rx));

    actions.send(UiAction::Tap).unwrap();
    let renders_seen = wait_for_render(&mut renders, 2).await;
    assert_eq!(
        renders_seen[1],
        (
            "Error: messaging unavailable".to_string(),
            StatusColor::Failure
        )
    );

    drop(actions);
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn secret_screen_run_loop_shows_companion_error() {
    let (watch_end, phone_end) = LoopbackChannel::pair(ChannelKind::PeerSocket);
    let companion = Companion::new(CompanionConfig::default()).unwrap();
    tokio::spawn(companion.serve(TransportAdapter::new(phone_end)));

    let (surface, mut renders) = WatchedSurface::new();
    let screen = ScreenController::new(
        Screen::secret(),
        surface,
        TransportAdapter::new(watch_end),
        ScreenConfig::default(),
    );
    let (actions, actions_rx) = mpsc::unbounded_channel();
    let running = tokio::spawn(screen.run(actions_rx));

    actions.send(UiAction::Tap).unwrap();
    let renders_seen = wait_for_render(&mut renders, 2).await;
    assert_eq!(
        renders_seen[1],
        ("Error: no token configured".to_string(), StatusColor::Failure)
    );

    drop(actions);
    running.await.unwrap().unwrap();
}

#[test]
fn screen_state_text() {
    assert_eq!(ScreenState::Success("120 →".into()).to_string(), "120 →");
}
