//! Wires the verify, glucose and secret screens to a companion over an
//! in-memory channel.
//!
//! ```text
//! cargo run --example relay_demo -- https://my-site.example [token]
//! ```

use glucolink::{
    ChannelKind, Companion, CompanionConfig, LogSurface, LoopbackChannel, Screen, ScreenConfig,
    ScreenController, TransportAdapter, UiAction,
};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: relay_demo <nightscout-url> [token]");
        std::process::exit(2);
    };
    let config = CompanionConfig {
        nightscout_url: Some(url),
        access_token: args.next(),
        ..CompanionConfig::default()
    };

    let screens = [
        ("verify", Screen::verify_url()),
        ("glucose", Screen::glucose()),
        ("secret", Screen::secret()),
    ];

    for (name, screen) in screens {
        let (watch, phone) = LoopbackChannel::pair(ChannelKind::PeerSocket);
        let companion = Companion::new(config.clone())?;
        let serving = tokio::spawn(companion.serve(TransportAdapter::new(phone)));

        let controller = ScreenController::new(
            screen,
            LogSurface::new(name),
            TransportAdapter::new(watch),
            ScreenConfig {
                response_timeout: Some(Duration::from_secs(15)),
                ..ScreenConfig::default()
            },
        );
        let (actions, actions_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(controller.run(actions_rx));

        actions.send(UiAction::Tap)?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        actions.send(UiAction::Exit)?;

        let surface = running.await??;
        match surface.status() {
            Some((text, color)) => println!("{name}: {text} ({color})"),
            None => println!("{name}: <nothing rendered>"),
        }
        serving.await??;
    }

    Ok(())
}
