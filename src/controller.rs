use serde_json::Value;
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::ScreenConfig,
    error::{RelayError, Result},
    protocol::{MessageEnvelope, MessageType, RequestIds, ResponseData, ResponseEnvelope},
    transport::{HostChannel, Inbound, TransportAdapter},
    types::{ButtonStyle, GlucoseEntry, ScreenState, StatusColor},
    ui::WidgetSurface,
};

/// Text shown while a request is in flight
pub const LOADING_TEXT: &str = "Loading...";

/// User input delivered to a screen's event loop
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    /// Action button tapped
    Tap,
    /// Action button tapped with a request payload (e.g. a settings form)
    TapWith(Value),
    /// Leave the screen
    Exit,
}

/// What a screen requests and how its button reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    kind: MessageType,
    button_label: String,
}

impl Screen {
    /// Screen sending `kind` from a button labelled `button_label`
    #[must_use]
    pub fn new(kind: MessageType, button_label: impl Into<String>) -> Self {
        Self {
            kind,
            button_label: button_label.into(),
        }
    }

    /// Token screen
    #[must_use]
    pub fn secret() -> Self {
        Self::new(MessageType::GetSecret, "Get Secret")
    }

    /// Current glucose screen
    #[must_use]
    pub fn glucose() -> Self {
        Self::new(MessageType::FetchData, "Refresh")
    }

    /// URL check screen
    #[must_use]
    pub fn verify_url() -> Self {
        Self::new(MessageType::VerifyUrl, "Verify URL")
    }

    /// Settings screen
    #[must_use]
    pub fn settings() -> Self {
        Self::new(MessageType::UpdateSettings, "Save Settings")
    }

    /// Request type sent by this screen
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// Default button label
    #[must_use]
    pub fn button_label(&self) -> &str {
        &self.button_label
    }
}

/// Per-screen controller: `Idle -> Loading -> {Success, Error}`
///
/// Owns the screen's widget surface and transport for the lifetime of the
/// screen. Every request carries a fresh id; responses echoing another id
/// are ignored, and responses without an id are matched by payload shape.
pub struct ScreenController<S: WidgetSurface, C: HostChannel> {
    screen: Screen,
    surface: S,
    transport: TransportAdapter<C>,
    ids: RequestIds,
    state: ScreenState,
    deadline: Option<Instant>,
    config: ScreenConfig,
}

impl<S: WidgetSurface, C: HostChannel> ScreenController<S, C> {
    /// Build the controller and render the idle screen
    pub fn new(
        screen: Screen,
        mut surface: S,
        transport: TransportAdapter<C>,
        config: ScreenConfig,
    ) -> Self {
        surface.set_button(screen.button_label(), ButtonStyle::Default);

        Self {
            screen,
            surface,
            transport,
            ids: RequestIds::new(),
            state: ScreenState::Idle,
            deadline: None,
            config,
        }
    }

    /// Current state
    pub const fn state(&self) -> &ScreenState {
        &self.state
    }

    /// Screen definition
    pub const fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Widget surface
    pub const fn surface(&self) -> &S {
        &self.surface
    }

    /// Send this screen's request and enter `Loading`
    ///
    /// Send failures are rendered immediately; they never propagate.
    pub async fn trigger(&mut self, extra: Option<Value>) -> &ScreenState {
        let request_id = self.ids.next_id();
        let envelope = MessageEnvelope::request(self.screen.kind, extra).with_request_id(request_id);

        info!("{} request #{}", self.screen.kind, request_id);
        self.state = ScreenState::Loading { request_id };
        self.deadline = self.config.response_timeout.map(|timeout| Instant::now() + timeout);
        self.surface.show_status(LOADING_TEXT, StatusColor::Pending);
        self.surface.set_button(LOADING_TEXT, ButtonStyle::Busy);

        if let Err(e) = self.transport.send(&envelope).await {
            warn!("Failed to send {} request: {}", self.screen.kind, e);
            self.fail(&e);
        }

        &self.state
    }

    /// Apply a response if it answers the pending request
    ///
    /// Returns whether the response was applied.
    pub fn handle_response(&mut self, response: &ResponseEnvelope) -> bool {
        let ScreenState::Loading { request_id } = self.state else {
            debug!("Ignoring response while {}", self.state);
            return false;
        };

        let matched = match response.request_id {
            Some(id) => id == request_id,
            None => self.screen.kind.matches_shape(&response.data),
        };
        if !matched {
            debug!(
                "Ignoring response {:?}, waiting for #{}",
                response.request_id, request_id
            );
            return false;
        }

        match outcome_text(self.screen.kind, &response.data, &self.config) {
            Ok(text) => self.finish(ScreenState::Success(text), StatusColor::Success),
            Err(text) => self.finish(ScreenState::Error(text), StatusColor::Failure),
        }
        true
    }

    /// Give up on the pending request
    pub fn expire(&mut self) {
        if !self.state.is_loading() {
            return;
        }
        let timeout_ms = self
            .config
            .response_timeout
            .map_or(0, |timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        warn!("{} request timed out", self.screen.kind);
        self.fail(&RelayError::Timeout { timeout_ms });
    }

    /// Drive the screen until `Exit` or the action source closes
    ///
    /// Returns the surface after teardown.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HandlerAlreadyRegistered`] if the transport's
    /// inbound side was already claimed. A transport that is unavailable is
    /// not an error; taps then render the unavailability.
    pub async fn run(mut self, mut actions: mpsc::UnboundedReceiver<UiAction>) -> Result<S> {
        let mut inbound = match self.transport.subscribe::<ResponseEnvelope>() {
            Ok(inbound) => Some(inbound),
            Err(RelayError::TransportUnavailable { transport }) => {
                warn!("{} unavailable, screen runs without responses", transport);
                None
            }
            Err(e) => return Err(e),
        };

        info!("Screen {} opened", self.screen.kind);
        loop {
            let listening = inbound.is_some();
            let deadline = self.deadline;

            tokio::select! {
                action = actions.recv() => match action {
                    Some(UiAction::Tap) => {
                        self.trigger(None).await;
                    }
                    Some(UiAction::TapWith(payload)) => {
                        self.trigger(Some(payload)).await;
                    }
                    Some(UiAction::Exit) | None => break,
                },
                response = next_response(&mut inbound), if listening => match response {
                    Some(response) => {
                        self.handle_response(&response);
                    }
                    None => {
                        info!("Transport closed");
                        inbound = None;
                    }
                },
                () = wait_until(deadline), if deadline.is_some() && self.state.is_loading() => {
                    self.expire();
                }
            }
        }

        self.surface.teardown();
        info!("Screen {} closed", self.screen.kind);
        Ok(self.surface)
    }

    fn finish(&mut self, state: ScreenState, color: StatusColor) {
        self.surface.show_status(&state.to_string(), color);
        self.surface
            .set_button(self.screen.button_label(), ButtonStyle::Default);
        self.state = state;
        self.deadline = None;
    }

    fn fail(&mut self, error: &RelayError) {
        self.finish(ScreenState::Error(format!("Error: {error}")), StatusColor::Failure);
    }
}

async fn next_response(inbound: &mut Option<Inbound<ResponseEnvelope>>) -> Option<ResponseEnvelope> {
    match inbound {
        Some(inbound) => inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Render a token, truncated to `max_chars` characters plus `...`
#[must_use]
pub fn render_token(token: &str, max_chars: usize) -> String {
    if token.chars().count() > max_chars {
        let shown: String = token.chars().take(max_chars).collect();
        format!("Token: {shown}...")
    } else {
        format!("Token: {token}")
    }
}

/// Render the newest reading with trend arrow and delta to the one before
///
/// Entries are expected newest first, as Nightscout serves them.
#[must_use]
pub fn render_glucose(entries: &[GlucoseEntry]) -> String {
    let Some(latest) = entries.first() else {
        return "No data".to_string();
    };

    let mut text = latest.sgv.to_string();
    if let Some(direction) = latest.direction {
        text.push(' ');
        text.push_str(direction.arrow());
    }
    if let Some(previous) = entries.get(1) {
        let delta = latest.sgv.saturating_sub(previous.sgv);
        text.push_str(&format!(" ({delta:+})"));
    }
    text
}

fn outcome_text(
    kind: MessageType,
    data: &ResponseData,
    config: &ScreenConfig,
) -> std::result::Result<String, String> {
    if let Err(e) = data.check(kind) {
        return Err(match e {
            RelayError::Remote(message) | RelayError::ParseError(message) => {
                format!("Error: {message}")
            }
            other => format!("Error: {other}"),
        });
    }

    Ok(match kind {
        MessageType::GetSecret => {
            render_token(data.token.as_deref().unwrap_or_default(), config.token_display_chars)
        }
        MessageType::FetchData => render_glucose(data.entries.as_deref().unwrap_or_default()),
        MessageType::VerifyUrl => match &data.version {
            Some(version) => format!("URL OK (v{version})"),
            None => "URL OK".to_string(),
        },
        MessageType::UpdateSettings => "Settings saved".to_string(),
    })
}
