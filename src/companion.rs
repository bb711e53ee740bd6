//! Phone-side peer: answers watch envelopes by calling Nightscout.

use reqwest::{header::ACCEPT, Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    config::CompanionConfig,
    error::{RelayError, Result},
    protocol::{
        FetchPayload, MessageEnvelope, MessageType, ResponseData, ResponseEnvelope,
        SettingsPayload, VerifyPayload,
    },
    transport::{HostChannel, TransportAdapter},
    types::{GlucoseEntry, ServerStatus},
    MAX_ENTRY_COUNT, NIGHTSCOUT_ENTRIES_PATH, NIGHTSCOUT_STATUS_PATH,
};

/// Body returned by a token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// The API token
    pub token: String,
    /// Optional human readable note
    #[serde(default)]
    pub message: Option<String>,
}

/// Minimal Nightscout REST client
#[derive(Debug, Clone)]
pub struct NightscoutClient {
    http: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl NightscoutClient {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidUrl`] unless `base_url` is an absolute
    /// http(s) URL, or [`RelayError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            access_token,
        })
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET /api/v1/status`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Http`] for transport failures and
    /// [`RelayError::Remote`] for non-success HTTP statuses.
    pub async fn status(&self) -> Result<ServerStatus> {
        let url = self.endpoint(NIGHTSCOUT_STATUS_PATH)?;
        debug!("GET {}", redact(&url));

        let response = self
            .authorized(self.http.get(url))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(response.json().await?)
    }

    /// `GET /api/v1/entries.json?count=N`, newest first
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidParameters`] for a count outside
    /// `1..=MAX_ENTRY_COUNT`, otherwise as [`NightscoutClient::status`].
    pub async fn entries(&self, count: u32) -> Result<Vec<GlucoseEntry>> {
        if count == 0 || count > MAX_ENTRY_COUNT {
            return Err(RelayError::InvalidParameters(format!(
                "count must be between 1 and {MAX_ENTRY_COUNT}, got {count}"
            )));
        }

        let url = self.endpoint(NIGHTSCOUT_ENTRIES_PATH)?;
        debug!("GET {} count={}", redact(&url), count);

        let response = self
            .authorized(self.http.get(url))
            .query(&[("count", count)])
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| RelayError::InvalidUrl(format!("{path}: {e}")))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.query(&[("token", token)]),
            None => request,
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| RelayError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(RelayError::InvalidUrl(format!("{trimmed}: expected an http(s) URL")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(RelayError::Remote(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("HTTP {}: check access token", status.as_u16())
        }
        _ => format!("HTTP {}", status.as_u16()),
    }))
}

fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Fetch a token from a token endpoint
///
/// # Errors
///
/// Returns [`RelayError::InvalidUrl`], [`RelayError::Http`] or
/// [`RelayError::Remote`] as for [`NightscoutClient::status`].
pub async fn fetch_token(http: &Client, endpoint: &str) -> Result<TokenGrant> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| RelayError::InvalidUrl(format!("{endpoint}: {e}")))?;
    debug!("GET {}", redact(&url));

    let response = http.get(url).header(ACCEPT, "application/json").send().await?;
    let grant: TokenGrant = check_status(response)?.json().await?;
    if let Some(message) = &grant.message {
        debug!("Token endpoint says: {}", message);
    }
    Ok(grant)
}

/// Answers watch requests; the peer end of the relay
pub struct Companion {
    config: CompanionConfig,
    http: Client,
}

impl Companion {
    /// Create a companion from validated settings
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for invalid settings or
    /// [`RelayError::Http`] if the HTTP client cannot be built.
    pub fn new(config: CompanionConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self { config, http })
    }

    /// Current settings
    #[must_use]
    pub const fn config(&self) -> &CompanionConfig {
        &self.config
    }

    /// Answer one envelope; failures become `success: false` responses
    pub async fn handle(&mut self, envelope: &MessageEnvelope) -> ResponseEnvelope {
        info!("Handling {} request {:?}", envelope.kind, envelope.request_id);

        let data = match envelope.kind {
            MessageType::VerifyUrl => self.verify_url(envelope).await,
            MessageType::FetchData => self.fetch_data(envelope).await,
            MessageType::UpdateSettings => self.update_settings(envelope),
            MessageType::GetSecret => self.get_secret().await.map(ResponseData::as_secret),
        };

        let data = data.unwrap_or_else(|e| {
            warn!("{} request failed: {}", envelope.kind, e);
            let failure = ResponseData::failure(e.to_string());
            if envelope.kind == MessageType::GetSecret {
                failure.as_secret()
            } else {
                failure
            }
        });

        ResponseEnvelope::new(envelope.request_id, data)
    }

    /// Serve envelopes from `transport` until it closes
    ///
    /// Requests are answered one at a time in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error if the inbound side cannot be claimed.
    pub async fn serve<C: HostChannel>(mut self, mut transport: TransportAdapter<C>) -> Result<Self> {
        let mut inbound = transport.subscribe::<MessageEnvelope>()?;
        info!("Companion serving over {}", transport.kind());

        while let Some(envelope) = inbound.recv().await {
            let response = self.handle(&envelope).await;
            if let Err(e) = transport.send(&response).await {
                warn!("Failed to answer {}: {}", envelope.kind, e);
            }
        }

        info!("Companion transport closed");
        Ok(self)
    }

    fn client_for(&self, url: Option<&str>) -> Result<NightscoutClient> {
        let url = url
            .or(self.config.nightscout_url.as_deref())
            .ok_or_else(|| RelayError::Config("no Nightscout URL configured".to_string()))?;
        NightscoutClient::new(
            url,
            self.config.access_token.clone(),
            self.config.http_timeout(),
        )
    }

    async fn verify_url(&self, envelope: &MessageEnvelope) -> Result<ResponseData> {
        let payload: VerifyPayload = envelope.payload_as()?;
        let client = self.client_for(payload.url.as_deref())?;
        let status = client.status().await?;

        if status.status.as_deref().is_some_and(|s| s != "ok") {
            return Err(RelayError::Remote(format!(
                "server status {}",
                status.status.unwrap_or_default()
            )));
        }

        let mut data = ResponseData::ok();
        data.version = status.version;
        Ok(data)
    }

    async fn fetch_data(&self, envelope: &MessageEnvelope) -> Result<ResponseData> {
        let payload: FetchPayload = envelope.payload_as()?;
        let client = self.client_for(None)?;
        let entries = client
            .entries(payload.count.unwrap_or(self.config.entry_count))
            .await?;
        Ok(ResponseData::entries(entries))
    }

    fn update_settings(&mut self, envelope: &MessageEnvelope) -> Result<ResponseData> {
        let payload: SettingsPayload = envelope.payload_as()?;

        let mut updated = self.config.clone();
        if let Some(url) = payload.url {
            parse_base_url(&url)?;
            updated.nightscout_url = Some(url.trim().to_string());
        }
        if let Some(token) = payload.token {
            updated.access_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(count) = payload.count {
            updated.entry_count = count;
        }
        updated
            .validate()
            .map_err(|e| RelayError::InvalidParameters(e.to_string()))?;

        self.config = updated;
        info!("Settings updated");
        Ok(ResponseData::ok())
    }

    async fn get_secret(&self) -> Result<ResponseData> {
        if let Some(endpoint) = &self.config.token_endpoint {
            let grant = fetch_token(&self.http, endpoint).await?;
            return Ok(ResponseData::token(grant.token));
        }

        self.config
            .access_token
            .as_ref()
            .map(ResponseData::token)
            .ok_or_else(|| RelayError::Remote("no token configured".to_string()))
    }
}
