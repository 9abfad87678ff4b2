//! Initial-state fetcher: bearer-authenticated REST reads that seed each
//! reconciler before the first push arrives, plus the pin-state sync write.
//!
//! Built on `reqwest_middleware` with an exponential-backoff retry policy for
//! transient failures. Fetching runs concurrently with connection
//! establishment; neither blocks the other.

use reqwest::header::AUTHORIZATION;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::protocol::{AttendanceFrame, PinState, TelemetryFrame};

/// Failure modes of a snapshot fetch. All of them leave the caller with its
/// defined default state; none are fatal to the application.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no API credential configured")]
    MissingToken,
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    #[error("invalid response body: {0}")]
    Body(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// REST client for the PrimeGrow backend.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Builds a client with a 3-retry transient-failure policy. The token is
    /// optional at construction; requests fail with [`FetchError::MissingToken`]
    /// when it is absent.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            inner,
            base_url,
            auth_token,
        })
    }

    /// Latest sensor snapshot, same field layout as a telemetry push.
    pub async fn latest_sensor_snapshot(&self) -> Result<TelemetryFrame, FetchError> {
        self.get_json("api/sensor-data/latest").await
    }

    /// Current state of one instrument pin.
    pub async fn pin_state(&self, key: &str) -> Result<PinState, FetchError> {
        #[derive(Deserialize)]
        struct PinStateBody {
            state: PinState,
        }
        let body: PinStateBody = self.get_json(&format!("api/pin-state/{key}")).await?;
        Ok(body.state)
    }

    /// Attendance history, newest records included up to `limit`.
    pub async fn attendance(&self, limit: u32) -> Result<Vec<AttendanceFrame>, FetchError> {
        self.get_json(&format!("api/attendance?limit={limit}")).await
    }

    /// Records a pin flip server-side after the command frame went out over
    /// the socket. The response body is not interesting, only the status.
    pub async fn sync_toggle(&self, key: &str, state: PinState) -> Result<(), FetchError> {
        #[derive(Serialize)]
        struct ToggleBody<'a> {
            #[serde(rename = "pinName")]
            pin_name: &'a str,
            state: PinState,
        }
        let token = self.token()?;
        let url = self.base_url.join("api/toggle")?;
        let response = self
            .inner
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .json(&ToggleBody {
                pin_name: key,
                state,
            })
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let token = self.token()?;
        let url = self.base_url.join(path)?;
        let response = self
            .inner
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }

    fn token(&self) -> Result<&str, FetchError> {
        self.auth_token.as_deref().ok_or(FetchError::MissingToken)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
