//! Meter HTTP client implementation.

use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use meter_core::{ApplyOutcome, BillingEvent, IdentityConflict, UserId};

use crate::error::ClientError;
use crate::types::{ApiErrorResponse, ConsumeRequest, ConsumeResponse, QuotaUsage, SubscriptionStatus};

/// Meter API client.
///
/// Provides quota decisions, billing event intake and subscription lookups.
#[derive(Debug, Clone)]
pub struct MeterClient {
    client: Client,
    base_url: Url,
    api_key: String,
    admin_key: Option<String>,
    service_name: String,
}

impl MeterClient {
    /// Create a new meter client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the meter service (e.g., `"http://meter:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new meter client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn with_options(
        base_url: &str,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ClientError::Configuration(format!("invalid base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Configuration(format!(
                "base url cannot have paths: {base_url}"
            )));
        }

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            admin_key: options.admin_key,
            service_name: options.service_name,
        })
    }

    /// Admit and record one call for `user_id`.
    ///
    /// `limit = None` uses the service's free-tier limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    /// Callers must deny the action on any error.
    pub async fn try_consume(
        &self,
        user_id: &UserId,
        limit: Option<u64>,
    ) -> Result<ConsumeResponse, ClientError> {
        let url = self.endpoint(&["v1", "quota", "consume"]);
        let request = ConsumeRequest {
            user_id: user_id.clone(),
            limit,
        };

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Whether `user_id` may make one more call, recording it if so.
    ///
    /// Fails closed: any transport or server error is a denial.
    pub async fn is_allowed(&self, user_id: &UserId, limit: Option<u64>) -> bool {
        match self.try_consume(user_id, limit).await {
            Ok(decision) => decision.allowed,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Quota check failed, denying");
                false
            }
        }
    }

    /// Current counter for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn quota(&self, user_id: &UserId) -> Result<QuotaUsage, ClientError> {
        let url = self.endpoint(&["v1", "quota", user_id.as_str()]);

        let response = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Zero the counter for `user_id`. Requires an admin key in the options.
    ///
    /// # Errors
    ///
    /// Returns an error if no admin key is configured, the request fails, or
    /// the server returns an error.
    pub async fn reset_quota(&self, user_id: &UserId) -> Result<QuotaUsage, ClientError> {
        let admin_key = self
            .admin_key
            .as_deref()
            .ok_or_else(|| ClientError::Configuration("admin key not configured".into()))?;
        let url = self.endpoint(&["v1", "quota", user_id.as_str(), "reset"]);

        let response = self
            .client
            .post(url)
            .header("x-admin-key", admin_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Forward a normalized billing event.
    ///
    /// A stale event is `Ok` with `applied = false`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::IdentityConflict`] when the event was rejected for
    /// manual review, [`ClientError::StoreUnavailable`] when it should be
    /// redelivered, or another error if the request fails.
    pub async fn apply_event(&self, event: &BillingEvent) -> Result<ApplyOutcome, ClientError> {
        let url = self.endpoint(&["v1", "billing", "events"]);

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(event)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// The user's subscription and derived state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn subscription(&self, user_id: &UserId) -> Result<SubscriptionStatus, ClientError> {
        let url = self.endpoint(&["v1", "subscriptions", user_id.as_str()]);

        let response = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Build an endpoint URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let body = api_error.error;

                match body.code.as_str() {
                    "store_unavailable" => Err(ClientError::StoreUnavailable {
                        message: body.message,
                    }),
                    "identity_conflict" => {
                        let conflict = body
                            .details
                            .map(serde_json::from_value::<IdentityConflict>)
                            .transpose()?;
                        match conflict {
                            Some(conflict) => Err(ClientError::IdentityConflict(conflict)),
                            None => Err(ClientError::Api {
                                code: body.code,
                                message: body.message,
                                status: status.as_u16(),
                            }),
                        }
                    }
                    _ => Err(ClientError::Api {
                        code: body.code,
                        message: body.message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => {
                Err(ClientError::StoreUnavailable {
                    message: format!("HTTP {status}"),
                })
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 5).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
    /// Admin key for quota resets.
    pub admin_key: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            service_name: "unknown".to_string(),
            admin_key: None,
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the admin key used for quota resets.
    #[must_use]
    pub fn admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }
}
