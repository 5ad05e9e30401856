use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::ServerError;

/// Signature verification and settlement of gateway callbacks.
pub mod webhook;

/// Describes the payment gateway the server charges through.
///
/// Stripe is the only implementor in production, but any gateway with payment-intent semantics
/// can sit behind this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment intent for an amount in minor units.
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServerError>;

    /// Re-fetches an existing intent.
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServerError>;

    /// Cancels an intent that will never be used.
    async fn cancel_intent(&self, intent_id: &str) -> Result<(), ServerError>;
}

/// A charge to create through the gateway.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    /// Amount in the currency's minor unit, e.g. cents.
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Vec<(&'static str, String)>,
}

/// The gateway's representation of an in-progress charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub amount_received: Option<i64>,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    /// Returns a metadata value, treating empty strings as absent.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// The amount actually captured, falling back to the requested amount.
    pub fn settled_amount(&self) -> i64 {
        self.amount_received.filter(|a| *a > 0).unwrap_or(self.amount)
    }
}

/// Wrapper for the result of a gateway call.
pub enum ApiResult<M> {
    Ok(M),
    NotFound,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl<M> ApiResult<M>
where
    M: DeserializeOwned,
{
    /// Create an API result from a response.
    ///
    /// Errors if the response code is something other than a success or a missing resource,
    /// carrying the gateway's own error message when it sent one.
    pub async fn from_response(response: Response) -> Result<Self, ServerError> {
        match response.status() {
            status if status.is_success() => Ok(ApiResult::Ok(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(ApiResult::NotFound),
            status => {
                let detail = response
                    .json::<StripeErrorBody>()
                    .await
                    .map(|body| {
                        format!(
                            "{}: {}",
                            body.error.kind.unwrap_or_default(),
                            body.error.message.unwrap_or_default()
                        )
                    })
                    .unwrap_or_else(|_| "no error body".to_string());
                Err(anyhow!(
                    "Payment gateway request failed with status code: {}\n\nResponse details: {}",
                    status,
                    detail
                ))
            }
        }
    }

    fn found(self, what: &str) -> Result<M, ServerError> {
        match self {
            ApiResult::Ok(model) => Ok(model),
            ApiResult::NotFound => Err(anyhow!("{} was not found at the payment gateway", what)),
        }
    }
}

/// The API endpoint to retrieve resources from.
#[derive(Debug)]
pub struct Endpoint {
    url: String,
}

impl Endpoint {
    fn new(url: String) -> Self {
        Self { url }
    }

    /// Append a path to retrieve a specific resource from the endpoint, e.g.
    /// `format!("payment_intents/{}", id)`.
    fn append_path(&self, path: &str) -> String {
        let mut full_url = self.url.clone();

        full_url.push_str(path);

        full_url
    }
}

/// The Stripe API.
#[derive(Debug)]
pub struct StripeApi {
    /// Secret key used to authenticate with Stripe.
    token: String,
    client: Client,
    endpoint: Endpoint,
}

impl StripeApi {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            client: Client::new(),
            endpoint: Endpoint::new("https://api.stripe.com/v1/".to_string()),
        }
    }

    /// Encodes an intent request the way Stripe's form API expects it.
    fn form(request: &IntentRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        if let Some(description) = &request.description {
            form.push(("description".to_string(), description.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeApi {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServerError> {
        let response = self
            .client
            .post(self.endpoint.append_path("payment_intents"))
            .header("Authorization", format!("Bearer {}", self.token))
            .form(&Self::form(request))
            .send()
            .await?;

        let intent = ApiResult::<PaymentIntent>::from_response(response)
            .await?
            .found("Payment intent")?;
        debug!("Created payment intent {} for {} minor units", intent.id, intent.amount);

        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServerError> {
        let response = self
            .client
            .get(
                self.endpoint
                    .append_path(&format!("payment_intents/{}", intent_id)),
            )
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;

        ApiResult::<PaymentIntent>::from_response(response)
            .await?
            .found(intent_id)
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), ServerError> {
        let response = self
            .client
            .post(
                self.endpoint
                    .append_path(&format!("payment_intents/{}/cancel", intent_id)),
            )
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;

        ApiResult::<PaymentIntent>::from_response(response)
            .await?
            .found(intent_id)?;

        Ok(())
    }
}
