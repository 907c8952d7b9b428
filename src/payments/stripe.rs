//! Stripe Checkout client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{GatewayError, HostedSession, PaymentGateway, SessionRequest, METADATA_CART_ID, METADATA_USER_ID};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, api_base: api_base.into().trim_end_matches('/').to_string(), secret_key: secret_key.into() })
    }

    /// Flattens the request into Stripe's bracketed form encoding.
    fn form(request: &SessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (format!("metadata[{METADATA_USER_ID}]"), request.metadata.user_id.to_string()),
            (format!("metadata[{METADATA_CART_ID}]"), request.metadata.cart_id.to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        for (i, item) in request.line_items.iter().enumerate() {
            let key = |field: &str| format!("line_items[{i}]{field}");
            form.push((key("[price_data][currency]"), request.currency.clone()));
            form.push((key("[price_data][product_data][name]"), item.name.clone()));
            if let Some(image) = &item.image_url {
                form.push((key("[price_data][product_data][images][0]"), image.clone()));
            }
            form.push((key("[price_data][unit_amount]"), item.unit_amount.to_string()));
            form.push((key("[quantity]"), item.quantity.to_string()));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip_all, fields(lines = request.line_items.len(), amount = request.amount_total()))]
    async fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let message = body.error.and_then(|e| e.message).unwrap_or_else(|| "no error message".to_string());
            warn!(status = status.as_u16(), %message, "checkout session rejected");
            return Err(GatewayError::Rejected { status: status.as_u16(), message });
        }

        let session: CheckoutSession =
            response.json().await.map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let url = session.url.ok_or_else(|| GatewayError::MalformedResponse(format!("session {} has no url", session.id)))?;
        debug!(session_id = %session.id, "checkout session created");
        Ok(HostedSession { session_id: session.id, url })
    }
}
