//! Payment provider integration.
//!
//! Providers (eSewa, Khalti, NPX) are opaque gateways: we open a session to
//! get a redirect/form handoff, and later re-verify settlement before
//! fulfilling. Cash-on-delivery skips the session entirely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::payment_intent;
use crate::errors::ServiceError;

/// Supported payment methods at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Esewa,
    Khalti,
    Npx,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Esewa => "esewa",
            PaymentMethod::Khalti => "khalti",
            PaymentMethod::Npx => "npx",
            PaymentMethod::Cod => "cod",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "esewa" => Some(PaymentMethod::Esewa),
            "khalti" => Some(PaymentMethod::Khalti),
            "npx" => Some(PaymentMethod::Npx),
            "cod" => Some(PaymentMethod::Cod),
            _ => None,
        }
    }

    /// Whether checkout hands the customer off to the provider.
    pub fn requires_redirect(&self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

/// Handoff returned when a provider session is opened. eSewa expects a form
/// POST, Khalti/NPX a redirect URL; both shapes are carried here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSession {
    pub provider_ref: String,
    pub payment_url: Option<String>,
    pub form_fields: Option<serde_json::Value>,
}

/// Result of re-verifying settlement with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub settled: bool,
    pub amount_minor: i64,
    pub currency: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment session for a redirect-based provider.
    async fn open_session(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<ProviderSession, ServiceError>;

    /// Asks the provider whether the intent's payment actually settled.
    async fn verify_payment(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<PaymentVerification, ServiceError>;
}

/// Gateway that talks to provider HTTP APIs configured per provider.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: AppConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn base_url(&self, provider: &str) -> Result<&str, ServiceError> {
        self.config.provider_base_url(provider).ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "no API endpoint configured for provider {}",
                provider
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_ref: String,
    #[serde(default)]
    payment_url: Option<String>,
    #[serde(default)]
    form_fields: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
    amount: i64,
    currency: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, intent), fields(intent_id = %intent.id, provider = %intent.provider))]
    async fn open_session(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<ProviderSession, ServiceError> {
        let base = self.base_url(&intent.provider)?;
        let body = json!({
            "reference": intent.id,
            "amount": intent.amount_minor,
            "currency": intent.currency,
        });

        let resp = self
            .client
            .post(format!("{}/checkout/sessions", base))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("open session: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("open session: {}", e)))?;

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("session decode: {}", e)))?;

        info!(session_ref = %session.session_ref, "opened provider session");

        Ok(ProviderSession {
            provider_ref: session.session_ref,
            payment_url: session.payment_url,
            form_fields: session.form_fields,
        })
    }

    #[instrument(skip(self, intent), fields(intent_id = %intent.id, provider = %intent.provider))]
    async fn verify_payment(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<PaymentVerification, ServiceError> {
        let base = self.base_url(&intent.provider)?;
        let provider_ref = intent.provider_ref.as_deref().ok_or_else(|| {
            ServiceError::PaymentVerificationFailed("intent has no provider session".to_string())
        })?;

        let resp = self
            .client
            .get(format!("{}/checkout/sessions/{}", base, provider_ref))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("verify: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("verify: {}", e)))?;

        let verification: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("verify decode: {}", e)))?;

        Ok(PaymentVerification {
            settled: verification.status == "settled" || verification.status == "completed",
            amount_minor: verification.amount,
            currency: verification.currency,
        })
    }
}

/// In-process gateway used by tests and local development. Settles every
/// intent at its own amount unless an override is installed.
#[derive(Default)]
pub struct MockPaymentGateway {
    overrides: Mutex<HashMap<Uuid, PaymentVerification>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a canned verification result for one intent.
    pub fn set_verification(&self, intent_id: Uuid, verification: PaymentVerification) {
        self.overrides
            .lock()
            .expect("mock gateway lock poisoned")
            .insert(intent_id, verification);
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn open_session(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<ProviderSession, ServiceError> {
        Ok(ProviderSession {
            provider_ref: format!("mock-{}", intent.id.simple()),
            payment_url: Some(format!(
                "https://pay.example.test/{}/{}",
                intent.provider, intent.id
            )),
            form_fields: None,
        })
    }

    async fn verify_payment(
        &self,
        intent: &payment_intent::Model,
    ) -> Result<PaymentVerification, ServiceError> {
        let overrides = self.overrides.lock().expect("mock gateway lock poisoned");
        Ok(overrides.get(&intent.id).cloned().unwrap_or_else(|| {
            PaymentVerification {
                settled: true,
                amount_minor: intent.amount_minor,
                currency: intent.currency.clone(),
            }
        }))
    }
}

/// Picks the gateway implementation for this deployment: HTTP when any
/// provider endpoint is configured, otherwise the mock (dev/test).
pub fn gateway_from_config(
    config: &AppConfig,
) -> Result<std::sync::Arc<dyn PaymentGateway>, ServiceError> {
    let any_configured = config.esewa_base_url.is_some()
        || config.khalti_base_url.is_some()
        || config.npx_base_url.is_some();

    if any_configured {
        Ok(std::sync::Arc::new(HttpPaymentGateway::new(config.clone())?))
    } else {
        info!("no provider endpoints configured; using mock payment gateway");
        Ok(std::sync::Arc::new(MockPaymentGateway::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn intent(amount: i64) -> payment_intent::Model {
        payment_intent::Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            provider: "khalti".to_string(),
            amount_minor: amount,
            currency: "NPR".to_string(),
            status: "pending_webhook".to_string(),
            provider_ref: Some("ref-1".to_string()),
            shipping_address: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn payment_method_round_trips() {
        for method in [
            PaymentMethod::Esewa,
            PaymentMethod::Khalti,
            PaymentMethod::Npx,
            PaymentMethod::Cod,
        ] {
            assert_eq!(PaymentMethod::from_str(method.as_str()), Some(method));
        }
        assert!(PaymentMethod::Cod.requires_redirect() == false);
        assert!(PaymentMethod::Esewa.requires_redirect());
    }

    #[tokio::test]
    async fn mock_gateway_settles_at_intent_amount() {
        let gateway = MockPaymentGateway::new();
        let intent = intent(2_500_00);
        let verification = gateway.verify_payment(&intent).await.unwrap();
        assert!(verification.settled);
        assert_eq!(verification.amount_minor, 2_500_00);
    }

    #[tokio::test]
    async fn mock_gateway_override_wins() {
        let gateway = MockPaymentGateway::new();
        let intent = intent(1000);
        gateway.set_verification(
            intent.id,
            PaymentVerification {
                settled: false,
                amount_minor: 999,
                currency: "NPR".to_string(),
            },
        );
        let verification = gateway.verify_payment(&intent).await.unwrap();
        assert!(!verification.settled);
        assert_eq!(verification.amount_minor, 999);
    }
}
