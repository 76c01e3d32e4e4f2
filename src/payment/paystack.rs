use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{InitializedPayment, PaymentGateway, PaymentMetadata, VerifyOutcome};
use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
};

#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
    callback_url: String,
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
}

impl PaystackGateway {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build http client");
        Self {
            client,
            secret_key: config.payment_secret_key.clone(),
            base_url: config.payment_base_url.clone(),
            callback_url: format!("{}/payment/callback", config.app_url),
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize(
        &self,
        amount_minor: i64,
        email: &str,
        reference: &str,
        metadata: &PaymentMetadata,
    ) -> AppResult<InitializedPayment> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let body = json!({
            "email": email,
            "amount": amount_minor,
            "reference": reference,
            "metadata": metadata,
            "callback_url": self.callback_url,
            "channels": ["card", "bank", "ussd", "qr", "mobile_money"],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        let envelope: ProviderEnvelope<InitializeData> = response
            .json()
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        if !envelope.status {
            return Err(AppError::Gateway(
                envelope
                    .message
                    .unwrap_or_else(|| "Payment initialization failed".to_string()),
            ));
        }

        let data = envelope
            .data
            .ok_or_else(|| AppError::Gateway("Provider returned no session data".to_string()))?;

        Ok(InitializedPayment {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
        })
    }

    async fn verify(&self, reference: &str) -> AppResult<VerifyOutcome> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        let response = match self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
        {
            Ok(response) => response,
            // A transport failure may hide a charge that settled server-side.
            // Report it as inconclusive; the order must stay pending.
            Err(err) if err.is_timeout() || err.is_connect() => {
                tracing::warn!(reference, error = %err, "payment verification unreachable");
                return Ok(VerifyOutcome::AmbiguousTimeout);
            }
            Err(err) => return Err(AppError::Gateway(err.to_string())),
        };

        let envelope: ProviderEnvelope<VerifyData> = response
            .json()
            .await
            .map_err(|err| AppError::Gateway(err.to_string()))?;

        let Some(data) = envelope.data else {
            return Ok(VerifyOutcome::Failed {
                reason: envelope
                    .message
                    .unwrap_or_else(|| "Transaction not found".to_string()),
            });
        };

        Ok(outcome_from_transaction(&data.status, data.amount))
    }
}

fn outcome_from_transaction(status: &str, amount_minor: i64) -> VerifyOutcome {
    match status {
        "success" => VerifyOutcome::Success {
            amount_minor,
            raw_status: status.to_string(),
        },
        "pending" | "ongoing" | "processing" | "queued" => VerifyOutcome::Pending,
        other => VerifyOutcome::Failed {
            reason: format!("Transaction status: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_carries_amount() {
        assert_eq!(
            outcome_from_transaction("success", 6_175_000),
            VerifyOutcome::Success {
                amount_minor: 6_175_000,
                raw_status: "success".to_string(),
            }
        );
    }

    #[test]
    fn in_flight_statuses_map_to_pending() {
        for status in ["pending", "ongoing", "processing", "queued"] {
            assert_eq!(outcome_from_transaction(status, 100), VerifyOutcome::Pending);
        }
    }

    #[test]
    fn terminal_non_success_maps_to_failed() {
        assert!(matches!(
            outcome_from_transaction("abandoned", 100),
            VerifyOutcome::Failed { .. }
        ));
        assert!(matches!(
            outcome_from_transaction("reversed", 100),
            VerifyOutcome::Failed { .. }
        ));
    }
}
