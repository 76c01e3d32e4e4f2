use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha512;

use crate::error::{AppError, AppResult};

pub mod paystack;

pub use paystack::PaystackGateway;

/// Order context forwarded to the provider when a payment session is opened.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentMetadata {
    pub order_code: String,
    pub customer_name: String,
    pub items_count: usize,
}

#[derive(Debug, Clone)]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub access_code: String,
}

/// Provider verdict for a payment reference.
///
/// `AmbiguousTimeout` means the provider could not be reached before the
/// deadline. The payment may still have settled server-side, so callers must
/// not treat it as a confirmed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success { amount_minor: i64, raw_status: String },
    Pending,
    Failed { reason: String },
    AmbiguousTimeout,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment session for `amount_minor` (minor currency units) and
    /// return the redirect the customer completes payment at.
    async fn initialize(
        &self,
        amount_minor: i64,
        email: &str,
        reference: &str,
        metadata: &PaymentMetadata,
    ) -> AppResult<InitializedPayment>;

    async fn verify(&self, reference: &str) -> AppResult<VerifyOutcome>;
}

type HmacSha512 = Hmac<Sha512>;

/// Recompute the webhook HMAC over the exact raw body bytes and compare it
/// against the signature header. An attacker who can forge this signature can
/// mark arbitrary orders paid, so a mismatch must reject the request before
/// any lookup or gateway call.
pub fn verify_webhook_signature(secret: &str, raw_body: &[u8], signature: &str) -> AppResult<()> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    let expected = hex::encode(mac.finalize().into_bytes());
    if expected != signature {
        return Err(AppError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac =
            HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"event":"charge.success","data":{"reference":"PMF-X"}}"#;
        let signature = sign("sk_test_secret", body);
        assert!(verify_webhook_signature("sk_test_secret", body, &signature).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let body = br#"{"event":"charge.success","data":{"reference":"PMF-X"}}"#;
        let tampered = br#"{"event":"charge.success","data":{"reference":"PMF-Y"}}"#;
        let signature = sign("sk_test_secret", body);
        assert!(matches!(
            verify_webhook_signature("sk_test_secret", tampered, &signature),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_signature_from_wrong_secret() {
        let body = br#"{"event":"charge.success"}"#;
        let signature = sign("some_other_secret", body);
        assert!(matches!(
            verify_webhook_signature("sk_test_secret", body, &signature),
            Err(AppError::InvalidSignature)
        ));
    }
}
