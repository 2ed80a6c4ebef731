//! Payment processor boundary
//!
//! The engine never talks to the processor's API directly and never trusts a
//! client-supplied total. What it receives is the processor-signed
//! confirmation payload (relayed by the client or a webhook); verification is
//! an HMAC-SHA256 over the `|`-joined fields with a shared secret.

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState { Confirmed, Failed }

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

/// Signed confirmation as issued by the processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment_reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub state: PaymentState,
    pub signature: String,
}

pub trait PaymentVerifier: Send + Sync {
    /// Checks authenticity only; amount matching against the quote is the
    /// orchestrator's job.
    fn verify(&self, confirmation: &PaymentConfirmation) -> Result<()>;
}

#[derive(Clone)]
pub struct HmacVerifier {
    secret: String,
}

impl HmacVerifier {
    pub fn new(secret: impl Into<String>) -> Self { Self { secret: secret.into() } }

    fn payload(confirmation: &PaymentConfirmation) -> String {
        format!(
            "{}|{}|{}|{}",
            confirmation.payment_reference,
            confirmation.amount,
            confirmation.currency,
            confirmation.state.as_str()
        )
    }

    /// Produces the signature the processor would attach. Exists for the
    /// test and sandbox side of the boundary.
    pub fn sign(secret: &str, reference: &str, amount: Decimal, currency: &str, state: PaymentState) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(format!("{reference}|{amount}|{currency}|{}", state.as_str()).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl PaymentVerifier for HmacVerifier {
    fn verify(&self, confirmation: &PaymentConfirmation) -> Result<()> {
        let expected = hex::decode(confirmation.signature.trim())
            .map_err(|_| EngineError::PaymentUnverified)?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| EngineError::PaymentUnverified)?;
        mac.update(Self::payload(confirmation).as_bytes());
        // constant-time comparison
        mac.verify_slice(&expected).map_err(|_| EngineError::PaymentUnverified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn confirmation(secret: &str) -> PaymentConfirmation {
        let signature = HmacVerifier::sign(secret, "pay_123", dec!(95), "USD", PaymentState::Confirmed);
        PaymentConfirmation {
            payment_reference: "pay_123".into(),
            amount: dec!(95),
            currency: "USD".into(),
            state: PaymentState::Confirmed,
            signature,
        }
    }

    #[test]
    fn accepts_valid_signature() {
        let verifier = HmacVerifier::new("topsecret");
        verifier.verify(&confirmation("topsecret")).unwrap();
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = HmacVerifier::new("topsecret");
        assert!(verifier.verify(&confirmation("other")).is_err());
    }

    #[test]
    fn rejects_tampered_amount() {
        let verifier = HmacVerifier::new("topsecret");
        let mut c = confirmation("topsecret");
        c.amount = dec!(1);
        assert!(matches!(verifier.verify(&c).unwrap_err(), EngineError::PaymentUnverified));
    }

    #[test]
    fn rejects_garbage_signature() {
        let verifier = HmacVerifier::new("topsecret");
        let mut c = confirmation("topsecret");
        c.signature = "not-hex".into();
        assert!(verifier.verify(&c).is_err());
    }
}
