//! SMS channel adapter (reserved)
//!
//! The SMS channel keeps the adapter shape (`send(to, body) -> outcome`) but
//! no provider is wired in the MVP; the unconfigured adapter reports every
//! send as unavailable without a network call.

use async_trait::async_trait;
use hd_common::{DeliveryOutcome, ErrorCode};

#[async_trait]
pub trait SmsAdapter: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> DeliveryOutcome;

    fn is_configured(&self) -> bool;
}

pub struct UnconfiguredSms;

#[async_trait]
impl SmsAdapter for UnconfiguredSms {
    async fn send(&self, _to: &str, _body: &str) -> DeliveryOutcome {
        DeliveryOutcome::failed(ErrorCode::ServiceUnavailable, "no SMS provider configured")
    }

    fn is_configured(&self) -> bool {
        false
    }
}
