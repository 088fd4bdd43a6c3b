//! Telephony provider access: the pull API used by sync jobs and webhook
//! signature checks for the push side.

mod http;
mod signature;

use async_trait::async_trait;

use crate::error::Result;
use crate::normalizer::{AgentStatusPayload, CdrPayload};
use crate::types::{DateRange, Location};

pub use http::HttpProviderClient;
pub use signature::{sign_payload, verify_webhook_signature, SIGNATURE_HEADER};

/// One page request against the provider CDR report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdrQuery {
    pub range: DateRange,
    pub location: Option<Location>,
    pub limit: u32,
    pub offset: u64,
}

/// Read side of the telephony provider
#[async_trait]
pub trait TelephonyProvider: Send + Sync + 'static {
    /// One page of call detail records; a page shorter than `limit` is the last
    async fn fetch_cdr_page(&self, query: &CdrQuery) -> Result<Vec<CdrPayload>>;

    /// Current status of every agent, optionally for one location
    async fn fetch_agent_statuses(&self, location: Option<Location>) -> Result<Vec<AgentStatusPayload>>;
}
