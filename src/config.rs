//! Query configuration
//!
//! Built with [`QueryConfig::builder`]; `build()` validates every field.

use crate::error::{UfsError, UfsResult};
use crate::transport::MAX_IOCTL_BUF_SIZE;
use crate::upiu::UPIU_SIZE;

/// Default ioctl timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 30_000;

/// How reserved/obsolete idns and RFU descriptor kinds are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservedPolicy {
    /// Encode and forward to the device, logging an informational note.
    /// RFU descriptors additionally need an explicit size override.
    #[default]
    PassThrough,
    /// Reject locally before anything is submitted
    Reject,
}

/// Settings shared by the codec and the transport
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub reserved_policy: ReservedPolicy,
    /// Upper bound for request plus response bytes of one exchange
    pub max_transfer: usize,
    /// ioctl timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            reserved_policy: ReservedPolicy::default(),
            max_transfer: MAX_IOCTL_BUF_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl QueryConfig {
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::new()
    }
}

/// Builder for [`QueryConfig`]
#[derive(Debug, Default)]
pub struct QueryConfigBuilder {
    reserved_policy: Option<ReservedPolicy>,
    max_transfer: Option<usize>,
    timeout_ms: Option<u32>,
}

impl QueryConfigBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Set the reserved idn policy (default: PassThrough)
    pub fn reserved_policy(mut self, policy: ReservedPolicy) -> Self {
        self.reserved_policy = Some(policy);
        self
    }

    /// Set the per-exchange transfer limit in bytes (default: 256 KiB)
    pub fn max_transfer(mut self, bytes: usize) -> Self {
        self.max_transfer = Some(bytes);
        self
    }

    /// Set the ioctl timeout (default: 30 s)
    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn build(self) -> UfsResult<QueryConfig> {
        let max_transfer = self.max_transfer.unwrap_or(MAX_IOCTL_BUF_SIZE);
        if max_transfer > MAX_IOCTL_BUF_SIZE {
            return Err(UfsError::Config(format!(
                "max_transfer {} exceeds the {} byte ioctl limit",
                max_transfer, MAX_IOCTL_BUF_SIZE
            )));
        }
        // A request and its response header must both fit
        if max_transfer < 2 * UPIU_SIZE {
            return Err(UfsError::Config(format!(
                "max_transfer {} cannot hold a query request and response",
                max_transfer
            )));
        }

        let timeout_ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(UfsError::Config("timeout_ms must be non-zero".to_string()));
        }

        Ok(QueryConfig {
            reserved_policy: self.reserved_policy.unwrap_or_default(),
            max_transfer,
            timeout_ms,
        })
    }
}
