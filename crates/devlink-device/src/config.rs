use std::time::Duration;

/// Default reply deadline for controller and uploader requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Settings shared by the request/response protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// How long to wait for each reply packet.
    pub request_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
