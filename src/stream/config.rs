//! Session configuration.
//!
//! [`StreamSessionParameters`] is what a settings form produces: the port is
//! still text. [`StreamSessionConfig`] is the validated form a session is
//! built from.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::stream::session::SessionError;
use crate::stream::transport::Endpoint;

/// Default bounded wait for one transport receive.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Unvalidated connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSessionParameters {
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub close_after_completed: bool,
}

impl StreamSessionParameters {
    pub fn new(host: impl Into<String>, port: impl ToString) -> Self {
        Self {
            host: host.into(),
            port: port.to_string(),
            close_after_completed: false,
        }
    }

    /// Unsubscribe automatically once a backtest reports completion.
    pub fn with_close_after_completed(mut self, close_after_completed: bool) -> Self {
        self.close_after_completed = close_after_completed;
        self
    }
}

/// Validated connection settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSessionConfig {
    pub endpoint: Endpoint,
    pub close_after_completed: bool,
}

impl TryFrom<StreamSessionParameters> for StreamSessionConfig {
    type Error = SessionError;

    fn try_from(parameters: StreamSessionParameters) -> Result<Self, SessionError> {
        let port = parse_port(&parameters.port)?;
        let host = parameters.host.trim();
        if host.is_empty() {
            return Err(SessionError::InvalidHost);
        }

        Ok(Self {
            endpoint: Endpoint::new(host, port),
            close_after_completed: parameters.close_after_completed,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, SessionError> {
    let invalid = || SessionError::InvalidPort(raw.to_string());
    let port: i64 = raw.trim().parse().map_err(|_| invalid())?;
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid()),
    }
}

/// Tuning knobs for the background loops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSessionOptions {
    /// Bounded wait for one transport receive; also bounds how long the
    /// listener takes to notice cancellation.
    pub receive_timeout: Duration,
    /// Retry policy for the initial connect of each subscription.
    pub connect_retry: RetryPolicy,
}

impl Default for StreamSessionOptions {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            connect_retry: RetryPolicy::connect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StreamSessionConfig, StreamSessionParameters};
    use crate::stream::session::SessionError;

    #[test]
    fn valid_parameters_produce_an_endpoint() {
        let config = StreamSessionConfig::try_from(
            StreamSessionParameters::new(" localhost ", " 5555").with_close_after_completed(true),
        )
        .expect("valid");
        assert_eq!(config.endpoint.to_string(), "localhost:5555");
        assert!(config.close_after_completed);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let err = StreamSessionConfig::try_from(StreamSessionParameters::new("localhost", "http"))
            .expect_err("invalid port");
        assert!(matches!(err, SessionError::InvalidPort(port) if port == "http"));
    }

    #[test]
    fn out_of_range_ports_are_rejected() {
        for port in ["0", "65536", "-1"] {
            let err = StreamSessionConfig::try_from(StreamSessionParameters::new("localhost", port))
                .expect_err("out of range");
            assert!(matches!(err, SessionError::InvalidPort(_)));
        }
    }

    #[test]
    fn blank_host_is_rejected() {
        let err = StreamSessionConfig::try_from(StreamSessionParameters::new("  ", "5555"))
            .expect_err("blank host");
        assert!(matches!(err, SessionError::InvalidHost));
    }

    #[test]
    fn parameters_deserialize_from_settings_json() {
        let parameters: StreamSessionParameters =
            serde_json::from_str(r#"{"host":"127.0.0.1","port":"33333"}"#).expect("json");
        assert_eq!(parameters.port, "33333");
        assert!(!parameters.close_after_completed);
    }
}
