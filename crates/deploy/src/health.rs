//! Post-deploy reachability probe.
//!
//! Advisory only: a failed probe reports, it never rolls anything back.

use std::time::Duration;

use url::Url;

use crate::error::{DeployError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of probing a stage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHealth {
    pub url: Url,
    pub reachable: bool,
    /// HTTP status when the endpoint answered at all.
    pub status: Option<u16>,
}

impl std::fmt::Display for StageHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.reachable, self.status) {
            (true, Some(status)) => write!(f, "{} answered with {status}", self.url),
            (true, None) => write!(f, "{} answered", self.url),
            (false, _) => write!(f, "{} is unreachable", self.url),
        }
    }
}

/// Probes stage endpoints after a deploy.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| DeployError::validation(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Probe a stage URL. Any HTTP answer counts as reachable; only transport
    /// failures do not.
    pub async fn probe_stage(&self, url: &Url) -> StageHealth {
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::info!(url = %url, status, "Stage probe answered");
                StageHealth {
                    url: url.clone(),
                    reachable: true,
                    status: Some(status),
                }
            }
            Err(error) => {
                tracing::warn!(url = %url, error = %error, "Stage probe failed");
                StageHealth {
                    url: url.clone(),
                    reachable: false,
                    status: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_display() {
        let url = Url::parse("https://abc123.execute-api.us-east-1.amazonaws.com/pr-42").unwrap();
        let healthy = StageHealth {
            url: url.clone(),
            reachable: true,
            status: Some(200),
        };
        assert!(healthy.to_string().contains("answered with 200"));

        let dead = StageHealth {
            url,
            reachable: false,
            status: None,
        };
        assert!(dead.to_string().contains("unreachable"));
    }
}
