//! Client for `GET /api/v1/health`, used by `daybook health` in container
//! health checks.

use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("could not reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server answered {0}")]
    Unhealthy(StatusCode),
}

/// Health URL for a server bound to `bind:port`. A wildcard bind is reached on
/// loopback.
pub fn health_url(bind: &str, port: u16) -> String {
    let host = match bind {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" | "[::]" => "[::1]".to_string(),
        h if h.contains(':') && !h.starts_with('[') => format!("[{h}]"),
        h => h.to_string(),
    };
    format!("http://{host}:{port}/api/v1/health")
}

/// Any 2xx is healthy.
pub async fn check(url: &str, timeout: Duration) -> Result<(), HealthError> {
    let unreachable = |source| HealthError::Unreachable {
        url: url.to_string(),
        source,
    };
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(unreachable)?;
    let response = client.get(url).send().await.map_err(unreachable)?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(HealthError::Unhealthy(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_binds_use_loopback() {
        assert_eq!(health_url("0.0.0.0", 8080), "http://127.0.0.1:8080/api/v1/health");
        assert_eq!(health_url("::", 8080), "http://[::1]:8080/api/v1/health");
        assert_eq!(health_url("10.0.0.5", 81), "http://10.0.0.5:81/api/v1/health");
        assert_eq!(health_url("fe80::1", 81), "http://[fe80::1]:81/api/v1/health");
    }
}
