//! Per-client sliding-window limit on call submissions.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dialflow_core::config::RateLimitConfig;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: usize },
    Limited { retry_after: Duration },
}

/// Request times per client address, kept only while they fall inside the window.
#[derive(Debug)]
pub struct CallRateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl CallRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: usize::try_from(config.max_requests).unwrap_or(usize::MAX),
            window: config.window(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now()).await
    }

    /// Records the request unless the client already used its quota. Rejected requests
    /// are not recorded, so a blocked client regains quota as its old requests age out.
    pub(crate) async fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        let window = self.window;
        let in_window = |at: &Instant| now.saturating_duration_since(*at) < window;

        let mut clients = self.clients.lock().await;
        clients.retain(|_, requests| requests.last().is_some_and(in_window));

        let requests = clients.entry(client).or_default();
        requests.retain(in_window);

        if requests.len() >= self.max_requests {
            let retry_after = requests
                .first()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            warn!(
                event_name = "http.calls.rate_limited",
                correlation_id = %client,
                client = %client,
                limit = self.max_requests,
                retry_after_secs = retry_after.as_secs(),
                "call submission rate limit exceeded"
            );
            return RateDecision::Limited { retry_after };
        }

        requests.push(now);
        let remaining = self.max_requests - requests.len();
        debug!(
            event_name = "http.calls.rate_checked",
            correlation_id = %client,
            client = %client,
            remaining,
            "call submission allowed"
        );
        RateDecision::Allowed { remaining }
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}
