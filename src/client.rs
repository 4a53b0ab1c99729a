//! Mock-or-forward HTTP client wrapper.
//!
//! [`MockClient`] consults a loaded [`Resolver`] for every outbound request
//! and either returns the synthesized mock (after its delay) or forwards
//! the request to the real [`Upstream`].

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::body::ReplayReader;
use crate::error::{MockError, Result};
use crate::resolver::Resolver;

/// The real transport behind the client.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: Request<ReplayReader>) -> Result<Response<Bytes>>;
}

/// Decides whether a request is offered to the resolver at all.
pub trait MockPolicy: Send + Sync {
    fn should_mock(&self, request: &Request<ReplayReader>) -> bool;
}

/// Offer every request to the resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysMock;

impl MockPolicy for AlwaysMock {
    fn should_mock(&self, _request: &Request<ReplayReader>) -> bool {
        true
    }
}

impl<F> MockPolicy for F
where
    F: Fn(&Request<ReplayReader>) -> bool + Send + Sync,
{
    fn should_mock(&self, request: &Request<ReplayReader>) -> bool {
        self(request)
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Mocked,
    PassedThrough,
}

#[derive(Debug)]
pub struct ClientResponse {
    pub response: Response<Bytes>,
    pub outcome: Outcome,
}

impl ClientResponse {
    pub fn is_mocked(&self) -> bool {
        self.outcome == Outcome::Mocked
    }
}

/// HTTP client that returns mocks when a definition applies.
pub struct MockClient<U> {
    resolver: Arc<Resolver>,
    upstream: U,
    policy: Box<dyn MockPolicy>,
    /// Total requests sent through the client.
    requests_total: AtomicU64,
    /// Requests answered with a mock.
    requests_mocked: AtomicU64,
    /// Requests forwarded to the upstream.
    requests_passed_through: AtomicU64,
}

impl<U: Upstream> MockClient<U> {
    pub fn new(resolver: Arc<Resolver>, upstream: U) -> Self {
        Self {
            resolver,
            upstream,
            policy: Box::new(AlwaysMock),
            requests_total: AtomicU64::new(0),
            requests_mocked: AtomicU64::new(0),
            requests_passed_through: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: impl MockPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_mocked(&self) -> u64 {
        self.requests_mocked.load(Ordering::Relaxed)
    }

    pub fn total_passed_through(&self) -> u64 {
        self.requests_passed_through.load(Ordering::Relaxed)
    }

    /// Send a request, returning a mock when one applies.
    ///
    /// Mocked responses are returned after the longer of the response
    /// delay and the configured minimum latency.
    pub async fn send(&self, mut request: Request<ReplayReader>) -> Result<ClientResponse> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if !self.policy.should_mock(&request) {
            debug!(uri = %request.uri(), "Mock policy skipped request");
            return self.pass_through(request).await;
        }

        let resolved = self.resolver.resolve(&mut request).and_then(|synthesized| {
            let delay = synthesized.delay;
            synthesized.into_http().map(|response| (response, delay))
        });

        match resolved {
            Ok((response, delay)) => {
                let latency = Duration::from_millis(self.resolver.settings().latency_ms);
                let wait = delay.max(latency);
                if !wait.is_zero() {
                    debug!(delay_ms = wait.as_millis() as u64, "Applying delay");
                    tokio::time::sleep(wait).await;
                }
                self.requests_mocked.fetch_add(1, Ordering::Relaxed);
                Ok(ClientResponse {
                    response,
                    outcome: Outcome::Mocked,
                })
            }
            Err(e) if e.is_pass_through() => self.pass_through(request).await,
            Err(e) if self.resolver.settings().passthrough_on_error => {
                warn!(uri = %request.uri(), error = %e, "Mock resolution failed, forwarding");
                self.pass_through(request).await
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`send`](Self::send), failing with `Cancelled` when `deadline`
    /// elapses first, delay included.
    pub async fn send_with_deadline(
        &self,
        request: Request<ReplayReader>,
        deadline: Duration,
    ) -> Result<ClientResponse> {
        let uri = request.uri().to_string();
        tokio::time::timeout(deadline, self.send(request))
            .await
            .map_err(|_| MockError::Cancelled(format!("{} exceeded {:?}", uri, deadline)))?
    }

    async fn pass_through(&self, request: Request<ReplayReader>) -> Result<ClientResponse> {
        self.requests_passed_through.fetch_add(1, Ordering::Relaxed);
        let response = self.upstream.send(request).await?;
        Ok(ClientResponse {
            response,
            outcome: Outcome::PassedThrough,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefinitionSpec, ResponseSpec, Settings};
    use crate::source::InMemorySource;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Upstream that echoes the request body and records what it saw.
    #[derive(Default)]
    struct EchoUpstream {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Upstream for Arc<EchoUpstream> {
        async fn send(&self, mut request: Request<ReplayReader>) -> Result<Response<Bytes>> {
            let body = request.body_mut().read_all()?;
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.uri().path().to_string());
            }
            Ok(Response::new(body))
        }
    }

    fn resolver(settings: Settings, delay: u64) -> Arc<Resolver> {
        let resolver = Resolver::new(settings);
        let source = InMemorySource::new(vec![
            DefinitionSpec {
                host: "api.example.com".to_string(),
                path: "/users/:id".to_string(),
                method: "GET".to_string(),
                desc: "user".to_string(),
                responses: vec![ResponseSpec {
                    response_body: "mocked {{id}}".to_string(),
                    enable_template: true,
                    delay,
                    ..ResponseSpec::default()
                }],
            },
            DefinitionSpec {
                host: "api.example.com".to_string(),
                path: "/orders".to_string(),
                method: "POST".to_string(),
                desc: "orders".to_string(),
                responses: vec![ResponseSpec::default()],
            },
        ]);
        resolver.load(&[&source]).unwrap();
        Arc::new(resolver)
    }

    fn request(method: &str, uri: &str, body: &str) -> Request<ReplayReader> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(ReplayReader::from_bytes(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_hit() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 0), upstream.clone());

        let result = client
            .send(request("GET", "http://api.example.com/users/7", ""))
            .await
            .unwrap();
        assert!(result.is_mocked());
        assert_eq!(result.response.body(), &Bytes::from_static(b"mocked 7"));
        assert!(upstream.seen.lock().unwrap().is_empty());
        assert_eq!(client.total_requests(), 1);
        assert_eq!(client.total_mocked(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_passes_through_with_body() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 0), upstream.clone());

        let mut req = request("POST", "http://api.example.com/other", r#"{"a":1}"#);
        req.headers_mut()
            .insert("content-type", "application/json".parse().unwrap());
        let result = client.send(req).await.unwrap();

        assert_eq!(result.outcome, Outcome::PassedThrough);
        assert_eq!(result.response.body(), &Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(*upstream.seen.lock().unwrap(), vec!["/other".to_string()]);
        assert_eq!(client.total_passed_through(), 1);
    }

    #[tokio::test]
    async fn test_errors_follow_passthrough_setting() {
        // POST without Content-Type fails resolution.
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 0), upstream.clone());
        let result = client
            .send(request("POST", "http://api.example.com/orders", ""))
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::PassedThrough);

        let strict = Settings {
            passthrough_on_error: false,
            ..Settings::default()
        };
        let client = MockClient::new(resolver(strict, 0), upstream);
        let err = client
            .send(request("POST", "http://api.example.com/orders", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::ContentType(_)));
    }

    #[tokio::test]
    async fn test_policy_can_skip_resolver() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 0), upstream.clone())
            .with_policy(|req: &Request<ReplayReader>| !req.headers().contains_key("x-no-mock"));

        let mut req = request("GET", "http://api.example.com/users/7", "");
        req.headers_mut().insert("x-no-mock", "1".parse().unwrap());
        let result = client.send(req).await.unwrap();
        assert_eq!(result.outcome, Outcome::PassedThrough);
        assert_eq!(client.total_mocked(), 0);
    }

    #[tokio::test]
    async fn test_delay_and_minimum_latency() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 30), upstream.clone());
        let started = Instant::now();
        client
            .send(request("GET", "http://api.example.com/users/1", ""))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));

        let slow = Settings {
            latency_ms: 60,
            ..Settings::default()
        };
        let client = MockClient::new(resolver(slow, 30), upstream);
        let started = Instant::now();
        client
            .send(request("GET", "http://api.example.com/users/1", ""))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_deadline_cancels_delayed_mock() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 500), upstream);
        let err = client
            .send_with_deadline(
                request("GET", "http://api.example.com/users/1", ""),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::Cancelled(_)));
    }

    #[test]
    fn test_blocking_send() {
        let upstream = Arc::new(EchoUpstream::default());
        let client = MockClient::new(resolver(Settings::default(), 0), upstream);
        let result = tokio_test::block_on(
            client.send(request("GET", "http://api.example.com/users/42", "")),
        )
        .unwrap();
        assert_eq!(result.response.body(), &Bytes::from_static(b"mocked 42"));
    }
}
