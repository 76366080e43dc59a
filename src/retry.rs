//! Bounded retry with exponential backoff for remote calls.
//!
//! Every request to AppEEARS or CDS goes through [`send`], [`send_json`] or
//! [`create_json`]. Connection failures, timeouts, HTTP 429 and HTTP 5xx are
//! retried; any other 4xx is terminal and returned as [`DownloadError::Api`].
//! Requests that create a remote job are only resent when the server cannot
//! have acted on them, or once a lookup has shown the job does not exist.

use std::{future::Future, time::Duration};

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{DownloadError, Result};

/// Retries after the first attempt. Backoff is 2s, 4s, 8s, 16s, 32s.
pub const MAX_RETRIES: u32 = 5;

/// Longest a JSON call may take, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest a file stream may go without receiving a byte.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// How many times and how fast to retry, and how long one attempt may last.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub request_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            request_timeout: REQUEST_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }

    fn single_attempt(self) -> Self {
        RetryPolicy {
            max_retries: 0,
            ..self
        }
    }
}

/// HTTP client shared by both portals.
///
/// Streams fail once no byte has arrived for `policy.read_timeout`; JSON
/// calls are further bounded per request by [`send_json`].
pub fn http_client(policy: &RetryPolicy) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(policy.read_timeout)
        .build()?;

    Ok(client)
}

/// Ensures the base URL ends with a slash so paths can be appended.
pub fn normalise_base_url(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    }
}

/// Sends the request built by `build_request`, retrying transient failures.
///
/// The closure is called once per attempt since a `RequestBuilder` is
/// consumed by `send()`. Returns the first 2xx/3xx response.
pub async fn send<F>(policy: RetryPolicy, build_request: F) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        let result = match build_request().send().await {
            Err(e) => Err(DownloadError::Http(e)),
            Ok(response) => check_status(response),
        };

        match result {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    error = %e,
                    "transient failure, retry {}/{} in {:?}",
                    attempt,
                    policy.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Like [`send`], then decodes the body as JSON.
///
/// Each attempt is bounded by `policy.request_timeout`.
pub async fn send_json<T, F>(policy: RetryPolicy, build_request: F) -> Result<T>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send(policy, || build_request().timeout(policy.request_timeout)).await?;
    let url = response.url().to_string();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| {
        DownloadError::InvalidResponse(format!("{} from {}: {}", e, url, preview(&text)))
    })
}

/// Sends a request that creates a remote job and decodes the JSON answer.
///
/// A failure that may have reached the server (the connection dropped after
/// the request was written, a timeout, most 5xx) is not replayed blindly:
/// `lookup` is asked first. `Ok(Some(_))` is taken as the job created by the
/// lost attempt, `Ok(None)` resends, an error stops.
pub async fn create_json<T, F, L, Fut>(
    policy: RetryPolicy,
    build_request: F,
    mut lookup: L,
) -> Result<T>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
    L: FnMut(&DownloadError) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempt = 0;

    loop {
        let err = match send_json(policy.single_attempt(), &build_request).await {
            Ok(created) => return Ok(created),
            Err(e) => e,
        };
        if !err.is_transient() || attempt >= policy.max_retries {
            return Err(err);
        }

        attempt += 1;
        let delay = policy.delay(attempt);
        warn!(
            error = %err,
            "creation failed, retry {}/{} in {:?}",
            attempt,
            policy.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;

        if !err.is_replay_safe() {
            if let Some(created) = lookup(&err).await? {
                warn!("found the job created by the failed attempt");
                return Ok(created);
            }
        }
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(DownloadError::Api {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }

    Ok(response)
}

fn preview(text: &str) -> &str {
    const PREVIEW_LEN: usize = 200;

    match text.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use std::{
        collections::VecDeque,
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use serde::Deserialize;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    /// What the stub does with the next request.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Json(u16, String),
        Bytes(Vec<u8>),
        /// Reads the request, then closes the connection without answering.
        Drop,
        /// Reads the request and never answers.
        Hang,
        /// Announces `len` bytes, sends the given ones, then goes silent.
        Truncated(Vec<u8>, usize),
    }

    type Shared<T> = Arc<Mutex<T>>;

    /// Scripted HTTP/1.1 server on a local port, one request per connection.
    pub struct StubServer {
        addr: SocketAddr,
        replies: Shared<VecDeque<Reply>>,
        requests: Shared<Vec<String>>,
    }

    impl StubServer {
        pub async fn start() -> StubServer {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let replies: Shared<VecDeque<Reply>> = Arc::default();
            let requests: Shared<Vec<String>> = Arc::default();

            let (queue, seen) = (replies.clone(), requests.clone());
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, queue.clone(), seen.clone()));
                }
            });

            StubServer {
                addr,
                replies,
                requests,
            }
        }

        pub fn url(&self) -> String {
            format!("http://{}/", self.addr)
        }

        pub fn reply(&self, reply: Reply) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn json(&self, status: u16, body: &str) {
            self.reply(Reply::Json(status, body.to_string()));
        }

        /// Request heads received so far, request line first.
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        /// Number of requests whose request line starts with `prefix`.
        pub fn count(&self, prefix: &str) -> usize {
            self.requests()
                .iter()
                .filter(|head| head.starts_with(prefix))
                .count()
        }
    }

    async fn serve(mut socket: TcpStream, replies: Shared<VecDeque<Reply>>, seen: Shared<Vec<String>>) {
        let Some(head) = read_request(&mut socket).await else {
            return;
        };
        seen.lock().unwrap().push(head);
        let reply = replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Json(500, "{}".to_string()));

        match reply {
            Reply::Json(status, body) => {
                let _ = socket
                    .write_all(&response(status, "application/json", body.as_bytes(), body.len()))
                    .await;
                let _ = socket.shutdown().await;
            }
            Reply::Bytes(body) => {
                let _ = socket
                    .write_all(&response(200, "application/octet-stream", &body, body.len()))
                    .await;
                let _ = socket.shutdown().await;
            }
            Reply::Drop => drop(socket),
            Reply::Hang => {
                std::future::pending::<()>().await;
            }
            Reply::Truncated(body, len) => {
                let _ = socket
                    .write_all(&response(200, "application/octet-stream", &body, len))
                    .await;
                std::future::pending::<()>().await;
            }
        }
    }

    async fn read_request(socket: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let end = loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break end;
            }
        };

        let head = String::from_utf8_lossy(&buf[..end]).to_string();
        let body_len = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < end + 4 + body_len {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        Some(head)
    }

    fn response(status: u16, content_type: &str, body: &[u8], len: usize) -> Vec<u8> {
        let mut bytes = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status, content_type, len
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    /// Retries fast and gives up on a silent server quickly.
    pub fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            request_timeout: Duration::from_millis(300),
            read_timeout: Duration::from_millis(300),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Job {
        id: String,
    }

    #[test]
    fn should_back_off_exponentially() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
    }

    #[test]
    fn should_truncate_preview_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn should_normalise_base_url() {
        assert_eq!(
            normalise_base_url("https://example.org/api"),
            "https://example.org/api/"
        );
        assert_eq!(
            normalise_base_url("https://example.org/api/"),
            "https://example.org/api/"
        );
    }

    #[tokio::test]
    async fn should_retry_server_error() {
        let server = StubServer::start().await;
        server.json(503, "{}");
        server.json(200, r#"{"id": "a"}"#);
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());

        let job: Job = send_json(policy, || client.get(&url)).await.unwrap();

        assert_eq!(job.id, "a");
        assert_eq!(server.count("GET /job"), 2);
    }

    #[tokio::test]
    async fn should_not_retry_client_error() {
        let server = StubServer::start().await;
        server.json(404, "{}");
        server.json(200, r#"{"id": "a"}"#);
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());

        let result: Result<Job> = send_json(policy, || client.get(&url)).await;

        assert!(matches!(result, Err(DownloadError::Api { status: 404, .. })));
        assert_eq!(server.count("GET /job"), 1);
    }

    #[tokio::test]
    async fn should_time_out_silent_server() {
        let server = StubServer::start().await;
        for _ in 0..3 {
            server.reply(Reply::Hang);
        }
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());

        let result: Result<Job> = tokio::time::timeout(
            Duration::from_secs(5),
            send_json(policy, || client.get(&url)),
        )
        .await
        .expect("request was not bounded");

        assert!(matches!(&result, Err(e) if e.is_transient()));
        assert_eq!(server.count("GET /job"), 3);
    }

    #[tokio::test]
    async fn should_look_up_job_before_resending() {
        let server = StubServer::start().await;
        server.reply(Reply::Drop);
        server.json(200, r#"{"id": "second"}"#);
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());
        let lookups = Mutex::new(0);

        let job: Job = create_json(
            policy,
            || client.post(&url).json(&serde_json::json!({"name": "a"})),
            |_| {
                *lookups.lock().unwrap() += 1;
                async {
                    Ok(Some(Job {
                        id: "first".to_string(),
                    }))
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(job.id, "first");
        assert_eq!(*lookups.lock().unwrap(), 1);
        assert_eq!(server.count("POST /job"), 1);
    }

    #[tokio::test]
    async fn should_resend_when_lookup_finds_nothing() {
        let server = StubServer::start().await;
        server.reply(Reply::Drop);
        server.json(200, r#"{"id": "second"}"#);
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());

        let job: Job = create_json(policy, || client.post(&url), |_| async { Ok(None) })
            .await
            .unwrap();

        assert_eq!(job.id, "second");
        assert_eq!(server.count("POST /job"), 2);
    }

    #[tokio::test]
    async fn should_resend_rate_limited_creation_without_lookup() {
        let server = StubServer::start().await;
        server.json(429, "{}");
        server.json(200, r#"{"id": "a"}"#);
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}job", server.url());

        let job: Job = create_json(policy, || client.post(&url), |e: &DownloadError| {
            let reason = e.to_string();
            async move { Err(DownloadError::InvalidResponse(reason)) }
        })
        .await
        .unwrap();

        assert_eq!(job.id, "a");
        assert_eq!(server.count("POST /job"), 2);
    }
}
