//! HTTP client for the remote collector.
//!
//! The collector answers every request with a short plaintext body. This
//! module turns those bodies (and transport failures) into tri-state results
//! and writes the matching lines to the durable log.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, Credential};
use crate::dedup_log::{DedupLogger, LogLevel};
use crate::sensor::ReadingSnapshot;

/// Body returned after a reading was stored.
pub const SUBMIT_ACCEPTED_BODY: &str = "POST data written to database after Auth";

/// Body returned after old records were discarded.
pub const TRIM_ACCEPTED_BODY: &str = "Database cleaned after Auth";

/// Body returned by either endpoint when the key is not accepted.
pub const AUTH_REJECTED_BODY: &str = "POST Authentication failed";

/// Logged once per onset of a transport failure.
pub const POST_FAILED_MARKER: &str = "POST request failed";

const RECONNECT_NOTICE: &str = "Will reconnect...";
const SUBMIT_NOTICE: &str = "Posting sensor readings to live database";
const TRIM_NOTICE: &str = "Cleanup";

/// Outcome of submitting one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted,
    AuthRejected,
    TransportFailed,
}

/// Outcome of a retention trim request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimResult {
    Trimmed,
    AuthRejected,
    TransportFailed,
}

/// Errors that can occur while talking to the collector.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code with an unrecognised body
    Status { code: StatusCode, message: String },

    /// Server returned a success status but a body we do not recognise
    UnexpectedResponse(String),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::UnexpectedResponse(body) => {
                write!(f, "Unexpected response: {:?}", body)
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Classified collector reply, shared by both endpoints.
#[derive(Debug)]
enum Reply {
    Success,
    AuthRejected(String),
    Failed(ClientError),
}

fn classify(status: StatusCode, body: String, success_body: &str) -> Reply {
    if body == success_body {
        Reply::Success
    } else if body == AUTH_REJECTED_BODY {
        Reply::AuthRejected(body)
    } else if !status.is_success() {
        Reply::Failed(ClientError::Status {
            code: status,
            message: body,
        })
    } else {
        Reply::Failed(ClientError::UnexpectedResponse(body))
    }
}

#[derive(Serialize)]
struct SubmitForm<'a> {
    temp: f64,
    pres: f64,
    humi: f64,
    key: &'a str,
}

#[derive(Serialize)]
struct TrimForm<'a> {
    key: &'a str,
}

/// Anything readings can be reported to.
///
/// Implementations absorb every recoverable error and write their own log
/// lines; callers only see the tri-state result.
pub trait Collector {
    fn submit(
        &self,
        reading: &ReadingSnapshot,
        log: &mut DedupLogger,
    ) -> impl Future<Output = SubmitResult>;

    fn trim(&self, log: &mut DedupLogger) -> impl Future<Output = TrimResult>;
}

/// HTTP client for the collector's submit and trim endpoints.
///
/// # Example
///
/// ```no_run
/// use sensor_reporter::client::{Collector, CollectorClient, SubmitResult};
/// use sensor_reporter::config::Config;
/// use sensor_reporter::dedup_log::DedupLogger;
/// use sensor_reporter::sensor::ReadingSnapshot;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::load().expect("Failed to load config");
///     let client = CollectorClient::new(&config).expect("Failed to create client");
///     let mut log = DedupLogger::open(&config.log_path).expect("Failed to open log");
///
///     let reading = ReadingSnapshot { temperature: 21.5, pressure: 1013.25, humidity: 45.0 };
///     if client.submit(&reading, &mut log).await == SubmitResult::Accepted {
///         println!("stored");
///     }
/// }
/// ```
pub struct CollectorClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// URL for reading submissions
    submit_url: String,

    /// URL for retention trims
    trim_url: String,

    /// Key sent with every request
    credential: Credential,

    /// Request timeout duration
    timeout: Duration,
}

impl CollectorClient {
    /// Create a new collector client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(1)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            submit_url: config.submit_url.clone(),
            trim_url: config.trim_url.clone(),
            credential: config.credential.clone(),
            timeout: config.request_timeout,
        })
    }

    /// POST a form and return the status plus the full body text.
    async fn post_form<T: Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<(StatusCode, String), ClientError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn exchange<T: Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
        success_body: &str,
    ) -> Reply {
        match self.post_form(url, form).await {
            Ok((status, body)) => {
                debug!(url = %url, status = %status, body = %body, "Collector replied");
                classify(status, body, success_body)
            }
            Err(e) => Reply::Failed(e),
        }
    }

    /// Get the submit endpoint URL.
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    /// Get the trim endpoint URL.
    pub fn trim_url(&self) -> &str {
        &self.trim_url
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Collector for CollectorClient {
    /// Submit one reading.
    ///
    /// An `AuthRejected` result means the credential is wrong; the caller is
    /// expected to stop the process. Nothing here exits.
    async fn submit(&self, reading: &ReadingSnapshot, log: &mut DedupLogger) -> SubmitResult {
        let form = SubmitForm {
            temp: reading.temperature,
            pres: reading.pressure,
            humi: reading.humidity,
            key: self.credential.expose(),
        };

        match self.exchange(&self.submit_url, &form, SUBMIT_ACCEPTED_BODY).await {
            Reply::Success => {
                info!("{}", reading);
                log.log(SUBMIT_NOTICE, LogLevel::Info);
                SubmitResult::Accepted
            }
            Reply::AuthRejected(body) => {
                log.log(body, LogLevel::Critical);
                SubmitResult::AuthRejected
            }
            Reply::Failed(e) => {
                report_transport_failure(log, &e);
                SubmitResult::TransportFailed
            }
        }
    }

    /// Ask the collector to discard all but its most recent records.
    async fn trim(&self, log: &mut DedupLogger) -> TrimResult {
        let form = TrimForm {
            key: self.credential.expose(),
        };

        match self.exchange(&self.trim_url, &form, TRIM_ACCEPTED_BODY).await {
            Reply::Success => {
                info!("Collector kept its latest records and cleaned up the rest");
                log.log(TRIM_NOTICE, LogLevel::Info);
                TrimResult::Trimmed
            }
            Reply::AuthRejected(body) => {
                log.log(body, LogLevel::Critical);
                TrimResult::AuthRejected
            }
            Reply::Failed(e) => {
                report_transport_failure(log, &e);
                TrimResult::TransportFailed
            }
        }
    }
}

/// Log a recoverable failure so that a sustained outage shows the marker once.
///
/// Three lines may be written (marker, detail, reconnect notice). Afterwards
/// the suppression state is pinned to the marker: the next failure's marker
/// is dropped even though the detail line came after it.
fn report_transport_failure(log: &mut DedupLogger, error: &ClientError) {
    log.log(POST_FAILED_MARKER, LogLevel::Error);
    log.log(error.to_string(), LogLevel::Error);
    log.log(RECONNECT_NOTICE, LogLevel::Info);
    log.force_last(POST_FAILED_MARKER);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup_log::test_support::{line_message, MemorySink};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "s3cret";

    fn reading() -> ReadingSnapshot {
        ReadingSnapshot {
            temperature: 21.5,
            pressure: 1013.25,
            humidity: 45.1,
        }
    }

    fn config_for(base: &str) -> Config {
        Config {
            credential: Credential::new(KEY),
            submit_url: format!("{}/submit", base),
            trim_url: format!("{}/trim", base),
            user_agent: "reporter-test/1.0".to_string(),
            request_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    fn memory_logger() -> (DedupLogger, MemorySink) {
        let sink = MemorySink::default();
        (DedupLogger::new(Box::new(sink.clone())), sink)
    }

    async fn mount_reply(server: &MockServer, route: &str, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_classify_bodies() {
        assert!(matches!(
            classify(StatusCode::OK, SUBMIT_ACCEPTED_BODY.to_string(), SUBMIT_ACCEPTED_BODY),
            Reply::Success
        ));
        assert!(matches!(
            classify(StatusCode::OK, AUTH_REJECTED_BODY.to_string(), SUBMIT_ACCEPTED_BODY),
            Reply::AuthRejected(_)
        ));
        assert!(matches!(
            classify(StatusCode::OK, "hello".to_string(), SUBMIT_ACCEPTED_BODY),
            Reply::Failed(ClientError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, "Forbidden".to_string(), SUBMIT_ACCEPTED_BODY),
            Reply::Failed(ClientError::Status { .. })
        ));
    }

    #[test]
    fn test_classify_is_exact_match() {
        let padded = format!("{}\n", SUBMIT_ACCEPTED_BODY);
        assert!(matches!(
            classify(StatusCode::OK, padded, SUBMIT_ACCEPTED_BODY),
            Reply::Failed(_)
        ));

        // the trim endpoint does not accept the submit success body
        assert!(matches!(
            classify(StatusCode::OK, SUBMIT_ACCEPTED_BODY.to_string(), TRIM_ACCEPTED_BODY),
            Reply::Failed(_)
        ));
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::FORBIDDEN,
            message: "Forbidden".to_string(),
        };
        assert!(format!("{}", err).contains("403"));
        assert!(format!("{}", err).contains("Forbidden"));

        let err = ClientError::UnexpectedResponse("oops".to_string());
        assert_eq!(format!("{}", err), "Unexpected response: \"oops\"");
    }

    #[test]
    fn test_client_creation() {
        let client = CollectorClient::new(&config_for("http://collector")).unwrap();
        assert_eq!(client.submit_url(), "http://collector/submit");
        assert_eq!(client.trim_url(), "http://collector/trim");
        assert_eq!(client.timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("user-agent", "reporter-test/1.0"))
            .and(body_string_contains("temp=21.5"))
            .and(body_string_contains("pres=1013.25"))
            .and(body_string_contains("humi=45.1"))
            .and(body_string_contains("key=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SUBMIT_ACCEPTED_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, sink) = memory_logger();

        let result = client.submit(&reading(), &mut log).await;

        assert_eq!(result, SubmitResult::Accepted);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("INFO"));
        assert_eq!(line_message(&lines[0]), SUBMIT_NOTICE);
    }

    #[tokio::test]
    async fn test_submit_auth_rejected() {
        let server = MockServer::start().await;
        mount_reply(&server, "/submit", 200, AUTH_REJECTED_BODY).await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, sink) = memory_logger();

        let result = client.submit(&reading(), &mut log).await;

        assert_eq!(result, SubmitResult::AuthRejected);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("CRITICAL"));
        assert_eq!(line_message(&lines[0]), AUTH_REJECTED_BODY);
    }

    #[tokio::test]
    async fn test_submit_unexpected_body_is_transport_failure() {
        let server = MockServer::start().await;
        mount_reply(&server, "/submit", 200, "database offline").await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, sink) = memory_logger();

        let result = client.submit(&reading(), &mut log).await;

        assert_eq!(result, SubmitResult::TransportFailed);
        let messages: Vec<String> = sink
            .lines()
            .iter()
            .map(|l| line_message(l).to_string())
            .collect();
        assert_eq!(messages[0], POST_FAILED_MARKER);
        assert!(messages[1].contains("database offline"));
        assert_eq!(messages[2], RECONNECT_NOTICE);
        assert_eq!(log.last_message(), Some(POST_FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_submit_forbidden_is_transport_failure() {
        let server = MockServer::start().await;
        mount_reply(&server, "/submit", 403, "Forbidden").await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, _sink) = memory_logger();

        assert_eq!(
            client.submit(&reading(), &mut log).await,
            SubmitResult::TransportFailed
        );
    }

    #[tokio::test]
    async fn test_consecutive_failures_log_marker_once() {
        let server = MockServer::start().await;
        mount_reply(&server, "/submit", 200, "unexpected reply").await;

        let (mut log, sink) = memory_logger();

        // first failure: unrecognised body
        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        assert_eq!(
            client.submit(&reading(), &mut log).await,
            SubmitResult::TransportFailed
        );

        // second failure: nothing listening, so a different detail
        let refused = CollectorClient::new(&config_for("http://127.0.0.1:1")).unwrap();
        assert_eq!(
            refused.submit(&reading(), &mut log).await,
            SubmitResult::TransportFailed
        );

        assert_eq!(sink.count_message(POST_FAILED_MARKER), 1);
        let details: Vec<String> = sink
            .lines()
            .iter()
            .map(|l| line_message(l).to_string())
            .filter(|m| m != POST_FAILED_MARKER && m != RECONNECT_NOTICE)
            .collect();
        assert_eq!(details.len(), 2);
        assert_ne!(details[0], details[1]);
    }

    #[tokio::test]
    async fn test_submit_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(SUBMIT_ACCEPTED_BODY)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut config = config_for(&server.uri());
        config.request_timeout = Duration::from_millis(200);
        let client = CollectorClient::new(&config).unwrap();
        let (mut log, sink) = memory_logger();

        let result = client.submit(&reading(), &mut log).await;

        assert_eq!(result, SubmitResult::TransportFailed);
        assert!(sink
            .lines()
            .iter()
            .any(|l| line_message(l) == "Request timed out"));
    }

    #[tokio::test]
    async fn test_trim_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trim"))
            .and(body_string_contains("key=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TRIM_ACCEPTED_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, sink) = memory_logger();

        assert_eq!(client.trim(&mut log).await, TrimResult::Trimmed);
        assert_eq!(sink.count_message(TRIM_NOTICE), 1);
    }

    #[tokio::test]
    async fn test_trim_auth_rejected() {
        let server = MockServer::start().await;
        mount_reply(&server, "/trim", 200, AUTH_REJECTED_BODY).await;

        let client = CollectorClient::new(&config_for(&server.uri())).unwrap();
        let (mut log, sink) = memory_logger();

        assert_eq!(client.trim(&mut log).await, TrimResult::AuthRejected);
        assert!(sink.lines()[0].contains("CRITICAL"));
    }

    #[tokio::test]
    async fn test_trim_transport_failure() {
        let client = CollectorClient::new(&config_for("http://127.0.0.1:1")).unwrap();
        let (mut log, sink) = memory_logger();

        assert_eq!(client.trim(&mut log).await, TrimResult::TransportFailed);
        assert_eq!(client.trim(&mut log).await, TrimResult::TransportFailed);
        assert_eq!(sink.count_message(POST_FAILED_MARKER), 1);
    }
}
