use crate::error::ExtractionError;
use crate::traits::{AnalyzedDocument, DocumentAnalyzer};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

pub const READ_MODEL_ID: &str = "prebuilt-read";
pub const DEFAULT_LOCALE: &str = "en-US";

const API_VERSION: &str = "2023-07-31";
const BACKEND: &str = "azure-document-intelligence";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";
const MIN_POLL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AzureCredentials {
    pub azure_api_key: String,
    pub azure_endpoint: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisPollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for AnalysisPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Client for the asynchronous `prebuilt-read` analyze operation.
pub struct AzureReadClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    locale: String,
    poll: AnalysisPollPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzedDocument>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AzureReadClient {
    pub fn new(credentials: &AzureCredentials) -> Result<Self, ExtractionError> {
        let base = format!("{}/", credentials.azure_endpoint.trim_end_matches('/'));
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(&base)?,
            api_key: credentials.azure_api_key.clone(),
            locale: DEFAULT_LOCALE.to_string(),
            poll: AnalysisPollPolicy::default(),
        })
    }

    pub fn with_poll_policy(mut self, poll: AnalysisPollPolicy) -> Self {
        self.poll = poll;
        self
    }

    fn analyze_url(&self) -> Result<Url, ExtractionError> {
        let mut url = self
            .endpoint
            .join(&format!("formrecognizer/documentModels/{READ_MODEL_ID}:analyze"))?;
        url.query_pairs_mut()
            .append_pair("api-version", API_VERSION)
            .append_pair("locale", &self.locale);
        Ok(url)
    }

    async fn poll_operation(&self, location: &str) -> Result<AnalyzedDocument, ExtractionError> {
        let started = Instant::now();

        loop {
            let response = self
                .client
                .get(location)
                .header(KEY_HEADER, &self.api_key)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(%status, body = %body, "analyze operation poll rejected");
                return Err(ExtractionError::BackendResponse {
                    backend: BACKEND.to_string(),
                    status: status.as_u16(),
                });
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            let body = response.text().await?;
            let operation: AnalyzeOperation = serde_json::from_str(&body)
                .map_err(|error| ExtractionError::UnrecognizedResult(error.to_string()))?;

            match operation.status.as_str() {
                "succeeded" => {
                    return operation.analyze_result.ok_or_else(|| {
                        ExtractionError::UnrecognizedResult(
                            "operation succeeded without analyzeResult".to_string(),
                        )
                    });
                }
                "failed" => {
                    let details = operation
                        .error
                        .map(|error| {
                            format!(
                                "{}: {}",
                                error.code.unwrap_or_else(|| "unknown".to_string()),
                                error.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| "no error details".to_string());
                    return Err(ExtractionError::AnalysisFailed(details));
                }
                "notStarted" | "running" => {}
                other => {
                    return Err(ExtractionError::UnrecognizedResult(format!(
                        "operation status {other}"
                    )));
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.poll.max_wait {
                return Err(ExtractionError::Timeout(self.poll.max_wait));
            }

            let delay = retry_after
                .unwrap_or(self.poll.interval)
                .max(MIN_POLL_DELAY)
                .min(self.poll.max_wait - elapsed);
            debug!(status = %operation.status, ?delay, "waiting for document analysis");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for AzureReadClient {
    async fn analyze(&self, document: &[u8]) -> Result<AnalyzedDocument, ExtractionError> {
        let response = self
            .client
            .post(self.analyze_url()?)
            .header(KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/pdf")
            .body(document.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "analyze request rejected");
            return Err(ExtractionError::BackendResponse {
                backend: BACKEND.to_string(),
                status: status.as_u16(),
            });
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(ExtractionError::MissingOperationLocation)?;

        self.poll_operation(&location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ANALYZE_PATH: &str = "/formrecognizer/documentModels/prebuilt-read:analyze";
    const RESULT_PATH: &str = "/formrecognizer/documentModels/prebuilt-read/analyzeResults/op-1";

    fn client_for(server: &MockServer) -> Result<AzureReadClient, ExtractionError> {
        let client = AzureReadClient::new(&AzureCredentials {
            azure_api_key: "test-key".to_string(),
            azure_endpoint: server.uri(),
        })?;
        Ok(client.with_poll_policy(AnalysisPollPolicy {
            interval: Duration::from_millis(10),
            max_wait: Duration::from_millis(300),
        }))
    }

    async fn mount_submission(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(ANALYZE_PATH))
            .and(query_param("api-version", API_VERSION))
            .and(query_param("locale", "en-US"))
            .and(header(KEY_HEADER, "test-key"))
            .and(header("content-type", "application/pdf"))
            .and(body_bytes(b"%PDF-1.7 test".to_vec()))
            .respond_with(ResponseTemplate::new(202).insert_header(
                "Operation-Location",
                format!("{}{}", server.uri(), RESULT_PATH).as_str(),
            ))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn analysis_is_polled_until_succeeded() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_submission(&server).await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "analyzeResult": {
                    "modelId": "prebuilt-read",
                    "pages": [
                        {"pageNumber": 1, "words": [{"content": "Safety", "confidence": 0.99}]},
                        {"pageNumber": 2, "words": [
                            {"content": "Troubleshooting", "confidence": 0.98},
                            {"content": "Console", "confidence": 0.97}
                        ]}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let analyzed = client_for(&server)?.analyze(b"%PDF-1.7 test").await?;

        assert_eq!(analyzed.pages.len(), 2);
        assert_eq!(analyzed.pages[1].page_number, 2);
        assert_eq!(analyzed.pages[1].words[0].content, "Troubleshooting");
        Ok(())
    }

    #[tokio::test]
    async fn failed_operation_reports_provider_error() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_submission(&server).await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed",
                "error": {"code": "InvalidContent", "message": "The file is corrupted."}
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)?.analyze(b"%PDF-1.7 test").await;

        match result {
            Err(ExtractionError::AnalysisFailed(details)) => {
                assert!(details.contains("InvalidContent"));
            }
            other => panic!("expected analysis failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn stuck_operation_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_submission(&server).await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .mount(&server)
            .await;

        let result = client_for(&server)?.analyze(b"%PDF-1.7 test").await;

        assert!(matches!(result, Err(ExtractionError::Timeout(_))));
        Ok(())
    }

    #[tokio::test]
    async fn zero_retry_after_keeps_a_poll_floor() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_submission(&server).await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({"status": "running"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server)?.analyze(b"%PDF-1.7 test").await;

        assert!(matches!(result, Err(ExtractionError::Timeout(_))));
        let polls = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.method.as_str() == "GET")
            .count();
        assert!(polls <= 5, "polled {polls} times within 300ms");
        Ok(())
    }

    #[tokio::test]
    async fn rejected_submission_maps_status() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(ANALYZE_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("access denied"))
            .mount(&server)
            .await;

        let result = client_for(&server)?.analyze(b"%PDF-1.7 test").await;

        assert!(matches!(
            result,
            Err(ExtractionError::BackendResponse { status: 401, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_result_shape_is_unrecognized() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        mount_submission(&server).await;

        Mock::given(method("GET"))
            .and(path(RESULT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "succeeded",
                "analyzeResult": {"pages": [{"words": "not-a-list"}]}
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)?.analyze(b"%PDF-1.7 test").await;

        assert!(matches!(result, Err(ExtractionError::UnrecognizedResult(_))));
        Ok(())
    }
}
