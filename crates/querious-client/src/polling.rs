//! Polling fallback for background query jobs

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use querious_core::{Error, QueryEventRequest, QueryResult, Result};

use crate::client::{error_for_status, QueriousClient};

#[derive(Debug, Deserialize)]
struct RunsEnvelope {
    #[serde(default)]
    data: Vec<JobRun>,
}

#[derive(Debug, Deserialize)]
struct JobRun {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<Value>,
}

/// What one look at the runs endpoint told us
#[derive(Debug)]
enum Poll {
    Pending,
    Completed(Value),
}

impl QueriousClient {
    /// Wait for the first run of `event_id` to finish and return its output
    ///
    /// HTML responses and runs that have not started yet are retried every
    /// poll interval until the poll timeout elapses.
    pub async fn poll_job_output(&self, event_id: &str) -> Result<Value> {
        let url = format!("{}/events/{}/runs", self.config().jobs_url, event_id);
        let interval = self.config().poll_interval;
        let limit = self.config().poll_timeout;

        let wait = async {
            loop {
                if let Poll::Completed(output) = self.poll_once(&url).await? {
                    return Ok::<Value, Error>(output);
                }
                sleep(interval).await;
            }
        };

        match timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "job {} did not finish within {}s",
                event_id,
                limit.as_secs()
            ))),
        }
    }

    /// Ask a question through the background job path and wait for the answer
    pub async fn ask_in_background(&self, request: &QueryEventRequest) -> Result<QueryResult> {
        let event_ids = self.send_query_event(request).await?;
        let event_id = event_ids
            .first()
            .ok_or_else(|| Error::Other("server queued no job for the question".to_string()))?;

        let output = self.poll_job_output(event_id).await?;
        let result: QueryResult = serde_json::from_value(output)?;
        info!(event_id = %event_id, tokens = result.tokens_used, "background answer ready");
        Ok(result)
    }

    async fn poll_once(&self, url: &str) -> Result<Poll> {
        let response = self
            .http()
            .get(url)
            .timeout(self.config().request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if is_html || body.trim_start().starts_with('<') {
            debug!(url, "job runner returned HTML, retrying");
            return Ok(Poll::Pending);
        }
        if status == StatusCode::NOT_FOUND {
            debug!(url, "job not registered yet");
            return Ok(Poll::Pending);
        }
        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }

        let runs: RunsEnvelope = serde_json::from_str(&body)?;
        let Some(run) = runs.data.into_iter().next() else {
            return Ok(Poll::Pending);
        };

        match run.status.as_deref() {
            Some("Completed") => Ok(Poll::Completed(run.output.unwrap_or(Value::Null))),
            Some(state @ ("Failed" | "Cancelled")) => Err(Error::Api {
                status: status.as_u16(),
                message: format!("job {}", state.to_lowercase()),
            }),
            other => {
                debug!(url, status = ?other, "job still running");
                Ok(Poll::Pending)
            }
        }
    }
}
