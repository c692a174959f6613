//! Streaming answers over Server-Sent Events

use futures::StreamExt;
use tracing::{debug, warn};

use querious_core::{Error, QueryRequest, Result, StreamingConsumer, StreamingState};

use crate::client::QueriousClient;

impl QueriousClient {
    /// Ask a question and drive `consumer` with the streamed answer
    ///
    /// `observer` sees the state once on start and again after every read that
    /// changed it. Errors reported by the server inside the stream end in an
    /// `error` stage and an `Ok` return; transport failures and refusals
    /// before the stream opens also set the error stage and are returned as
    /// `Err`.
    pub async fn stream_query<F>(
        &self,
        chat_id: &str,
        request: &QueryRequest,
        consumer: &mut StreamingConsumer,
        mut observer: F,
    ) -> Result<StreamingState>
    where
        F: FnMut(&StreamingState),
    {
        consumer.start();
        observer(consumer.state());

        let response = match self.open_stream(chat_id, request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    Error::QuotaExceeded(limit) => consumer.refuse(limit.clone()),
                    other => consumer.fail(other.to_string()),
                }
                observer(consumer.state());
                return Err(e);
            }
        };

        let mut body = response.bytes_stream();
        while let Some(read) = body.next().await {
            match read {
                Ok(bytes) => {
                    if consumer.feed(&bytes) {
                        observer(consumer.state());
                    }
                    if consumer.state().is_terminal() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(chat_id, error = %e, "answer stream interrupted");
                    consumer.fail(format!("Connection lost: {}", e));
                    observer(consumer.state());
                    return Err(Error::Network(e.to_string()));
                }
            }
        }

        if consumer.finish() {
            observer(consumer.state());
        }

        let state = consumer.state();
        debug!(chat_id, stage = %state.stage, chars = state.content.len(), "answer stream finished");
        Ok(state.clone())
    }
}
