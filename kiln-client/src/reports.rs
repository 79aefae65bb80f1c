//! Reporter calls

use crate::CoordinatorClient;
use crate::error::Result;
use kiln_core::dto::report::{
    CommandOutput, FINISHED_PATH, OUTPUT_PATH, PipelineFinished, PipelineStarted, STARTED_PATH,
};

impl CoordinatorClient {
    /// Report that a runner picked up a pipeline
    pub async fn pipeline_started(&self, req: &PipelineStarted) -> Result<()> {
        self.post_empty(STARTED_PATH, req).await
    }

    /// Report the final outcome of a pipeline run
    pub async fn pipeline_finished(&self, req: &PipelineFinished) -> Result<()> {
        self.post_empty(FINISHED_PATH, req).await
    }

    /// Report the captured output of one executed command
    pub async fn command_output(&self, req: &CommandOutput) -> Result<()> {
        self.post_empty(OUTPUT_PATH, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientError;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use kiln_core::domain::pipeline::Outcome;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn spawn_server() -> (String, Received) {
        let received: Received = Arc::default();

        async fn record(
            State((path, received)): State<(&'static str, Received)>,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            received.lock().unwrap().push((path.to_string(), body));
            StatusCode::NO_CONTENT
        }

        let app = Router::new()
            .route(
                STARTED_PATH,
                post(record).with_state((STARTED_PATH, received.clone())),
            )
            .route(
                FINISHED_PATH,
                post(record).with_state((FINISHED_PATH, received.clone())),
            )
            .route(
                OUTPUT_PATH,
                post(|| async { (StatusCode::NOT_FOUND, "pipeline 7 not found") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), received)
    }

    #[tokio::test]
    async fn test_lifecycle_calls_hit_their_routes() {
        let (url, received) = spawn_server().await;
        let client = CoordinatorClient::new(url);

        client
            .pipeline_started(&PipelineStarted {
                pipeline_id: 7,
                started_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        client
            .pipeline_finished(&PipelineFinished {
                pipeline_id: 7,
                finished_at: chrono::Utc::now(),
                outcome: Outcome::Success,
                error: None,
            })
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0, STARTED_PATH);
        assert_eq!(received[0].1["pipeline_id"], 7);
        assert_eq!(received[1].0, FINISHED_PATH);
        assert_eq!(received[1].1["outcome"], "success");
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let (url, _) = spawn_server().await;
        let client = CoordinatorClient::new(url);

        let err = client
            .command_output(&CommandOutput {
                pipeline_id: 7,
                order: 0,
                cmd: "echo hello".to_string(),
                output: "hello\n".to_string(),
                exit_code: 0,
            })
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(matches!(err, ClientError::ApiError { ref message, .. } if message.contains("not found")));
    }

    #[tokio::test]
    async fn test_unreachable_coordinator() {
        let client = CoordinatorClient::new("http://127.0.0.1:1");

        let err = client
            .pipeline_started(&PipelineStarted {
                pipeline_id: 1,
                started_at: chrono::Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::RequestFailed(_)));
    }
}
