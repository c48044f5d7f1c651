//! Transcode handler.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tracing::{info, info_span, warn, Instrument};

use ffblob_models::{RequestId, TranscodeRequest, TranscodeResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Download a blob, run the vetted ffmpeg directive on it and upload the result.
///
/// A non-empty JSON object body wins; otherwise the fields are read from query
/// parameters. Unreadable or oversized input is reported like any other
/// validation failure.
pub async fn transcode(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    params: Result<Query<HashMap<String, String>>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = request_id.map(|Extension(id)| id).unwrap_or_default();
    let production = state.config.is_production();
    let span = info_span!("transcode", request_id = %request_id);

    async move {
        let parsed = match (params, body) {
            (Err(rejection), _) => Err(ApiError::validation(format!(
                "Invalid query string: {}",
                rejection.body_text()
            ))),
            (_, Err(rejection)) => Err(ApiError::validation(format!(
                "Invalid request body: {}",
                rejection.body_text()
            ))),
            (Ok(Query(params)), Ok(body)) => parse_request(&body, &params),
        };

        let result = match parsed {
            Ok(request) => state.pipeline.run(&request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(url) => {
                info!(output = %url, "Transcode completed");
                Json(TranscodeResponse {
                    output_blob_url: url.to_string(),
                })
                .into_response()
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Transcode failed");
                e.into_response_with(&request_id, production)
            }
        }
    }
    .instrument(span)
    .await
}

fn parse_request(body: &[u8], params: &HashMap<String, String>) -> ApiResult<TranscodeRequest> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) if !map.is_empty() => {
            serde_json::from_value(serde_json::Value::Object(map))
                .map_err(|e| ApiError::validation(format!("Invalid request body: {}", e)))
        }
        _ => Ok(TranscodeRequest {
            input_blob_url: params.get("inputBlobUrl").cloned(),
            output_container_name: params.get("outputContainerName").cloned(),
            ffmpeg_command: params.get("ffmpegCommand").cloned(),
        }),
    }
}
