use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use greenhouse_advisor::AdviceStreamer;
use greenhouse_common::Error;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::relay::{ConduitWriter, conduit, into_body_stream};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct AdviceQuery {
    pub plant: Option<String>,
}

/// `GET /api/llm/plant-advice?plant=<name>`
///
/// The advice is produced on a separate task and relayed through a bounded
/// conduit. The response status is decided by the first thing that comes out
/// of the conduit: an error before any text becomes a JSON error response,
/// anything else commits a 200 and the remaining text is streamed chunk by
/// chunk. Failures after that point cut the body short.
pub async fn plant_advice(
    State(state): State<SharedState>,
    Query(query): Query<AdviceQuery>,
) -> Response {
    let plant = query
        .plant
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.config.advice.default_plant.clone());
    info!(plant = %plant, "plant advice requested");

    let streamer = Arc::clone(&state.streamer);
    let deadline = match streamer.deadline_from_now() {
        Ok(deadline) => deadline,
        Err(err) => return ApiError(err).into_response(),
    };

    let advice = &state.config.advice;
    let chunk_size = advice.relay_chunk_size;
    let (writer, mut reader) = conduit(advice.conduit_capacity, chunk_size);
    tokio::spawn(produce(streamer, plant, deadline, writer));

    match reader.read_chunk(chunk_size).await {
        Err(err) => ApiError(err).into_response(),
        Ok(first) => {
            let head = futures::stream::iter(first.map(Ok::<_, Error>));
            let body = Body::from_stream(head.chain(into_body_stream(reader, chunk_size)));
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
    }
}

/// Producer side of one advice request. Owns the writer and closes it exactly
/// once, with the outcome's error when there is one.
pub async fn produce(
    streamer: Arc<AdviceStreamer>,
    plant: String,
    deadline: Instant,
    mut writer: ConduitWriter,
) {
    let outcome = streamer.run(&plant, deadline, &mut writer).await;
    match outcome.into_result() {
        Ok(()) => writer.close(),
        Err(err) if err.is_client_disconnect() => {
            debug!(plant = %plant, "no reader left to notify");
            writer.close();
        }
        Err(err) => writer.close_with_error(err).await,
    }
}
