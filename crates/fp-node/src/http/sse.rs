//! Server-sent event stream of one provider's signatures.

use super::error::ApiError;
use super::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use fp_signature_tracker::{ProviderKey, SignatureEvent};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

/// `retry:` directive, then the `initial` snapshot, then one `block` event per
/// finalized height. The subscription ends when the client disconnects.
pub(super) async fn signature_stream(
    State(state): State<AppState>,
    Path(provider_key): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let connection_id = Uuid::new_v4();
    let events = state
        .feed
        .subscribe(connection_id, ProviderKey::new(&provider_key))
        .await?;
    info!(%connection_id, provider = %provider_key, "Signature stream opened");

    let retry = tokio_stream::once(Ok::<_, Infallible>(
        Event::default().retry(state.retry_directive),
    ));
    let stream = retry.chain(events.map(|event| Ok(json_event(&event))));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.keep_alive_secs))
            .text("hb"),
    ))
}

fn json_event(event: &SignatureEvent) -> Event {
    let name = event.event_name();
    match Event::default().event(name).json_data(event) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(?err, event = name, "Failed to encode signature event");
            Event::default().event(name)
        }
    }
}
