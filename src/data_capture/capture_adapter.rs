//! Capture Adapter
//!
//! Bridges engine callbacks into the host runtime. Hooks fire on the engine's
//! own thread, so the adapter only builds the `Exchange` there and hands the
//! storage write and the broadcast to the [`HostScheduler`] as two separate
//! actions, persistence first. Neither action is awaited by the engine.
//!
//! Writes go through a single [`SerialLane`] so rows are inserted in capture
//! order. Broadcasts are spawned independently.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::broadcast::broadcast_hub::BroadcastHub;
use crate::data_capture::scheduler::{HostScheduler, SerialLane};
use crate::data_capture::types::{Flow, FlowRequest, FlowResponse};
use crate::engine::types::FlowHooks;
use crate::storage::storage_trait::ExchangeStore;
use crate::storage::types::{format_timestamp, Exchange, HttpMessage, OrderedMap};

/// Saves waiting on a slow database beyond this are dropped with a warning.
const WRITE_QUEUE_CAPACITY: usize = 4096;

pub struct CaptureAdapter {
    store: Arc<dyn ExchangeStore>,
    hub: Arc<BroadcastHub>,
    scheduler: HostScheduler,
    writer: SerialLane,
}

impl CaptureAdapter {
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        hub: Arc<BroadcastHub>,
        scheduler: HostScheduler,
    ) -> Self {
        Self {
            store,
            hub,
            writer: scheduler.serial_lane(WRITE_QUEUE_CAPACITY),
            scheduler,
        }
    }

    /// Normalizes a completed flow. Returns `None` when it has no response.
    pub fn build_exchange(flow: &Flow) -> Option<Exchange> {
        let response = flow.response.as_ref()?;
        let elapsed = response
            .timestamp_end
            .duration_since(flow.request.timestamp_start)
            .unwrap_or(Duration::ZERO);

        Some(Exchange {
            id: None,
            method: flow.request.method.clone(),
            url: flow.request.url.clone(),
            status_line: format!("{} {}", response.status_code, response.reason)
                .trim_end()
                .to_string(),
            duration_label: format!("{}ms", elapsed.as_millis()),
            timestamp: format_timestamp(response.timestamp_end),
            request: request_message(&flow.request),
            response: response_message(response),
        })
    }
}

fn fold_headers(headers: &[(String, String)]) -> OrderedMap {
    let mut folded = OrderedMap::new();
    for (name, value) in headers {
        folded.append_folded(name.clone(), value);
    }
    folded
}

/// Bodies that are not valid UTF-8 are recorded as empty text.
fn body_text(body: &[u8]) -> String {
    std::str::from_utf8(body)
        .map(str::to_string)
        .unwrap_or_default()
}

fn request_message(request: &FlowRequest) -> HttpMessage {
    HttpMessage {
        headers: fold_headers(&request.headers),
        body: body_text(&request.body),
        cookies: request.cookies().into_iter().collect(),
    }
}

fn response_message(response: &FlowResponse) -> HttpMessage {
    HttpMessage {
        headers: fold_headers(&response.headers),
        body: body_text(&response.body),
        cookies: response
            .cookies()
            .into_iter()
            .map(|(name, cookie)| (name, cookie.to_string()))
            .collect(),
    }
}

impl FlowHooks for CaptureAdapter {
    fn on_request_start(&self, flow: &Flow) {
        info!("[Request] {} {}", flow.request.method, flow.request.url);
    }

    fn on_response_complete(&self, flow: &Flow) {
        let Some(exchange) = Self::build_exchange(flow) else {
            return;
        };
        info!(
            "[Captured] {} {} - Status: {}",
            exchange.method, exchange.url, exchange.status_line
        );

        let exchange = Arc::new(exchange);

        let store = self.store.clone();
        let to_save = exchange.clone();
        self.writer.submit(async move {
            store.save(&to_save).await;
        });

        let hub = self.hub.clone();
        self.scheduler.submit(async move {
            hub.publish(&exchange).await;
        });
    }

    fn on_flow_error(&self, flow: &Flow) {
        error!(
            "[Error] {} {}: {}",
            flow.request.method,
            flow.request.url,
            flow.error.as_deref().unwrap_or("unknown error")
        );
    }
}
