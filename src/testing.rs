//! Test support: a scripted gateway with call capture and concurrency
//! instrumentation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::gateway::{Gateway, GatewayReply, GatewayRequest, SearchReference};

type Responder = Box<dyn Fn(&GatewayRequest) -> Result<GatewayReply> + Send + Sync>;

/// A gateway whose replies are produced by a scripted responder closure.
///
/// Every call is captured for later assertions, and the in-flight counter
/// records the maximum concurrency the caller actually reached.
pub(crate) struct MockGateway {
    responder: Responder,
    latency: Duration,
    pub(crate) calls: Mutex<Vec<GatewayRequest>>,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

impl MockGateway {
    pub(crate) fn new(
        responder: impl Fn(&GatewayRequest) -> Result<GatewayReply> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::slow(responder, Duration::from_millis(2))
    }

    /// A mock whose calls take `latency` to complete, so concurrent callers
    /// overlap measurably.
    pub(crate) fn slow(
        responder: impl Fn(&GatewayRequest) -> Result<GatewayReply> + Send + Sync + 'static,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            latency,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Count captured calls matching a predicate.
    pub(crate) fn calls_matching(&self, predicate: impl Fn(&GatewayRequest) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|request| predicate(request))
            .count()
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn invoke(&self, request: GatewayRequest) -> Result<GatewayReply> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.calls.lock().unwrap().push(request.clone());
        let result = (self.responder)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Wrap a structured value in a reply with no search metadata.
pub(crate) fn structured(value: serde_json::Value) -> GatewayReply {
    GatewayReply::structured(value)
}

/// A reply carrying structured search-reference metadata.
pub(crate) fn search_reply(
    value: serde_json::Value,
    references: Vec<(&str, &str)>,
) -> GatewayReply {
    GatewayReply {
        value,
        references: references
            .into_iter()
            .map(|(url, title)| SearchReference {
                url: url.to_string(),
                title: title.to_string(),
            })
            .collect(),
        text: String::new(),
    }
}
