use crate::errors::RecorderError;
use crate::model::{HttpRequest, HttpResponse, RequestSnapshot};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One link of a client pipeline: takes a request, eventually yields the
/// response from the next link or the network.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RecorderError>;
}

pub type Responder =
    Arc<dyn Fn(&RequestSnapshot) -> Result<HttpResponse, RecorderError> + Send + Sync>;

/// In-memory stand-in for the network.
#[derive(Clone)]
pub struct FakeHttpHandler {
    responder: Responder,
    latency: Option<Duration>,
    requests: Arc<Mutex<Vec<RequestSnapshot>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeHttpHandler {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RequestSnapshot) -> Result<HttpResponse, RecorderError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<RequestSnapshot> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpHandler for FakeHttpHandler {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RecorderError> {
        let snapshot = RequestSnapshot::from_http(&request)?;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let response = (self.responder)(&snapshot);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}
