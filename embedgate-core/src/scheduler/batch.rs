//! A batch of drained requests and the mapping back to their callers.

use std::ops::Range;

use tokio::time::Instant;

use crate::error::CoreError;
use crate::events::FlushReason;
use crate::queue::Request;
use crate::types::{Embedding, InferenceOutput};

/// Requests flushed together into one backend call.
///
/// `spans[i]` is the range of aggregate item positions that belong to
/// `requests[i]`. Spans are contiguous and in request order.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    requests: Vec<Request>,
    spans: Vec<Range<usize>>,
    reason: FlushReason,
}

impl Batch {
    pub fn new(id: u64, requests: Vec<Request>, reason: FlushReason) -> Self {
        let mut offset = 0;
        let spans = requests
            .iter()
            .map(|request| {
                let span = offset..offset + request.item_count();
                offset = span.end;
                span
            })
            .collect();
        Self { id, requests, spans, reason }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reason(&self) -> FlushReason {
        self.reason
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Total number of text items across all requests
    pub fn item_count(&self) -> usize {
        self.spans.last().map_or(0, |span| span.end)
    }

    /// Admission time of the oldest request
    pub fn oldest_enqueued(&self) -> Option<Instant> {
        self.requests.iter().map(|r| r.enqueued_at).min()
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Index of the request that contributed aggregate item `position`
    pub fn origin_of(&self, position: usize) -> Option<usize> {
        if position >= self.item_count() {
            return None;
        }
        let index = self.spans.partition_point(|span| span.end <= position);
        Some(index)
    }

    /// Concatenate every request's payload into one backend input. Request
    /// payloads are left empty; the spans keep the mapping.
    pub fn take_items(&mut self) -> Vec<String> {
        let mut items = Vec::with_capacity(self.item_count());
        for request in &mut self.requests {
            items.append(&mut request.payload);
        }
        items
    }

    /// Resolve every request's channel exactly once.
    ///
    /// On success each request gets the embeddings of its own span; on
    /// failure every request gets the same error. The caller must have
    /// checked that a successful result holds one embedding per item.
    /// Returns how many callers had already stopped waiting.
    pub fn fan_out(self, result: Result<Vec<Embedding>, CoreError>) -> usize {
        let batch_id = self.id;
        let batch_size = self.requests.len();
        let mut abandoned = 0;

        match result {
            Ok(embeddings) => {
                let mut embeddings = embeddings.into_iter();
                for (request, span) in self.requests.into_iter().zip(self.spans) {
                    let output = InferenceOutput {
                        embeddings: embeddings.by_ref().take(span.len()).collect(),
                        batch_id,
                        batch_size,
                    };
                    if !request.respond(Ok(output)) {
                        abandoned += 1;
                    }
                }
            }
            Err(err) => {
                for request in self.requests {
                    if !request.respond(Err(err.clone())) {
                        abandoned += 1;
                    }
                }
            }
        }

        if abandoned > 0 {
            tracing::debug!(batch_id, abandoned, "Results dropped for callers that stopped waiting");
        }
        abandoned
    }
}
