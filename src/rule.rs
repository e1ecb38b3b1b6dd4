//! Rule Binding: a matcher set, a handler, and an optional completion
//! predicate wired into one dispatchable unit (spec.md §3, §4.5)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use url::Url;

use crate::errors::{SessionOutcome, WsError};
use crate::handler::{self, HandlerVariant};
use crate::request::{IncomingRequest, RawHeaders};

/// conjunctive predicate over an incoming upgrade request
pub trait Matcher: Send + Sync {
    fn matches(&self, request: &IncomingRequest) -> bool;

    /// release any resources the matcher holds; default no-op
    fn dispose(&self) {}
}

/// decides whether a rule has seen enough requests to be considered done
pub trait CompletionPredicate: Send + Sync {
    fn is_complete(&self, request_count: u64) -> bool;

    fn dispose(&self) {}
}

/// an exact-count completion predicate, the common case
pub struct ExactlyN(pub u64);

impl CompletionPredicate for ExactlyN {
    fn is_complete(&self, request_count: u64) -> bool {
        request_count == self.0
    }
}

/// an immutable snapshot of one completed exchange (spec.md §3 "Exchange
/// record")
#[derive(Debug, Clone)]
pub struct ExchangeSnapshot {
    pub method: String,
    pub url: Url,
    pub headers: RawHeaders,
    pub outcome: SessionOutcome,
    pub started_at: Instant,
    pub duration: Duration,
}

/// the future-like record pushed into a rule's records list the moment a
/// recorded `handle` call begins (spec.md §4.5 "Recording timing": the
/// future is pushed before it resolves, so concurrent queries observe
/// in-flight exchanges as pending)
#[derive(Debug, Clone)]
pub enum ExchangeRecord {
    Pending { method: String, url: Url, started_at: Instant },
    Completed(ExchangeSnapshot),
}

struct RuleState {
    request_count: u64,
    records: Vec<Arc<Mutex<ExchangeRecord>>>,
}

/// spec.md §3 Rule + §4.5 Rule Binding, combined: the dispatcher's unit of
/// work. Created by the admin layer, mutated only along the dispatch
/// path, destroyed when explicitly disposed.
pub struct Rule {
    pub id: String,
    matchers: Vec<Box<dyn Matcher>>,
    handler: HandlerVariant,
    completion_predicate: Option<Box<dyn CompletionPredicate>>,
    // bundling the counter and the records list behind one lock gives the
    // "logical per-rule critical section" spec.md §5 asks for under
    // multi-threaded runtimes, without requiring cross-rule synchronization
    state: Mutex<RuleState>,
}

impl Rule {
    pub fn new(id: impl Into<String>, matchers: Vec<Box<dyn Matcher>>, handler: HandlerVariant, completion_predicate: Option<Box<dyn CompletionPredicate>>) -> Self {
        Self {
            id: id.into(),
            matchers,
            handler,
            completion_predicate,
            state: Mutex::new(RuleState {
                request_count: 0,
                records: Vec::new(),
            }),
        }
    }

    /// a fresh rule id when the admin layer omits one (spec.md §3 "unique
    /// identifier (opaque string, generated if absent)")
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// all matchers must accept (spec.md §4.5)
    pub fn matches(&self, request: &IncomingRequest) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }

    /// invoke the handler, incrementing the request counter unconditionally
    /// and, if `record` is set, appending a pending exchange record before
    /// awaiting the handler (spec.md §4.5)
    pub async fn handle<S>(&self, request: &IncomingRequest, socket: S, head: BytesMut, record: bool) -> Result<SessionOutcome, WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started_at = Instant::now();
        let slot = {
            let mut state = self.state.lock().await;
            state.request_count += 1;
            if record {
                let slot = Arc::new(Mutex::new(ExchangeRecord::Pending {
                    method: request.method.clone(),
                    url: request.url.clone(),
                    started_at,
                }));
                state.records.push(slot.clone());
                Some(slot)
            } else {
                None
            }
        };

        let outcome = handler::handle(&self.handler, request, socket, head).await;

        if let Some(slot) = slot {
            let snapshot = ExchangeSnapshot {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                outcome: *outcome.as_ref().unwrap_or(&SessionOutcome::Destroyed),
                started_at,
                duration: started_at.elapsed(),
            };
            *slot.lock().await = ExchangeRecord::Completed(snapshot);
        }

        outcome
    }

    /// number of times `handle` has been invoked so far, regardless of
    /// whether recording was enabled
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }

    /// a snapshot of every record pushed so far, in dispatch order
    pub async fn records(&self) -> Vec<ExchangeRecord> {
        let state = self.state.lock().await;
        let mut out = Vec::with_capacity(state.records.len());
        for slot in &state.records {
            out.push(slot.lock().await.clone());
        }
        out
    }

    /// `None` if no completion predicate is configured (spec.md §4.5:
    /// "returns undefined if no predicate is configured")
    pub async fn is_complete(&self) -> Option<bool> {
        let predicate = self.completion_predicate.as_ref()?;
        let count = self.request_count().await;
        Some(predicate.is_complete(count))
    }

    /// human-readable summary; `without_exact_completion` omits the
    /// completion predicate's own description (spec.md §4.5)
    pub fn explain(&self, without_exact_completion: bool) -> String {
        let mut parts = vec![format!("rule {} with {} matcher(s)", self.id, self.matchers.len())];
        parts.push(match &self.handler {
            HandlerVariant::PassThrough(_) => "handler=pass-through".to_string(),
            HandlerVariant::Echo => "handler=echo".to_string(),
            HandlerVariant::Listen => "handler=listen".to_string(),
            HandlerVariant::Reject(r) => format!("handler=reject({})", r.status_code),
            HandlerVariant::CloseConnection => "handler=close-connection".to_string(),
            HandlerVariant::ResetConnection => "handler=reset-connection".to_string(),
            HandlerVariant::Timeout => "handler=timeout".to_string(),
        });
        if !without_exact_completion {
            if self.completion_predicate.is_some() {
                parts.push("completion=configured".to_string());
            } else {
                parts.push("completion=none".to_string());
            }
        }
        parts.join(", ")
    }

    /// cascading disposal: matchers and completion predicate release their
    /// resources; the handler itself is dropped along with `self`
    pub fn dispose(self) {
        for matcher in &self.matchers {
            matcher.dispose();
        }
        if let Some(predicate) = &self.completion_predicate {
            predicate.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RejectResponse;

    struct AlwaysMatch;
    impl Matcher for AlwaysMatch {
        fn matches(&self, _request: &IncomingRequest) -> bool {
            true
        }
    }

    struct NeverMatch;
    impl Matcher for NeverMatch {
        fn matches(&self, _request: &IncomingRequest) -> bool {
            false
        }
    }

    fn sample_request() -> IncomingRequest {
        IncomingRequest {
            method: "GET".into(),
            url: Url::parse("ws://client.local/chat").unwrap(),
            headers: RawHeaders::default(),
            version: crate::request::HttpVersionHint::Http1,
            remote_ip_address: None,
            last_hop_encrypted: None,
        }
    }

    fn reject_rule(id: &str, matchers: Vec<Box<dyn Matcher>>) -> Rule {
        Rule::new(
            id,
            matchers,
            HandlerVariant::Reject(RejectResponse {
                status_code: 418,
                status_message: "teapot".into(),
                headers: vec![],
                body: vec![],
            }),
            None,
        )
    }

    #[test]
    fn matches_requires_every_matcher_to_accept() {
        let rule = reject_rule("r1", vec![Box::new(AlwaysMatch), Box::new(NeverMatch)]);
        assert!(!rule.matches(&sample_request()));

        let rule = reject_rule("r2", vec![Box::new(AlwaysMatch), Box::new(AlwaysMatch)]);
        assert!(rule.matches(&sample_request()));
    }

    #[tokio::test]
    async fn request_count_increments_regardless_of_recording() {
        let rule = reject_rule("r3", vec![]);
        let (_client, server) = tokio::io::duplex(64);
        let request = sample_request();
        let _ = rule.handle(&request, server, BytesMut::new(), false).await;
        assert_eq!(rule.request_count().await, 1);
        assert!(rule.records().await.is_empty());
    }

    #[tokio::test]
    async fn recording_appends_exactly_one_completed_record() {
        let rule = reject_rule("r4", vec![]);
        let (_client, server) = tokio::io::duplex(64);
        let request = sample_request();
        let _ = rule.handle(&request, server, BytesMut::new(), true).await;
        let records = rule.records().await;
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], ExchangeRecord::Completed(_)));
    }

    #[tokio::test]
    async fn is_complete_is_none_without_a_predicate() {
        let rule = reject_rule("r5", vec![]);
        assert_eq!(rule.is_complete().await, None);
    }

    #[tokio::test]
    async fn is_complete_delegates_to_predicate_with_current_counter() {
        let rule = Rule::new(
            "r6",
            vec![],
            HandlerVariant::Reject(RejectResponse {
                status_code: 418,
                status_message: "teapot".into(),
                headers: vec![],
                body: vec![],
            }),
            Some(Box::new(ExactlyN(1))),
        );
        assert_eq!(rule.is_complete().await, Some(false));
        let (_client, server) = tokio::io::duplex(64);
        let _ = rule.handle(&sample_request(), server, BytesMut::new(), false).await;
        assert_eq!(rule.is_complete().await, Some(true));
    }
}
