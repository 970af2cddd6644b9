//! Per-request exchange state machine.
//!
//! # States
//! ```text
//! Dialing ──Connected──▶ ForwardingRequest ──RequestForwarded──▶ AwaitingResponse
//!                              │                                      │
//!                              └────────────ResponseHead──────────────┤
//!                                                                     ▼
//!                         Done ◀──ResponseComplete── StreamingResponse
//!
//! any live phase ──Fault(kind)──▶ Failed(kind)
//! ```
//!
//! An error reply is only ever produced by a fault in one of the three
//! phases before `StreamingResponse`; once the upstream head has been handed
//! to the client nothing else may be written.

use std::fmt;
use std::time::{Duration, Instant};

use axum::http::Method;

/// Why an exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Could not connect to, or talk to, the upstream. Carries an errno-style code.
    Unreachable(String),
    /// No traffic for the request timeout window before the response head.
    TimedOut,
    /// The inbound client went away or sent a broken body.
    ClientAborted,
    /// The upstream failed or stalled mid-response.
    UpstreamAborted,
}

impl FailureKind {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Unreachable(_) => "unreachable",
            FailureKind::TimedOut => "timeout",
            FailureKind::ClientAborted => "client_aborted",
            FailureKind::UpstreamAborted => "upstream_aborted",
        }
    }
}

/// Lifecycle phase of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Dialing,
    ForwardingRequest,
    AwaitingResponse,
    StreamingResponse,
    Done,
    Failed(FailureKind),
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    RequestForwarded,
    ResponseHead,
    ResponseComplete,
    Fault(FailureKind),
}

/// Error response owed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReply {
    /// 502 with the underlying error code.
    BadGateway { code: String },
    /// 504.
    GatewayTimeout,
}

/// The transition table.
///
/// Returns the next phase and, for faults raised before streaming began,
/// the error reply the client must receive.
pub fn transition(phase: Phase, event: Event) -> (Phase, Option<ErrorReply>) {
    use Event::*;
    use Phase::*;

    match (phase, event) {
        (Dialing, Connected) => (ForwardingRequest, None),
        (ForwardingRequest, RequestForwarded) => (AwaitingResponse, None),
        (ForwardingRequest | AwaitingResponse, ResponseHead) => (StreamingResponse, None),
        (StreamingResponse, ResponseComplete) => (Done, None),

        (Dialing | ForwardingRequest | AwaitingResponse, Fault(kind)) => {
            let reply = match &kind {
                FailureKind::Unreachable(code) => Some(ErrorReply::BadGateway { code: code.clone() }),
                FailureKind::UpstreamAborted => Some(ErrorReply::BadGateway {
                    code: "ECONNRESET".to_string(),
                }),
                FailureKind::TimedOut => Some(ErrorReply::GatewayTimeout),
                FailureKind::ClientAborted => None,
            };
            (Failed(kind), reply)
        }
        (StreamingResponse, Fault(kind)) => (Failed(kind), None),

        (terminal @ (Done | Failed(_)), _) => (terminal, None),

        (
            phase @ (Dialing | ForwardingRequest | AwaitingResponse | StreamingResponse),
            event @ (Connected | RequestForwarded | ResponseHead | ResponseComplete),
        ) => {
            tracing::warn!(phase = ?phase, event = ?event, "Ignoring out-of-order exchange event");
            (phase, None)
        }
    }
}

/// One in-flight request/response pair.
pub struct Exchange {
    id: String,
    method: Method,
    started: Instant,
    phase: Phase,
}

impl Exchange {
    pub fn begin(id: impl Into<String>, method: Method) -> Self {
        Self {
            id: id.into(),
            method,
            started: Instant::now(),
            phase: Phase::Dialing,
        }
    }

    /// Apply an event, returning the error reply it calls for, if any.
    pub fn advance(&mut self, event: Event) -> Option<ErrorReply> {
        let previous = std::mem::replace(&mut self.phase, Phase::Dialing);
        let (next, reply) = transition(previous, event);
        tracing::trace!(exchange = %self, next = ?next, "Exchange transition");
        self.phase = next;
        reply
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{:?}]", self.id, self.method, self.phase)
    }
}
