//! Requests awaiting a backend answer.
//!
//! Backend responses carry no request id. Responses of one kind arrive in the
//! order the commands were sent, so each kind keeps a FIFO queue and an event
//! resolves the oldest request of its kind.
//!
//! A superseded request is answered immediately, but its command was already
//! sent and the hardware will still acknowledge it. Those acknowledgments are
//! counted per kind and consumed without touching the configuration.
//!
//! A timed-out request may still be answered. For kinds with a target value
//! an event only resolves a request carrying the same target. For the other
//! kinds one late answer per expired request is consumed as stale, for as
//! long again as the request was allowed to wait.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use fmradio_protocol::{MuteState, RequestKind, TunerError};

use super::controller::ControllerStatus;

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Frequency(u32),
    Seek { frequency: u32, found: bool },
    Stations(Vec<u32>),
    Mute(MuteState),
    Stereo(bool),
    Rssi(i32),
    Status(Box<ControllerStatus>),
}

pub(crate) type Reply = oneshot::Sender<Result<Outcome, TunerError>>;

/// A dispatched command waiting for its event.
#[derive(Debug)]
pub struct PendingRequest {
    pub kind: RequestKind,
    /// Value the answering event is expected to carry, if any.
    pub target: Option<u32>,
    pub issued_at: Instant,
    pub deadline: Instant,
    reply: Option<Reply>,
}

impl PendingRequest {
    pub(crate) fn new(
        kind: RequestKind,
        target: Option<u32>,
        reply: Option<Reply>,
        timeout: Duration,
    ) -> Self {
        let issued_at = Instant::now();
        Self {
            kind,
            target,
            issued_at,
            deadline: issued_at + timeout,
            reply,
        }
    }

    /// Deliver the result. The caller may have stopped waiting.
    pub fn resolve(mut self, result: Result<Outcome, TunerError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

/// Result of matching an event against the pending table.
#[derive(Debug)]
pub enum Claim {
    Matched(PendingRequest),
    /// Acknowledgment of a superseded command.
    Stale,
    /// No request of this kind is pending.
    Unsolicited,
}

/// Per-kind FIFO queues of pending requests.
#[derive(Debug, Default)]
pub struct PendingTable {
    queues: HashMap<RequestKind, VecDeque<PendingRequest>>,
    stale: HashMap<RequestKind, usize>,
    /// Expired requests whose answers are still expected, by forget time.
    late: HashMap<RequestKind, VecDeque<Instant>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: PendingRequest) {
        self.queues.entry(request.kind).or_default().push_back(request);
    }

    pub fn contains(&self, kind: RequestKind) -> bool {
        self.queues.get(&kind).is_some_and(|q| !q.is_empty())
    }

    pub fn count(&self, kind: RequestKind) -> usize {
        self.queues.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding acknowledgments of superseded commands.
    pub fn stale_count(&self, kind: RequestKind) -> usize {
        self.stale.get(&kind).copied().unwrap_or(0)
    }

    /// Answer every pending request of `kind` with `Superseded`.
    ///
    /// Returns the number of superseded requests.
    pub fn supersede(&mut self, kind: RequestKind) -> usize {
        let superseded: Vec<_> = match self.queues.get_mut(&kind) {
            Some(queue) => queue.drain(..).collect(),
            None => return 0,
        };
        let count = superseded.len();
        for request in superseded {
            request.resolve(Err(TunerError::Superseded));
        }
        *self.stale.entry(kind).or_default() += count;
        count
    }

    /// Late answers still expected for expired requests of `kind`.
    pub fn late_count(&self, kind: RequestKind) -> usize {
        self.late.get(&kind).map_or(0, VecDeque::len)
    }

    /// Match an event of `kind` carrying `value` to a pending request.
    ///
    /// While superseded acknowledgments are outstanding, only an event carrying
    /// the newest request's target resolves it; anything else is stale. An
    /// event whose value differs from the oldest request's target never
    /// resolves it.
    pub fn claim(&mut self, kind: RequestKind, value: Option<u32>) -> Claim {
        if let Some(late) = self.late.get_mut(&kind) {
            let now = Instant::now();
            late.retain(|forget_at| *forget_at > now);
            if late.pop_front().is_some() {
                return Claim::Stale;
            }
        }

        let stale = self.stale_count(kind);
        let queue = self.queues.entry(kind).or_default();

        if stale > 0 {
            let matches_newest = match (queue.front(), value) {
                (Some(request), Some(value)) => request.target == Some(value),
                _ => false,
            };
            if matches_newest {
                self.stale.remove(&kind);
                return queue.pop_front().map_or(Claim::Unsolicited, Claim::Matched);
            }
            self.stale.insert(kind, stale - 1);
            return Claim::Stale;
        }

        let mismatched = match (queue.front(), value) {
            (Some(request), Some(value)) => request.target.is_some_and(|t| t != value),
            _ => false,
        };
        if mismatched {
            return Claim::Unsolicited;
        }
        queue.pop_front().map_or(Claim::Unsolicited, Claim::Matched)
    }

    /// Remove the oldest pending request of any kind.
    pub fn take_oldest(&mut self) -> Option<PendingRequest> {
        let kind = self
            .queues
            .iter()
            .filter_map(|(kind, queue)| queue.front().map(|r| (*kind, r.issued_at)))
            .min_by_key(|(_, issued_at)| *issued_at)
            .map(|(kind, _)| kind)?;
        self.queues.get_mut(&kind)?.pop_front()
    }

    /// Earliest deadline among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queues
            .values()
            .flat_map(|queue| queue.iter().map(|r| r.deadline))
            .min()
    }

    /// Remove every request whose deadline is at or before `now`.
    ///
    /// Expired requests without a target leave a late answer to be consumed.
    /// Power requests are excluded; their state is settled on expiry.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            for request in queue.drain(..) {
                if request.deadline <= now {
                    let power = matches!(request.kind, RequestKind::Enable | RequestKind::Disable);
                    if request.target.is_none() && !power {
                        let window = request.deadline - request.issued_at;
                        self.late
                            .entry(request.kind)
                            .or_default()
                            .push_back(now + window);
                    }
                    expired.push(request);
                } else {
                    kept.push_back(request);
                }
            }
            *queue = kept;
        }
        expired.sort_by_key(|r| r.issued_at);
        expired
    }

    /// Remove every pending request and forget stale acknowledgments.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.stale.clear();
        self.late.clear();
        let mut all: Vec<_> = self
            .queues
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect();
        all.sort_by_key(|r| r.issued_at);
        all
    }
}

/// Resolves once with the typed result of a dispatched request.
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion<T> {
    receiver: oneshot::Receiver<Result<Outcome, TunerError>>,
    extract: fn(Outcome) -> Option<T>,
}

impl<T> Completion<T> {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<Outcome, TunerError>>,
        extract: fn(Outcome) -> Option<T>,
    ) -> Self {
        Self { receiver, extract }
    }

    /// A completion that is already resolved.
    pub(crate) fn resolved(
        result: Result<Outcome, TunerError>,
        extract: fn(Outcome) -> Option<T>,
    ) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self::new(receiver, extract)
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, TunerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(Ok(outcome))) => Poll::Ready(
                (this.extract)(outcome)
                    .ok_or_else(|| TunerError::Internal("unexpected outcome".to_string())),
            ),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            // The controller loop is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(TunerError::Dead)),
            Poll::Pending => Poll::Pending,
        }
    }
}
