//! Provider-fallback sequencer.
//!
//! Candidates are tried strictly one at a time, in list order. An attempt ends
//! on a success signal, a failure signal, or its timeout; anything other than
//! success advances the cursor. The run ends on the first success or when the
//! list is exhausted.
//!
//! ```text
//! Idle -> Attempting(i) -> Succeeded(i)
//!                       -> Attempting(i + 1)
//!                       -> Exhausted
//! (any non-terminal) -> Aborted
//! ```

use std::{future::Future, time::Duration};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// One source the sequencer may try. Priority is list position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCandidate {
    pub url: String,
    pub label: String,
}

impl SourceCandidate {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Idle,
    Attempting(usize),
    Succeeded(usize),
    Exhausted,
    Aborted,
}

impl SequenceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SequenceState::Succeeded(_) | SequenceState::Exhausted | SequenceState::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub index: usize,
    pub label: String,
    pub outcome: AttemptOutcome,
}

/// Terminal result of [`Sequencer::run`].
#[derive(Debug)]
pub enum SequenceOutcome<T> {
    Succeeded {
        index: usize,
        candidate: SourceCandidate,
        value: T,
    },
    Exhausted,
    Aborted,
}

impl<T> SequenceOutcome<T> {
    pub fn index(&self) -> Option<usize> {
        match self {
            SequenceOutcome::Succeeded { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Cursor over an ordered candidate list. Owns its state; nothing is shared
/// between runs.
#[derive(Debug, Clone)]
pub struct Sequencer {
    candidates: Vec<SourceCandidate>,
    attempt_timeout: Duration,
    state: SequenceState,
    attempts_started: usize,
    history: Vec<AttemptRecord>,
}

impl Sequencer {
    pub fn new(candidates: Vec<SourceCandidate>, attempt_timeout: Duration) -> Self {
        Self {
            candidates,
            attempt_timeout,
            state: SequenceState::Idle,
            attempts_started: 0,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Number of attempts activated so far.
    pub fn retry_count(&self) -> usize {
        self.attempts_started
    }

    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// The candidate currently being attempted, if any.
    pub fn current(&self) -> Option<&SourceCandidate> {
        match self.state {
            SequenceState::Attempting(i) => self.candidates.get(i),
            _ => None,
        }
    }

    /// Leaves `Idle`. An empty list goes straight to `Exhausted`.
    pub fn start(&mut self) -> SequenceState {
        if self.state == SequenceState::Idle {
            self.activate(0);
        }
        self.state
    }

    /// Success signal for attempt `index`. Stale or late signals are ignored.
    pub fn succeed(&mut self, index: usize) -> SequenceState {
        if self.state == SequenceState::Attempting(index) {
            self.record(index, AttemptOutcome::Succeeded);
            self.state = SequenceState::Succeeded(index);
        }
        self.state
    }

    /// Explicit failure signal for attempt `index`.
    pub fn fail(&mut self, index: usize, reason: impl Into<String>) -> SequenceState {
        if self.state == SequenceState::Attempting(index) {
            self.record(index, AttemptOutcome::Failed(reason.into()));
            self.activate(index + 1);
        }
        self.state
    }

    /// Timeout for attempt `index`.
    pub fn time_out(&mut self, index: usize) -> SequenceState {
        if self.state == SequenceState::Attempting(index) {
            self.record(index, AttemptOutcome::TimedOut);
            self.activate(index + 1);
        }
        self.state
    }

    pub fn abort(&mut self) -> SequenceState {
        if !self.state.is_terminal() {
            self.state = SequenceState::Aborted;
        }
        self.state
    }

    fn reset(&mut self) {
        self.state = SequenceState::Idle;
        self.attempts_started = 0;
        self.history.clear();
    }

    fn activate(&mut self, index: usize) {
        if index < self.candidates.len() {
            self.attempts_started += 1;
            self.state = SequenceState::Attempting(index);
        } else {
            self.state = SequenceState::Exhausted;
        }
    }

    fn record(&mut self, index: usize, outcome: AttemptOutcome) {
        let label = self.candidates[index].label.clone();
        self.history.push(AttemptRecord {
            index,
            label,
            outcome,
        });
    }

    /// Drives the sequence to a terminal state.
    ///
    /// Every run starts over from the first candidate with a fresh history.
    /// `attempt` is called once per activated candidate. `Ok` is the success
    /// signal, `Err` the failure signal; a future still pending after the
    /// attempt timeout counts as a timeout and is dropped. Cancelling
    /// `cancel` drops the in-flight attempt and ends the run as `Aborted`.
    pub async fn run<T, E, F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> SequenceOutcome<T>
    where
        F: FnMut(usize, &SourceCandidate) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.reset();
        self.start();
        loop {
            let index = match self.state {
                SequenceState::Attempting(i) => i,
                SequenceState::Aborted => return SequenceOutcome::Aborted,
                _ => {
                    tracing::warn!(
                        candidates = self.candidates.len(),
                        "all playback candidates failed"
                    );
                    return SequenceOutcome::Exhausted;
                }
            };

            let candidate = self.candidates[index].clone();
            tracing::debug!(index, label = %candidate.label, "trying candidate");
            let fut = attempt(index, &candidate);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = tokio::time::timeout(self.attempt_timeout, fut) => Some(res),
            };

            match result {
                None => {
                    self.abort();
                }
                Some(Ok(Ok(value))) => {
                    self.succeed(index);
                    tracing::debug!(index, label = %candidate.label, "candidate succeeded");
                    return SequenceOutcome::Succeeded {
                        index,
                        candidate,
                        value,
                    };
                }
                Some(Ok(Err(err))) => {
                    tracing::debug!(index, label = %candidate.label, error = %err, "candidate failed");
                    self.fail(index, err.to_string());
                }
                Some(Err(_elapsed)) => {
                    tracing::debug!(index, label = %candidate.label, "candidate timed out");
                    self.time_out(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, future::pending};
    use tokio::time::Instant;

    fn candidates(labels: &[&str]) -> Vec<SourceCandidate> {
        labels
            .iter()
            .map(|l| SourceCandidate::new(*l, format!("https://{l}.example/embed")))
            .collect()
    }

    #[test]
    fn empty_list_exhausts_without_attempt() {
        let mut seq = Sequencer::new(Vec::new(), Duration::from_secs(1));
        assert_eq!(seq.start(), SequenceState::Exhausted);
        assert_eq!(seq.retry_count(), 0);
        assert!(seq.history().is_empty());
    }

    #[test]
    fn failure_advances_and_success_is_terminal() {
        let mut seq = Sequencer::new(candidates(&["a", "b", "c"]), Duration::from_secs(1));
        assert_eq!(seq.start(), SequenceState::Attempting(0));
        assert_eq!(seq.fail(0, "boom"), SequenceState::Attempting(1));
        assert_eq!(seq.current().map(|c| c.label.as_str()), Some("b"));
        assert_eq!(seq.succeed(1), SequenceState::Succeeded(1));
        assert_eq!(seq.retry_count(), 2);
    }

    #[test]
    fn stale_and_late_signals_are_ignored() {
        let mut seq = Sequencer::new(candidates(&["a", "b"]), Duration::from_secs(1));
        seq.start();
        seq.time_out(0);
        // a late load event from the first candidate must not win
        assert_eq!(seq.succeed(0), SequenceState::Attempting(1));
        assert_eq!(seq.succeed(1), SequenceState::Succeeded(1));
        assert_eq!(seq.fail(1, "late"), SequenceState::Succeeded(1));
        assert_eq!(seq.abort(), SequenceState::Succeeded(1));
    }

    #[test]
    fn every_candidate_failing_exhausts() {
        let mut seq = Sequencer::new(candidates(&["a", "b"]), Duration::from_secs(1));
        seq.start();
        seq.fail(0, "x");
        assert_eq!(seq.time_out(1), SequenceState::Exhausted);
        let outcomes: Vec<_> = seq.history().iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![AttemptOutcome::Failed("x".into()), AttemptOutcome::TimedOut]
        );
    }

    #[test]
    fn abort_is_terminal() {
        let mut seq = Sequencer::new(candidates(&["a"]), Duration::from_secs(1));
        seq.start();
        assert_eq!(seq.abort(), SequenceState::Aborted);
        assert_eq!(seq.succeed(0), SequenceState::Aborted);
    }

    #[tokio::test]
    async fn fast_failure_then_success_ends_on_second() {
        let mut seq = Sequencer::new(candidates(&["A", "B"]), Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let outcome = seq
            .run(&cancel, |index, candidate| {
                let label = candidate.label.clone();
                async move {
                    if index == 0 {
                        Err(format!("{label} refused"))
                    } else {
                        Ok(label)
                    }
                }
            })
            .await;

        match outcome {
            SequenceOutcome::Succeeded {
                index,
                candidate,
                value,
            } => {
                assert_eq!(index, 1);
                assert_eq!(candidate.label, "B");
                assert_eq!(value, "B");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(seq.state(), SequenceState::Succeeded(1));
    }

    #[tokio::test]
    async fn visits_candidates_in_order_up_to_first_success() {
        for k in 0..5 {
            let visited = RefCell::new(Vec::new());
            let mut seq = Sequencer::new(
                candidates(&["c0", "c1", "c2", "c3", "c4"]),
                Duration::from_secs(1),
            );
            let outcome = seq
                .run(&CancellationToken::new(), |index, _| {
                    visited.borrow_mut().push(index);
                    async move { if index == k { Ok(()) } else { Err("no") } }
                })
                .await;
            assert_eq!(outcome.index(), Some(k));
            assert_eq!(*visited.borrow(), (0..=k).collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_timeouts_exhaust_after_n_times_timeout() {
        let timeout = Duration::from_millis(750);
        let mut seq = Sequencer::new(candidates(&["a", "b", "c", "d"]), timeout);
        let started = Instant::now();
        let outcome = seq
            .run(&CancellationToken::new(), |_, _| pending::<Result<(), String>>())
            .await;
        assert!(matches!(outcome, SequenceOutcome::Exhausted));
        assert_eq!(started.elapsed(), timeout * 4);
        assert!(
            seq.history()
                .iter()
                .all(|r| r.outcome == AttemptOutcome::TimedOut)
        );
    }

    #[tokio::test]
    async fn empty_run_makes_no_attempt() {
        let mut calls = 0;
        let mut seq = Sequencer::new(Vec::new(), Duration::from_secs(1));
        let outcome = seq
            .run(&CancellationToken::new(), |_, _| {
                calls += 1;
                async { Ok::<_, String>(()) }
            })
            .await;
        assert!(matches!(outcome, SequenceOutcome::Exhausted));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn rerun_after_success_starts_over() {
        let mut seq = Sequencer::new(candidates(&["a", "b"]), Duration::from_secs(1));
        let first = seq
            .run(&CancellationToken::new(), |index, _| async move {
                if index == 1 { Ok(index) } else { Err("down") }
            })
            .await;
        assert_eq!(first.index(), Some(1));

        let second = seq
            .run(&CancellationToken::new(), |index, _| async move {
                Ok::<_, String>(index)
            })
            .await;
        assert_eq!(second.index(), Some(0));
        assert_eq!(seq.retry_count(), 1);
        assert_eq!(seq.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_attempt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let mut seq = Sequencer::new(candidates(&["a", "b"]), Duration::from_secs(10));
        let outcome = seq
            .run(&cancel, |_, _| pending::<Result<(), String>>())
            .await;
        assert!(matches!(outcome, SequenceOutcome::Aborted));
        assert_eq!(seq.state(), SequenceState::Aborted);
        assert_eq!(seq.retry_count(), 1);
    }
}
