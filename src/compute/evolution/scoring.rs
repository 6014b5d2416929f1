//! Scoring dispatch across the trust boundary to a caller-supplied scorer.
//!
//! Each pending individual is scored at most once. Calls run in parallel on a
//! rayon pool; with a timeout configured, each call runs on its own thread and
//! the dispatcher stops waiting once the timeout elapses. Errors, panics,
//! non-finite values and timeouts all become per-individual failures.
//!
//! A timed-out call cannot be interrupted: its thread stays alive until the
//! scorer returns. At most `max_stalled_calls` such threads (plus one per
//! worker) may be outstanding; past that, calls fail without spawning.

use std::collections::HashMap;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;

use crate::schema::{IndividualId, ScoreFailure, ScoringConfig};

/// Error returned by a scorer for a single molecule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScoringError {
    message: String,
}

impl ScoringError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Fitness function over canonical molecule text. Higher is better.
///
/// With a timeout configured, a call that overruns is abandoned but not
/// stopped, so `score` may still be running after [`Scorer::release`].
pub trait Scorer: Send + Sync {
    fn score(&self, text: &str) -> Result<f64, ScoringError>;

    /// Release external resources. Called once when a run is finalized.
    fn release(&self) {}
}

impl<F, E> Scorer for F
where
    F: Fn(&str) -> Result<f64, E> + Send + Sync,
    E: Display,
{
    fn score(&self, text: &str) -> Result<f64, ScoringError> {
        self(text).map_err(|e| ScoringError::new(e.to_string()))
    }
}

/// Outcomes and counters of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct ScoringReport {
    /// One outcome per dispatched individual.
    pub outcomes: Vec<(IndividualId, Result<f64, ScoreFailure>)>,
    /// Scorer invocations, cancelled ones excluded.
    pub calls: usize,
    /// Failed invocations.
    pub failures: usize,
    /// Individuals not scored because the run was cancelled.
    pub cancelled: usize,
    /// Individuals answered from the cache.
    pub cache_hits: usize,
}

/// Dispatches pending individuals to a scorer.
pub struct ScoringDispatcher<S> {
    scorer: Arc<S>,
    pool: Option<rayon::ThreadPool>,
    timeout: Option<Duration>,
    cache: Option<HashMap<String, f64>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl<S: Scorer + 'static> ScoringDispatcher<S> {
    /// Create a dispatcher. `parallel_workers == 0` uses rayon's global pool.
    pub fn new(scorer: Arc<S>, config: &ScoringConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = if config.parallel_workers > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.parallel_workers)
                    .thread_name(|i| format!("molevo-score-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        let workers = pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |p| p.current_num_threads());

        Ok(Self {
            scorer,
            pool,
            timeout: config.timeout_ms.map(Duration::from_millis),
            cache: config.cache_scores.then(HashMap::new),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: workers + config.max_stalled_calls,
        })
    }

    pub fn scorer(&self) -> &Arc<S> {
        &self.scorer
    }

    /// Timeout threads whose scorer call has not returned yet.
    pub fn calls_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of cached scores.
    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, HashMap::len)
    }

    /// Add a known score to the cache.
    pub fn remember(&mut self, text: &str, fitness: f64) {
        if let Some(cache) = &mut self.cache
            && fitness.is_finite()
        {
            cache.insert(text.to_string(), fitness);
        }
    }

    /// Score every `(id, text)` pair exactly once.
    ///
    /// `cancel` is checked before each call; once set, remaining individuals
    /// fail with [`ScoreFailure::Cancelled`] without reaching the scorer.
    pub fn dispatch(&mut self, pending: Vec<(IndividualId, String)>, cancel: &AtomicBool) -> ScoringReport {
        let mut report = ScoringReport::default();
        let mut to_call = Vec::with_capacity(pending.len());

        for (id, text) in pending {
            match self.cache.as_ref().and_then(|c| c.get(&text)) {
                Some(&fitness) => {
                    report.cache_hits += 1;
                    report.outcomes.push((id, Ok(fitness)));
                }
                None => to_call.push((id, text)),
            }
        }

        let results: Vec<(IndividualId, String, Result<f64, ScoreFailure>)> = {
            let this = &*self;
            let run = || {
                to_call
                    .into_par_iter()
                    .map(|(id, text)| {
                        let outcome = this.call(&text, cancel);
                        (id, text, outcome)
                    })
                    .collect()
            };
            match &this.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        };

        for (id, text, outcome) in results {
            match &outcome {
                Ok(fitness) => {
                    report.calls += 1;
                    self.remember(&text, *fitness);
                }
                Err(ScoreFailure::Cancelled) => report.cancelled += 1,
                Err(failure) => {
                    report.calls += 1;
                    report.failures += 1;
                    log::debug!("Scoring {id} ({text}) failed: {failure:?}");
                }
            }
            report.outcomes.push((id, outcome));
        }

        report
    }

    fn call(&self, text: &str, cancel: &AtomicBool) -> Result<f64, ScoreFailure> {
        if cancel.load(Ordering::Relaxed) {
            return Err(ScoreFailure::Cancelled);
        }
        let value = match self.timeout {
            Some(timeout) => self.call_with_timeout(text, timeout),
            None => call_guarded(&*self.scorer, text),
        }?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ScoreFailure::NotFinite)
        }
    }

    /// Run the call on a detached thread. A late answer is dropped.
    fn call_with_timeout(&self, text: &str, timeout: Duration) -> Result<f64, ScoreFailure> {
        let outstanding = self.in_flight.load(Ordering::SeqCst);
        if outstanding >= self.max_in_flight {
            return Err(ScoreFailure::Error {
                message: format!("{outstanding} scoring calls still running after timing out"),
            });
        }

        let (tx, rx) = mpsc::channel();
        let scorer = Arc::clone(&self.scorer);
        let in_flight = Arc::clone(&self.in_flight);
        let text = text.to_string();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new()
            .name("molevo-score-call".to_string())
            .spawn(move || {
                let outcome = call_guarded(&*scorer, &text);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(outcome);
            })
            .map_err(|e| {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                ScoreFailure::Error {
                    message: format!("failed to spawn scoring thread: {e}"),
                }
            })?;

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ScoreFailure::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ScoreFailure::Panicked),
        }
    }
}

fn call_guarded<S: Scorer + ?Sized>(scorer: &S, text: &str) -> Result<f64, ScoreFailure> {
    match catch_unwind(AssertUnwindSafe(|| scorer.score(text))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ScoreFailure::Error {
            message: e.to_string(),
        }),
        Err(_) => Err(ScoreFailure::Panicked),
    }
}
