// src/ingest/fallback.rs
//! Walks a query plan against the upstream source, one deadline-bounded attempt at a time.

use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::ingest::planner::{QueryConfig, QuerySpec};
use crate::ingest::types::{Event, EventSource};
use crate::relevance::RelevanceFilter;

/// Per-attempt deadline, scaled with the window: broader scope costs more upstream time.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptBudget {
    /// `(max window minutes, deadline)`, ascending by window.
    tiers: Vec<(u32, Duration)>,
    ceiling: Duration,
}

impl Default for AttemptBudget {
    fn default() -> Self {
        Self {
            tiers: vec![
                (60, Duration::from_secs(25)),
                (120, Duration::from_secs(30)),
                (240, Duration::from_secs(35)),
                (480, Duration::from_secs(40)),
            ],
            ceiling: Duration::from_secs(45),
        }
    }
}

impl AttemptBudget {
    /// Same deadline for every window.
    pub fn uniform(deadline: Duration) -> Self {
        Self {
            tiers: Vec::new(),
            ceiling: deadline,
        }
    }

    pub fn with_tiers(mut tiers: Vec<(u32, Duration)>, ceiling: Duration) -> Self {
        tiers.sort_by_key(|(w, _)| *w);
        Self { tiers, ceiling }
    }

    pub fn for_window(&self, window_minutes: u32) -> Duration {
        self.tiers
            .iter()
            .find(|(max_window, _)| window_minutes <= *max_window)
            .map(|(_, d)| *d)
            .unwrap_or(self.ceiling)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Deadline hit; the in-flight call was dropped.
    TimedOut,
    /// Transport or decode error, treated as zero results.
    Failed(String),
    /// Call returned, but nothing passed the relevance filter.
    NoRelevant { raw: usize },
    /// At least one relevant event; iteration stops here.
    Relevant { raw: usize, relevant: usize },
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::TimedOut => "timeout",
            AttemptOutcome::Failed(_) => "error",
            AttemptOutcome::NoRelevant { .. } => "empty",
            AttemptOutcome::Relevant { .. } => "relevant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub spec: QuerySpec,
    pub deadline: Duration,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Every normalized event from the attempt that succeeded (relevant or not).
    pub events: Vec<Event>,
    /// True when the plan ran out without a relevant event. Not an error.
    pub exhausted: bool,
    pub attempts: Vec<AttemptReport>,
}

pub struct FallbackController {
    source: Arc<dyn EventSource>,
    query: QueryConfig,
    budget: AttemptBudget,
}

impl FallbackController {
    pub fn new(source: Arc<dyn EventSource>, query: QueryConfig) -> Self {
        Self {
            source,
            query,
            budget: AttemptBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: AttemptBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> &AttemptBudget {
        &self.budget
    }

    /// Try each plan entry in order until one yields a relevant event.
    ///
    /// Timeouts, errors and empty answers all advance to the next entry; a narrower
    /// window can succeed where a wider one returned nothing.
    pub async fn fetch(&self, plan: &[QuerySpec], filter: &RelevanceFilter) -> FetchOutcome {
        let mut attempts = Vec::with_capacity(plan.len());

        for (i, spec) in plan.iter().enumerate() {
            let request = self.query.request_for(spec);
            let deadline = self.budget.for_window(spec.window_minutes);
            info!(
                target: "fallback",
                attempt = i + 1,
                of = plan.len(),
                window_minutes = spec.window_minutes,
                strategy = %spec.strategy,
                keywords = %request.keywords,
                count = spec.count,
                deadline_s = deadline.as_secs_f64(),
                "querying {}",
                self.source.name()
            );

            let t0 = Instant::now();
            // Dropping the timed-out future cancels the call; no state outlives this scope.
            let result = tokio::time::timeout(deadline, self.source.search(&request)).await;
            let elapsed = t0.elapsed();

            let mut winners = None;
            let outcome = match result {
                Err(_) => {
                    warn!(
                        target: "fallback",
                        window_minutes = spec.window_minutes,
                        deadline_s = deadline.as_secs_f64(),
                        "attempt timed out, stepping down"
                    );
                    AttemptOutcome::TimedOut
                }
                Ok(Err(e)) => {
                    warn!(target: "fallback", error = ?e, "attempt failed, stepping down");
                    AttemptOutcome::Failed(format!("{e:#}"))
                }
                Ok(Ok(raw)) => {
                    let raw_len = raw.len();
                    let events: Vec<Event> = raw
                        .into_iter()
                        .filter_map(|r| Event::from_raw(r, &self.query.language))
                        .collect();
                    let relevant = events
                        .iter()
                        .filter(|ev| filter.evaluate(ev).is_candidate())
                        .count();
                    if relevant > 0 {
                        winners = Some(events);
                        AttemptOutcome::Relevant {
                            raw: raw_len,
                            relevant,
                        }
                    } else {
                        info!(
                            target: "fallback",
                            raw = raw_len,
                            window_minutes = spec.window_minutes,
                            "no relevant events, stepping down"
                        );
                        AttemptOutcome::NoRelevant { raw: raw_len }
                    }
                }
            };

            counter!("fallback_attempts_total", "outcome" => outcome.label()).increment(1);
            histogram!("fallback_attempt_ms").record(elapsed.as_secs_f64() * 1_000.0);
            attempts.push(AttemptReport {
                spec: *spec,
                deadline,
                elapsed,
                outcome,
            });

            if let Some(events) = winners {
                return FetchOutcome {
                    events,
                    exhausted: false,
                    attempts,
                };
            }
        }

        warn!(
            target: "fallback",
            attempts = attempts.len(),
            "all plan entries exhausted without relevant events"
        );
        FetchOutcome {
            events: Vec::new(),
            exhausted: true,
            attempts,
        }
    }
}
