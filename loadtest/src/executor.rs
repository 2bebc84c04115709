//! Runs a fixed pool of virtual users against a [`Workload`] for a bounded duration.
//!
//! The executor moves through the states of [`ExecutorState`] exactly once:
//!
//! ```text
//! Idle -> Running -> Draining -> Finished
//! ```
//!
//! While *running*, every virtual user invokes the workload back-to-back without delay. Once the
//! configured duration has elapsed, the executor is *draining*: no virtual user starts a new
//! iteration, but iterations in flight run to completion. The executor is *finished* when every
//! virtual user has exited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::metrics::Collector;
use crate::random::RandomSource;

/// Lifecycle of an [`Executor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutorState {
    /// Created, but not started.
    Idle,
    /// Virtual users are starting iterations.
    Running,
    /// The duration has elapsed; in-flight iterations are finishing.
    Draining,
    /// Every virtual user has exited.
    Finished,
}

/// The execution context of a single virtual user.
///
/// Virtual users share nothing but the [`Collector`].
pub struct VirtualUser {
    /// Zero-based id, unique within a run.
    pub id: usize,
    /// Number of iterations this user has completed.
    pub iteration: u64,
    /// The collector shared by all virtual users of the run.
    pub collector: Arc<Collector>,
    /// This user's own random source.
    pub random: Box<dyn RandomSource>,
}

impl std::fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id)
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

/// The unit of work a virtual user repeats.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Runs a single iteration.
    ///
    /// Returning an error stops this virtual user. Other virtual users are not affected.
    async fn iterate(&self, vu: &mut VirtualUser) -> anyhow::Result<()>;
}

/// Runs a fixed number of virtual users until a deadline.
#[derive(Debug)]
pub struct Executor {
    vus: usize,
    duration: Duration,
    progress: bool,
    state: watch::Sender<ExecutorState>,
}

impl Executor {
    /// Creates an idle executor for `vus` virtual users running for `duration`.
    pub fn new(vus: usize, duration: Duration) -> Self {
        let (state, _) = watch::channel(ExecutorState::Idle);
        Self {
            vus,
            duration,
            progress: false,
            state,
        }
    }

    /// Shows a spinner with the elapsed time on stderr while the run is in progress.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Returns a receiver that observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state.subscribe()
    }

    /// The current state.
    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    fn transition(&self, state: ExecutorState) {
        tracing::info!(?state, vus = self.vus, "executor state changed");
        self.state.send_replace(state);
    }

    /// Runs the workload to completion and returns the elapsed wall-clock time.
    ///
    /// Virtual user `i` draws from the random source returned by `random(i)`.
    pub async fn run<W, R>(self, workload: Arc<W>, collector: Arc<Collector>, random: R) -> Duration
    where
        W: Workload,
        R: Fn(usize) -> Box<dyn RandomSource>,
    {
        let bar = self.progress_bar();

        let start = Instant::now();
        let deadline = start + self.duration;
        self.transition(ExecutorState::Running);

        let tasks: Vec<_> = (0..self.vus)
            .map(|id| {
                let vu = VirtualUser {
                    id,
                    iteration: 0,
                    collector: Arc::clone(&collector),
                    random: random(id),
                };
                tokio::spawn(run_virtual_user(Arc::clone(&workload), vu, deadline))
            })
            .collect();

        let finished_tasks = futures_util::future::join_all(tasks);
        tokio::pin!(finished_tasks);

        // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let results = tokio::select! {
            results = &mut finished_tasks => {
                tracing::warn!("all virtual users exited before the deadline");
                self.transition(ExecutorState::Draining);
                results
            }
            _ = &mut sleep => {
                self.transition(ExecutorState::Draining);
                if let Some(bar) = &bar {
                    bar.set_message("Waiting for in-flight iterations:");
                }
                finished_tasks.await
            }
        };

        for result in results {
            if let Err(error) = result {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "virtual user panicked"
                );
            }
        }

        let elapsed = start.elapsed();
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        self.transition(ExecutorState::Finished);

        elapsed
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }

        let style = ProgressStyle::with_template("{spinner} {msg} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner()
            .with_style(style)
            .with_message(format!("Running {} virtual users:", self.vus));
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(bar)
    }
}

async fn run_virtual_user<W: Workload>(workload: Arc<W>, mut vu: VirtualUser, deadline: Instant) {
    tracing::debug!(vu = vu.id, "virtual user started");

    while Instant::now() < deadline {
        let start = Instant::now();
        if let Err(error) = workload.iterate(&mut vu).await {
            let error = format!("{error:#}");
            tracing::error!(
                vu = vu.id,
                iteration = vu.iteration,
                error = %error,
                "virtual user stopped early"
            );
            return;
        }

        vu.iteration += 1;
        let elapsed = start.elapsed();
        vu.collector.add_counter("iterations", 1);
        vu.collector
            .observe("iteration_duration", elapsed.as_nanos() as f64 / 1_000_000.0);
    }

    tracing::debug!(vu = vu.id, iterations = vu.iteration, "virtual user finished");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::random::Sequence;

    use super::*;

    fn random(_id: usize) -> Box<dyn RandomSource> {
        Box::new(Sequence::new([0.5]))
    }

    /// Sleeps for a fixed time per iteration and records when each iteration started.
    struct Sleeper {
        pause: Duration,
        starts: Mutex<Vec<(usize, Instant)>>,
    }

    impl Sleeper {
        fn new(pause: Duration) -> Arc<Self> {
            Arc::new(Self {
                pause,
                starts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Workload for Sleeper {
        async fn iterate(&self, vu: &mut VirtualUser) -> anyhow::Result<()> {
            self.starts.lock().unwrap().push((vu.id, Instant::now()));
            tokio::time::sleep(self.pause).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_iteration_starts_after_deadline() {
        let workload = Sleeper::new(Duration::from_millis(50));
        let collector = Arc::new(Collector::new());
        let start = Instant::now();

        let executor = Executor::new(3, Duration::from_millis(200));
        let elapsed = executor
            .run(workload.clone(), collector.clone(), random)
            .await;
        assert!(elapsed >= Duration::from_millis(200));

        let starts = workload.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 12);
        for vu in 0..3 {
            assert_eq!(starts.iter().filter(|(id, _)| *id == vu).count(), 4);
        }
        let deadline = start + Duration::from_millis(200);
        assert!(starts.iter().all(|(_, started)| *started < deadline));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counters["iterations"], 12);
        assert_eq!(snapshot.trends["iteration_duration"].count(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_in_flight_iterations() {
        let workload = Sleeper::new(Duration::from_millis(300));
        let collector = Arc::new(Collector::new());

        let executor = Executor::new(2, Duration::from_millis(100));
        assert_eq!(executor.state(), ExecutorState::Idle);

        let mut receiver = executor.subscribe();
        let initial = *receiver.borrow_and_update();
        let observer = tokio::spawn({
            let collector = Arc::clone(&collector);
            async move {
                let mut seen = vec![initial];
                while receiver.changed().await.is_ok() {
                    let state = *receiver.borrow_and_update();
                    if state == ExecutorState::Draining {
                        // The iterations started before the deadline are still in flight.
                        assert!(!collector.snapshot().counters.contains_key("iterations"));
                    }
                    seen.push(state);
                    if state == ExecutorState::Finished {
                        break;
                    }
                }
                seen
            }
        });

        let elapsed = executor
            .run(workload.clone(), collector.clone(), random)
            .await;

        assert_eq!(
            observer.await.unwrap(),
            [
                ExecutorState::Idle,
                ExecutorState::Running,
                ExecutorState::Draining,
                ExecutorState::Finished,
            ]
        );
        assert!(elapsed >= Duration::from_millis(300));
        assert_eq!(workload.starts.lock().unwrap().len(), 2);
        assert_eq!(collector.snapshot().counters["iterations"], 2);
    }

    /// Fails on virtual user 0, panics on virtual user 1 and sleeps on all others.
    struct Flaky;

    #[async_trait]
    impl Workload for Flaky {
        async fn iterate(&self, vu: &mut VirtualUser) -> anyhow::Result<()> {
            match vu.id {
                0 => anyhow::bail!("target went away"),
                1 => panic!("virtual user bug"),
                _ => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_virtual_users_do_not_stop_others() {
        let collector = Arc::new(Collector::new());

        let executor = Executor::new(4, Duration::from_millis(100));
        let receiver = executor.subscribe();
        executor
            .run(Arc::new(Flaky), collector.clone(), random)
            .await;

        assert_eq!(*receiver.borrow(), ExecutorState::Finished);
        assert_eq!(collector.snapshot().counters["iterations"], 20);
    }
}
