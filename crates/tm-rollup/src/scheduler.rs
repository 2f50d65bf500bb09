//! Recurring-job scheduler.
//!
//! Refresh and lifecycle work is modeled as explicit scheduled tasks, one
//! thread per job, each with its own cadence. A failing run is logged,
//! counted, and abandoned; the job simply runs again on its next tick
//! (refresh commits all-or-nothing, so an abandoned run leaves no partial
//! state behind).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// How often a sleeping job re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Per-job counters.
#[derive(Debug, Default)]
pub struct JobStats {
    pub runs: AtomicU64,
    pub failures: AtomicU64,
}

/// Thread-per-job scheduler for recurring pipeline work.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    jobs: Vec<(String, Arc<JobStats>, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            jobs: Vec::new(),
        }
    }

    /// Register a job: it runs immediately, then once per interval until
    /// shutdown. Returns the job's counters.
    pub fn spawn_job<F>(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        mut task: F,
    ) -> std::io::Result<Arc<JobStats>>
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        let name = name.into();
        let stats = Arc::new(JobStats::default());
        let shutdown = self.shutdown.clone();

        let job_name = name.clone();
        let job_stats = stats.clone();
        let handle = thread::Builder::new()
            .name(format!("tm-job-{name}"))
            .spawn(move || {
                info!(job = %job_name, interval_s = interval.as_secs(), "job scheduled");
                loop {
                    let started = Instant::now();
                    job_stats.runs.fetch_add(1, Ordering::Relaxed);
                    match task() {
                        Ok(()) => {
                            debug!(
                                job = %job_name,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "job run complete"
                            );
                        }
                        Err(err) => {
                            // Abandon the run; next tick retries.
                            job_stats.failures.fetch_add(1, Ordering::Relaxed);
                            error!(job = %job_name, error = %err, "job run failed");
                        }
                    }

                    let next = started + interval;
                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            return;
                        }
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::sleep(SHUTDOWN_POLL.min(next - now));
                    }
                }
            })?;

        self.jobs.push((name, stats.clone(), handle));
        Ok(stats)
    }

    /// Job names and counters, for status output.
    pub fn stats(&self) -> Vec<(String, u64, u64)> {
        self.jobs
            .iter()
            .map(|(name, stats, _)| {
                (
                    name.clone(),
                    stats.runs.load(Ordering::Relaxed),
                    stats.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }

    /// Stop all jobs and join their threads. In-progress runs complete.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for (name, _, handle) in self.jobs {
            if handle.join().is_err() {
                error!(job = %name, "job thread panicked");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
