use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::TraineeDirectory;
use crate::error::{Result, TrackerError};
use crate::extract::Orchestrator;
use crate::models::ExtractionReport;

/// A trigger that fires while a run is in progress is dropped, never queued.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    orchestrator: Orchestrator,
    directory: Arc<dyn TraineeDirectory>,
    interval: Duration,
    running: watch::Sender<bool>,
    run_cancel: CancellationToken,
    timer: Mutex<Option<Timer>>,
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Holds the single-flight flag for the duration of one run.
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.send_replace(false);
    }
}

impl Scheduler {
    pub fn new(
        orchestrator: Orchestrator,
        directory: Arc<dyn TraineeDirectory>,
        interval: Duration,
    ) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                directory,
                interval,
                running,
                run_cancel: CancellationToken::new(),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.run_cancel.is_cancelled()
    }

    pub fn start(&self) {
        if self.is_shut_down() {
            warn!("extraction scheduler was shut down, not starting");
            return;
        }

        let mut timer = lock_timer(&self.inner);
        if timer.is_some() {
            debug!("extraction scheduler already started");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(timer_loop(self.inner.clone(), cancel.clone()));
        *timer = Some(Timer { cancel, handle });
        info!(interval_secs = self.inner.interval.as_secs(), "extraction scheduler started");
    }

    pub async fn stop(&self) {
        let timer = lock_timer(&self.inner).take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
            if let Err(err) = timer.handle.await {
                error!(error = %err, "scheduler timer task failed to join");
            }
        }

        let mut running = self.inner.running.subscribe();
        if self.is_running() {
            info!("waiting for in-flight extraction to finish");
        }
        let _ = running.wait_for(|running| !*running).await;
        info!("extraction scheduler stopped");
    }

    /// Cancels the current run and refuses any later one.
    pub async fn shutdown(&self) {
        self.inner.run_cancel.cancel();
        self.stop().await;
    }

    /// `Ok(None)` when a run is already in progress. The run is spawned, so
    /// dropping the returned future does not abort it.
    pub async fn trigger_now(&self) -> Result<Option<ExtractionReport>> {
        if self.is_shut_down() {
            return Err(TrackerError::Task("extraction scheduler has been shut down".to_string()));
        }
        let Some(guard) = try_begin(&self.inner) else {
            warn!("extraction already running, manual trigger skipped");
            return Ok(None);
        };

        let handle = tokio::spawn(execute(self.inner.clone(), guard));
        let report = handle
            .await
            .map_err(|err| TrackerError::Task(err.to_string()))??;
        Ok(Some(report))
    }
}

fn lock_timer(inner: &Inner) -> MutexGuard<'_, Option<Timer>> {
    match inner.timer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn try_begin(inner: &Arc<Inner>) -> Option<RunGuard> {
    let acquired = inner.running.send_if_modified(|running| {
        if *running {
            false
        } else {
            *running = true;
            true
        }
    });

    acquired.then(|| RunGuard {
        inner: inner.clone(),
    })
}

async fn execute(inner: Arc<Inner>, guard: RunGuard) -> Result<ExtractionReport> {
    let _guard = guard;
    let trainees = inner.directory.list_trainees().await?;
    Ok(inner
        .orchestrator
        .run_extraction(&trainees, &inner.run_cancel)
        .await)
}

async fn timer_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + inner.interval, inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => fire(&inner),
            _ = cancel.cancelled() => {
                debug!("extraction timer cancelled");
                break;
            }
        }
    }
}

fn fire(inner: &Arc<Inner>) {
    if inner.run_cancel.is_cancelled() {
        return;
    }
    let Some(guard) = try_begin(inner) else {
        warn!("previous extraction still running, skipping scheduled trigger");
        return;
    };

    let inner = inner.clone();
    tokio::spawn(async move {
        match execute(inner, guard).await {
            Ok(report) if !report.is_complete_success() => warn!(
                run_id = %report.run_id,
                failed = report.failed(),
                skipped = report.skipped(),
                "scheduled extraction finished with failures"
            ),
            Ok(_) => {}
            Err(err) => error!(error = %err, "scheduled extraction could not start"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::db::memory::{trainee, MemoryStore};
    use crate::metrics::fakes::{FakeContributions, FakeSkills};

    const HOUR: Duration = Duration::from_secs(3600);

    fn scheduler(store: Arc<MemoryStore>, skills: Arc<FakeSkills>, max_concurrency: usize) -> Scheduler {
        let orchestrator = Orchestrator::new(
            skills,
            Arc::new(FakeContributions::default()),
            store.clone(),
            max_concurrency,
        );
        Scheduler::new(orchestrator, store, HOUR)
    }

    fn gated() -> (Arc<FakeSkills>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let skills = FakeSkills {
            gate: Some(gate.clone()),
            ..FakeSkills::default()
        };
        (Arc::new(skills), gate)
    }

    async fn wait_until_running(scheduler: &Scheduler) {
        while !scheduler.is_running() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let store = Arc::new(MemoryStore::with_trainees(vec![trainee(1, "alice")]));
        let scheduler = scheduler(store.clone(), Arc::new(FakeSkills::default()), 2);

        scheduler.start();
        tokio::time::sleep(HOUR * 2 + Duration::from_secs(1)).await;
        scheduler.stop().await;

        assert_eq!(store.count_for(1), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_triggers_are_skipped() {
        let store = Arc::new(MemoryStore::with_trainees(vec![trainee(1, "alice")]));
        let (skills, gate) = gated();
        let scheduler = scheduler(store.clone(), skills, 2);

        scheduler.start();
        tokio::time::sleep(HOUR * 3 + Duration::from_secs(1)).await;
        assert!(scheduler.is_running());

        gate.add_permits(10);
        scheduler.stop().await;

        assert_eq!(store.count_for(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_in_flight_run_finish() {
        let store = Arc::new(MemoryStore::with_trainees(vec![trainee(1, "alice")]));
        let (skills, gate) = gated();
        let scheduler = scheduler(store.clone(), skills, 2);

        scheduler.start();
        tokio::time::sleep(HOUR + Duration::from_secs(1)).await;
        assert!(scheduler.is_running());

        let stopper = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.stop().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!stopper.is_finished());

        gate.add_permits(1);
        stopper.await.unwrap();

        assert!(!scheduler.is_running());
        assert_eq!(store.count_for(1), 1);
    }

    #[tokio::test]
    async fn manual_trigger_is_single_flight() {
        let store = Arc::new(MemoryStore::with_trainees(vec![trainee(1, "alice")]));
        let (skills, gate) = gated();
        let scheduler = scheduler(store.clone(), skills, 2);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger_now().await }
        });
        wait_until_running(&scheduler).await;

        let second = scheduler.trigger_now().await.unwrap();
        assert!(second.is_none());

        gate.add_permits(1);
        let report = first.await.unwrap().unwrap().unwrap();
        assert_eq!(report.succeeded(), 1);
        assert!(!scheduler.is_running());
        assert_eq!(store.count_for(1), 1);
    }

    #[tokio::test]
    async fn shutdown_skips_units_not_yet_started() {
        let store = Arc::new(MemoryStore::with_trainees(vec![
            trainee(1, "alice"),
            trainee(2, "bob"),
        ]));
        let (skills, gate) = gated();
        let scheduler = scheduler(store.clone(), skills.clone(), 1);

        let run = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger_now().await }
        });
        while skills.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let shutdown = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.shutdown().await }
        });
        while !scheduler.inner.run_cancel.is_cancelled() {
            tokio::task::yield_now().await;
        }
        gate.add_permits(10);

        let report = run.await.unwrap().unwrap().unwrap();
        shutdown.await.unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(store.snapshots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_final() {
        let store = Arc::new(MemoryStore::with_trainees(vec![trainee(1, "alice")]));
        let scheduler = scheduler(store.clone(), Arc::new(FakeSkills::default()), 2);

        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());

        let err = scheduler.trigger_now().await.unwrap_err();
        assert!(matches!(err, TrackerError::Task(_)));

        scheduler.start();
        tokio::time::sleep(HOUR * 2 + Duration::from_secs(1)).await;
        assert!(store.snapshots().is_empty());
    }
}
