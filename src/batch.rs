use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

#[derive(Debug, Clone, thiserror::Error)]
pub enum UnitError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("unit panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub index: usize,
    pub total_batches: usize,
    pub size: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Progress events. The scheduler never writes to stdout itself.
pub trait BatchObserver: Send + Sync {
    fn batch_started(&self, index: usize, total_batches: usize, labels: &[String]);
    fn batch_completed(&self, stats: &BatchStats);
    fn unit_failed(&self, label: &str, error: &UnitError);
}

/// Receives every finished batch before the next one starts. An error stops the run.
#[async_trait]
pub trait BatchSink<T: Send, R: Send>: Send {
    async fn commit(&mut self, batch: Vec<(T, Result<R, UnitError>)>) -> anyhow::Result<()>;
}

pub fn batch_count(items: usize, batch_size: usize) -> usize {
    items.div_ceil(batch_size.max(1))
}

pub struct BatchScheduler {
    batch_size: usize,
    unit_timeout: Duration,
    pause: Duration,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, unit_timeout: Duration) -> Self {
        BatchScheduler {
            batch_size: batch_size.max(1),
            unit_timeout,
            pause: Duration::ZERO,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Wait between batches.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Runs `unit` over `items` in fixed-size batches. Units within a batch run as
    /// separate tasks; batch n+1 starts only after batch n has been committed.
    /// A failing, panicking or stalled unit is reported as an `Err` for that item only.
    pub async fn run<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        unit: F,
        sink: &mut dyn BatchSink<T, R>,
        observer: &dyn BatchObserver,
    ) -> anyhow::Result<Vec<BatchStats>>
    where
        T: Display + Clone + Send + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let total_batches = batch_count(items.len(), self.batch_size);
        let mut all_stats = Vec::with_capacity(total_batches);

        for (index, chunk) in items.chunks(self.batch_size).enumerate() {
            let labels: Vec<String> = chunk.iter().map(ToString::to_string).collect();
            observer.batch_started(index, total_batches, &labels);
            let started = Instant::now();

            let timeout = self.unit_timeout;
            let handles: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|item| {
                    let fut = unit(item.clone());
                    let handle = tokio::spawn(async move {
                        match tokio::time::timeout(timeout, fut).await {
                            Ok(Ok(r)) => Ok(r),
                            Ok(Err(e)) => Err(UnitError::Failed(e.to_string())),
                            Err(_) => Err(UnitError::TimedOut(timeout)),
                        }
                    });
                    (item, handle)
                })
                .collect();

            let mut outcomes = Vec::with_capacity(handles.len());
            for (item, handle) in handles {
                let result = match handle.await {
                    Ok(r) => r,
                    Err(e) => Err(UnitError::Panicked(panic_message(e))),
                };
                if let Err(e) = &result {
                    observer.unit_failed(&item.to_string(), e);
                }
                outcomes.push((item, result));
            }

            let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
            let stats = BatchStats {
                index,
                total_batches,
                size: outcomes.len(),
                succeeded: outcomes.len() - failed,
                failed,
                elapsed: started.elapsed(),
            };

            sink.commit(outcomes).await?;
            observer.batch_completed(&stats);
            all_stats.push(stats);

            if index + 1 < total_batches && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        Ok(all_stats)
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Progress bar over all units plus a log line per batch.
pub struct ProgressObserver {
    pb: ProgressBar,
}

impl ProgressObserver {
    pub fn new(total_units: usize) -> Self {
        let pb = ProgressBar::new(total_units as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} brands ({per_sec}, eta {eta}) {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        ProgressObserver { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl BatchObserver for ProgressObserver {
    fn batch_started(&self, index: usize, total_batches: usize, labels: &[String]) {
        info!(
            "Processing batch {} of {} ({} brands: {})",
            index + 1,
            total_batches,
            labels.len(),
            labels.join(", ")
        );
        self.pb.set_message(format!("batch {}/{}", index + 1, total_batches));
    }

    fn batch_completed(&self, stats: &BatchStats) {
        info!(
            "Completed batch {} in {:.2}s ({} ok, {} errors)",
            stats.index + 1,
            stats.elapsed.as_secs_f64(),
            stats.succeeded,
            stats.failed
        );
        self.pb.inc(stats.size as u64);
    }

    fn unit_failed(&self, label: &str, error: &UnitError) {
        warn!("Error processing {}: {}", label, error);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub started: Mutex<Vec<Vec<String>>>,
        pub completed: Mutex<Vec<BatchStats>>,
        pub failures: Mutex<Vec<String>>,
    }

    impl BatchObserver for RecordingObserver {
        fn batch_started(&self, _index: usize, _total: usize, labels: &[String]) {
            self.started.lock().unwrap().push(labels.to_vec());
        }

        fn batch_completed(&self, stats: &BatchStats) {
            self.completed.lock().unwrap().push(stats.clone());
        }

        fn unit_failed(&self, label: &str, _error: &UnitError) {
            self.failures.lock().unwrap().push(label.to_string());
        }
    }

    #[derive(Default)]
    struct CountingSink {
        commits: Vec<Vec<(u32, Result<u32, UnitError>)>>,
    }

    #[async_trait]
    impl BatchSink<u32, u32> for CountingSink {
        async fn commit(&mut self, batch: Vec<(u32, Result<u32, UnitError>)>) -> anyhow::Result<()> {
            self.commits.push(batch);
            Ok(())
        }
    }

    fn scheduler(batch_size: usize) -> BatchScheduler {
        BatchScheduler::new(batch_size, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn five_items_in_batches_of_two() {
        let mut sink = CountingSink::default();
        let observer = RecordingObserver::default();
        let stats = scheduler(2)
            .run(
                vec![1u32, 2, 3, 4, 5],
                |n| async move { Ok::<_, String>(n * 10) },
                &mut sink,
                &observer,
            )
            .await
            .unwrap();

        assert_eq!(stats.len(), 3);
        assert_eq!(sink.commits.len(), 3);
        let sizes: Vec<usize> = sink.commits.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(observer.started.lock().unwrap()[2], vec!["5".to_string()]);
        assert!(stats.iter().all(|s| s.total_batches == 3 && s.failed == 0));
        let values: Vec<u32> = sink
            .commits
            .into_iter()
            .flatten()
            .map(|(_, r)| r.unwrap())
            .collect();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
    }

    #[tokio::test]
    async fn failure_isolated_to_its_unit() {
        let mut sink = CountingSink::default();
        let observer = RecordingObserver::default();
        scheduler(3)
            .run(
                vec![1u32, 2, 3],
                |n| async move {
                    if n == 2 {
                        Err(format!("brand {n} failed"))
                    } else {
                        Ok(n)
                    }
                },
                &mut sink,
                &observer,
            )
            .await
            .unwrap();

        let batch = &sink.commits[0];
        assert_eq!(batch.len(), 3);
        assert!(batch[0].1.is_ok());
        assert!(matches!(&batch[1].1, Err(UnitError::Failed(m)) if m == "brand 2 failed"));
        assert!(batch[2].1.is_ok());
        assert_eq!(*observer.failures.lock().unwrap(), vec!["2".to_string()]);
        assert_eq!(observer.completed.lock().unwrap()[0].failed, 1);
    }

    #[tokio::test]
    async fn panic_and_timeout_are_unit_errors() {
        let mut sink = CountingSink::default();
        let observer = RecordingObserver::default();
        BatchScheduler::new(3, Duration::from_millis(50))
            .run(
                vec![1u32, 2, 3],
                |n| async move {
                    match n {
                        1 => panic!("boom"),
                        2 => {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok::<_, String>(n)
                        }
                        _ => Ok(n),
                    }
                },
                &mut sink,
                &observer,
            )
            .await
            .unwrap();

        let batch = &sink.commits[0];
        assert!(matches!(&batch[0].1, Err(UnitError::Panicked(m)) if m == "boom"));
        assert!(matches!(&batch[1].1, Err(UnitError::TimedOut(_))));
        assert_eq!(batch[2].1.as_ref().ok(), Some(&3));
    }

    #[tokio::test]
    async fn concurrency_bounded_by_batch_size() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut sink = CountingSink::default();
        let observer = RecordingObserver::default();

        scheduler(3)
            .run(
                (0u32..10).collect(),
                |n| {
                    let live = Arc::clone(&live);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        live.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(n)
                    }
                },
                &mut sink,
                &observer,
            )
            .await
            .unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(sink.commits.len(), 4);
    }

    struct FailingSink;

    #[async_trait]
    impl BatchSink<u32, u32> for FailingSink {
        async fn commit(&mut self, _batch: Vec<(u32, Result<u32, UnitError>)>) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn sink_error_stops_later_batches() {
        let observer = RecordingObserver::default();
        let result = scheduler(1)
            .run(
                vec![1u32, 2, 3],
                |n| async move { Ok::<_, String>(n) },
                &mut FailingSink,
                &observer,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(observer.started.lock().unwrap().len(), 1);
    }

    #[test]
    fn batch_counts() {
        assert_eq!(batch_count(5, 2), 3);
        assert_eq!(batch_count(4, 2), 2);
        assert_eq!(batch_count(0, 12), 0);
    }
}
