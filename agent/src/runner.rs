// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded-frequency runner: serializes invocations of one body function,
//! coalescing bursts of requests, rate limiting to `burst` runs per
//! `min_interval`, and guaranteeing a run at least every `max_interval`.

use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct BoundedFrequencyRunner {
    name: &'static str,
    min_interval: Duration,
    max_interval: Duration,
    burst: u32,
    notify: Notify,
}

impl BoundedFrequencyRunner {
    #[must_use]
    pub fn new(name: &'static str, min_interval: Duration, max_interval: Duration, burst: u32) -> Self {
        Self {
            name,
            min_interval,
            max_interval,
            burst,
            notify: Notify::new(),
        }
    }

    /// Requests a run. Requests arriving while a run is pending or in
    /// flight coalesce into one.
    pub fn request(&self) {
        trace!(runner = self.name, "run requested");
        self.notify.notify_one();
    }

    /// Drives `body` until cancellation. At most one invocation is in
    /// flight at a time.
    pub async fn run_loop<F, Fut>(&self, cancel: &CancellationToken, mut body: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut tokens = f64::from(self.burst);
        let mut last_refill = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.max_interval) => {
                    trace!(runner = self.name, "max interval elapsed");
                }
            }

            if !self.min_interval.is_zero() {
                let refill =
                    last_refill.elapsed().as_secs_f64() / self.min_interval.as_secs_f64();
                tokens = (tokens + refill).min(f64::from(self.burst));
                last_refill = Instant::now();
                if tokens < 1.0 {
                    let wait = self.min_interval.mul_f64(1.0 - tokens);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(wait) => {}
                    }
                    tokens = 1.0;
                    last_refill = Instant::now();
                }
                tokens -= 1.0;
            }

            body().await;
        }
        trace!(runner = self.name, "run loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_body(counter: Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<()> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requested_runs_execute() {
        let runner = Arc::new(BoundedFrequencyRunner::new(
            "test",
            Duration::ZERO,
            Duration::from_secs(3600),
            2,
        ));
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let loop_handle = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            let body = counter_body(counter.clone());
            tokio::spawn(async move { runner.run_loop(&cancel, body).await })
        };

        runner.request();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        cancel.cancel();
        loop_handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn max_interval_guarantees_progress() {
        let runner = Arc::new(BoundedFrequencyRunner::new(
            "test",
            Duration::ZERO,
            Duration::from_secs(30),
            2,
        ));
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let loop_handle = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            let body = counter_body(counter.clone());
            tokio::spawn(async move { runner.run_loop(&cancel, body).await })
        };

        // no requests at all: the timer alone must fire runs
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(counter.load(Ordering::SeqCst) >= 3);

        cancel.cancel();
        loop_handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_limits_the_rate() {
        let runner = Arc::new(BoundedFrequencyRunner::new(
            "test",
            Duration::from_secs(10),
            Duration::from_secs(3600),
            1,
        ));
        let cancel = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let loop_handle = {
            let runner = runner.clone();
            let cancel = cancel.clone();
            let body = counter_body(counter.clone());
            tokio::spawn(async move { runner.run_loop(&cancel, body).await })
        };

        runner.request();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // an immediate second request must wait out the min interval
        runner.request();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        cancel.cancel();
        loop_handle.await.unwrap();
    }
}
