//! Bounded concurrency for upload tasks

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::{AttachmentError, AttachmentResult};

/// Runs futures on spawned tasks, at most `limit` at a time
///
/// A throttle is created per operation so a changed limit applies to the
/// next operation only.
#[derive(Debug, Clone)]
pub struct Throttle {
    semaphore: Option<Arc<Semaphore>>,
}

impl Throttle {
    /// `None` leaves the number of simultaneous tasks unbounded
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            semaphore: limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Run every future to completion and return the outputs in input order
    ///
    /// Nothing is cancelled when one task fails or panics. A panicked task
    /// yields `AttachmentError::Internal` in its position.
    pub async fn run_all<F, T>(&self, futures: Vec<F>) -> Vec<AttachmentResult<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = futures
            .into_iter()
            .map(|future| {
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => Some(
                            semaphore
                                .acquire_owned()
                                .await
                                .map_err(|e| AttachmentError::Internal(e.to_string()))?,
                        ),
                        None => None,
                    };
                    Ok::<T, AttachmentError>(future.await)
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => Err(AttachmentError::Internal(format!("upload task failed: {}", e))),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tracked(
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        value: usize,
    ) -> impl Future<Output = usize> + Send + 'static {
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            value
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_bounds_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..5)
            .map(|i| tracked(running.clone(), peak.clone(), i))
            .collect();

        let start = tokio::time::Instant::now();
        let results = Throttle::new(Some(2)).run_all(futures).await;

        let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let futures: Vec<_> = (0..4)
            .map(|i| tracked(running.clone(), peak.clone(), i))
            .collect();

        let start = tokio::time::Instant::now();
        Throttle::new(None).run_all(futures).await;

        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_panic_is_reported_without_cancelling_siblings() {
        let done = Arc::new(AtomicUsize::new(0));
        let seen = done.clone();

        let futures: Vec<std::pin::Pin<Box<dyn Future<Output = ()> + Send>>> = vec![
            Box::pin(async { panic!("processor exploded") }),
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        ];

        let results = Throttle::new(Some(1)).run_all(futures).await;

        assert!(matches!(results[0], Err(AttachmentError::Internal(_))));
        assert!(results[1].is_ok());
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
