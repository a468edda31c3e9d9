//! Fixed-size worker pool over a bounded queue.
//!
//! `workers` tasks are spawned up front and each pulls the next item off a
//! shared queue until it is closed and empty, so at most `workers` items are
//! in progress at any moment. Every item runs in its own task and reports its
//! result as soon as it finishes, so a panic costs that one item only.
//!
//! Results come back in input order. `None` marks an item whose task panicked.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, workers: usize, work: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = workers.clamp(1, items.len());
    let total = items.len();

    let (queue_tx, queue_rx) = mpsc::channel::<(usize, T)>(workers);
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, R)>();
    let work = Arc::new(work);

    let mut set = JoinSet::new();
    for worker_id in 0..workers {
        let queue_rx = Arc::clone(&queue_rx);
        let result_tx = result_tx.clone();
        let work = Arc::clone(&work);
        set.spawn(async move {
            let mut processed = 0usize;
            loop {
                // Guard dropped before the item runs so other workers can pull
                let next = queue_rx.lock().await.recv().await;
                let Some((index, item)) = next else { break };
                processed += 1;

                match tokio::spawn(work(item)).await {
                    Ok(result) => {
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(worker = worker_id, item = index, error = %e, "Pool task panicked");
                    }
                }
            }
            tracing::trace!(worker = worker_id, processed = processed, "Worker drained");
        });
    }
    drop(result_tx);

    for (index, item) in items.into_iter().enumerate() {
        if queue_tx.send((index, item)).await.is_err() {
            // Every worker is gone; only possible if they all panicked
            tracing::error!("All crawl workers exited before the queue was drained");
            break;
        }
    }
    drop(queue_tx);

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    while let Some((index, result)) = result_rx.recv().await {
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(result);
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Crawl worker panicked");
        }
    }
    slots
}
