use std::collections::VecDeque;
use std::future::Future;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};

/// Runs `work` over `items` with at most `limit` tasks in flight.
///
/// A fixed set of workers each pull the next pending item from a shared
/// queue until it is empty. After every finished task `(completed, total)`
/// is sent on `progress`; sends are serialized so the counts a receiver sees
/// never go backwards. Results are returned in input order even though tasks
/// finish in any order.
///
/// Workers are plain futures polled by `join_all` on the caller's task, so
/// nothing here requires `Send`.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    work: F,
    progress: Option<&mpsc::Sender<(usize, usize)>>,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let queue = Mutex::new(items.into_iter().enumerate().collect::<VecDeque<_>>());
    let finished: Mutex<Vec<(usize, R)>> = Mutex::new(Vec::with_capacity(total));
    let completed = Mutex::new(0usize);
    let workers = limit.clamp(1, total);

    let (queue, finished_ref, completed, work) = (&queue, &finished, &completed, &work);
    let worker = move || async move {
        loop {
            let next = queue.lock().await.pop_front();
            let Some((index, item)) = next else {
                break;
            };

            let result = work(item).await;
            finished_ref.lock().await.push((index, result));

            let mut done = completed.lock().await;
            *done += 1;
            if let Some(tx) = progress {
                if let Err(e) = tx.send((*done, total)).await {
                    tracing::warn!(error = %e, done = *done, total = total, "Progress channel send failed (receiver dropped)");
                }
            }
        }
    };

    join_all((0..workers).map(|_| worker())).await;

    let mut finished = finished.into_inner();
    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let results = run_bounded(
            (0..30u64).collect(),
            8,
            |n| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + (n % 7) * 5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    n * 2
                }
            },
            None,
        )
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 8);
        assert_eq!(results, (0..30u64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_and_complete() {
        let (tx, mut rx) = mpsc::channel(64);

        run_bounded(
            (0..12u64).rev().collect(),
            4,
            |n| async move {
                tokio::time::sleep(Duration::from_millis(n * 3)).await;
            },
            Some(&tx),
        )
        .await;
        drop(tx);

        let mut seen = Vec::new();
        while let Some(p) = rx.recv().await {
            seen.push(p);
        }
        assert_eq!(seen.len(), 12);
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(seen.last(), Some(&(12, 12)));
    }

    #[tokio::test]
    async fn test_limit_larger_than_work() {
        let results = run_bounded(vec![1, 2, 3], 8, |n| async move { n + 1 }, None).await;
        assert_eq!(results, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_zero_limit_still_runs() {
        let results = run_bounded(vec!["a"], 0, |s| async move { s.len() }, None).await;
        assert_eq!(results, vec![1]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u8> = run_bounded(Vec::<u8>::new(), 8, |n| async move { n }, None).await;
        assert!(results.is_empty());
    }
}
