//! Per-item fan-out with failure isolation
//!
//! Each item's sub-task runs in its own tokio task, at most `parallelism` at a
//! time. An error or a panic in one item becomes that item's error; the other
//! items are unaffected. Results come back in input order once every item
//! has finished.

use futures::stream::{self, StreamExt};
use std::any::Any;
use std::fmt::Display;
use std::future::Future;

/// Outcome of one item's sub-task
#[derive(Debug)]
pub struct ItemResult<T> {
    pub item: String,
    pub outcome: Result<T, String>,
}

pub async fn fan_out<T, E, F, Fut>(items: Vec<String>, parallelism: usize, task: F) -> Vec<ItemResult<T>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let mut results: Vec<(usize, ItemResult<T>)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let work = task(item.clone());
            async move {
                let outcome = match tokio::spawn(work).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(join_err) if join_err.is_panic() => Err(format!(
                        "Item task panicked: {}",
                        panic_message(join_err.into_panic())
                    )),
                    Err(join_err) => Err(format!("Item task cancelled: {}", join_err)),
                };
                (index, ItemResult { item, outcome })
            }
        })
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("item-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let results = fan_out(names(4), 4, |item| async move {
            // Later items finish first
            let delay = 40 - item.trim_start_matches("item-").parse::<u64>().unwrap_or(0) * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, String>(item.len())
        })
        .await;

        let order: Vec<&str> = results.iter().map(|r| r.item.as_str()).collect();
        assert_eq!(order, vec!["item-1", "item-2", "item-3", "item-4"]);
        assert!(results.iter().all(|r| r.outcome.is_ok()));
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_isolated() {
        let results = fan_out(names(3), 2, |item| async move {
            match item.as_str() {
                "item-1" => Err("segmentation refused".to_string()),
                "item-2" => panic!("mask decoder exploded"),
                _ => Ok(7),
            }
        })
        .await;

        assert_eq!(results[0].outcome.as_ref().unwrap_err(), "segmentation refused");
        let panic_err = results[1].outcome.as_ref().unwrap_err();
        assert!(panic_err.contains("mask decoder exploded"));
        assert_eq!(results[2].outcome.as_ref().unwrap(), &7);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = fan_out(names(6), 2, |_item| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = fan_out(Vec::new(), 2, |_item| async { Ok::<_, String>(()) }).await;
        assert!(results.is_empty());
    }
}
