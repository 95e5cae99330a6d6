//! Sequential batch mutation with per-item isolation.
//!
//! One state-changing call per selected item, strictly in order. The remote
//! API makes no promise about concurrent mutation of related records, so
//! nothing here runs in parallel. A failed item stays in the working set
//! with its error attached; a succeeded item is removed, so re-running the
//! batch only touches never-attempted or failed items.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::progress::{Message, ProgressSink};

/// A selected entity plus its pending mutation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem<P> {
    pub id: String,
    pub params: P,
    pub selected: bool,
    pub error: Option<String>,
}

impl<P> BatchItem<P> {
    pub fn new(id: impl Into<String>, params: P) -> Self {
        Self {
            id: id.into(),
            params,
            selected: true,
            error: None,
        }
    }
}

/// Cooperative stop flag checked between items. The runner never sets it
/// itself; it exists so a host can stop a long batch at the next item
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Confirmation was declined; nothing was attempted.
    Aborted,
    /// The cancel token fired between items.
    Cancelled { attempted: usize },
    Completed { succeeded: usize, failed: usize },
}

/// Run one batch over `items`, mutating the set in place.
///
/// `confirm` gates the whole run: when it returns false no call is made and
/// the set is untouched. Only `selected` items are processed; each success
/// removes the item, each failure keeps it (error attached) and the run
/// continues. One terminal `Success` message is reported after the loop
/// regardless of per-item failures.
pub async fn run_batch<P, F, Fut>(
    items: &mut Vec<BatchItem<P>>,
    mut mutate: F,
    sink: &mut dyn ProgressSink,
    confirm: impl FnOnce() -> bool,
    cancel: &CancelToken,
    noun: &str,
) -> BatchOutcome
where
    P: Clone,
    F: FnMut(String, P) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    if !confirm() {
        return BatchOutcome::Aborted;
    }

    let total = items.iter().filter(|item| item.selected).count();
    sink.report(Message::info(format!(
        "Preparing to process {total} selected {noun}(s)"
    )));

    let mut kept = Vec::with_capacity(items.len());
    let mut attempted = 0usize;
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut cancelled = false;

    for mut item in items.drain(..) {
        if !item.selected {
            kept.push(item);
            continue;
        }
        if cancelled || cancel.is_cancelled() {
            if !cancelled {
                cancelled = true;
                sink.report(Message::info(format!(
                    "Cancelled after {attempted} of {total} {noun}(s); the rest were left untouched"
                )));
            }
            kept.push(item);
            continue;
        }

        attempted += 1;
        sink.report(Message::info(format!(
            "Updating {noun} [ID: {}] ({attempted} of {total})",
            item.id
        )));
        match mutate(item.id.clone(), item.params.clone()).await {
            Ok(()) => {
                succeeded += 1;
                sink.report(Message::success(format!(
                    "Updated {noun} [ID: {}]",
                    item.id
                )));
            }
            Err(err) => {
                failed += 1;
                let detail = format!("{err:#}");
                sink.report(Message::error(format!(
                    "ERROR: Failed to update {noun} [ID: {}]: {detail}",
                    item.id
                )));
                item.error = Some(detail);
                kept.push(item);
            }
        }
    }
    *items = kept;

    if cancelled {
        return BatchOutcome::Cancelled { attempted };
    }
    sink.report(Message::success(format!("Finished updating {noun}s!")));
    BatchOutcome::Completed { succeeded, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{MemorySink, MessageKind};
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn items(ids: &[&str]) -> Vec<BatchItem<()>> {
        ids.iter().map(|id| BatchItem::new(*id, ())).collect()
    }

    #[tokio::test]
    async fn failed_item_is_retained_with_error() {
        let mut set = items(&["1", "2", "3", "4", "5"]);
        let mut sink = MemorySink::new();
        let cancel = CancelToken::new();

        let outcome = run_batch(
            &mut set,
            |id, ()| async move {
                if id == "3" {
                    Err(anyhow!("status 422"))
                } else {
                    Ok(())
                }
            },
            &mut sink,
            || true,
            &cancel,
            "course",
        )
        .await;

        assert_eq!(
            outcome,
            BatchOutcome::Completed {
                succeeded: 4,
                failed: 1
            }
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "3");
        assert!(set[0].error.as_deref().unwrap().contains("422"));
        // 4 per-item successes plus the terminal message
        assert_eq!(sink.count(MessageKind::Success), 5);
        assert_eq!(sink.count(MessageKind::Error), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_makes_no_calls() {
        let mut set = items(&["1", "2"]);
        let mut sink = MemorySink::new();
        let cancel = CancelToken::new();
        let calls = Rc::new(RefCell::new(0));

        let outcome = {
            let calls = calls.clone();
            run_batch(
                &mut set,
                move |_id, ()| {
                    *calls.borrow_mut() += 1;
                    async { Ok::<(), anyhow::Error>(()) }
                },
                &mut sink,
                || false,
                &cancel,
                "course",
            )
            .await
        };

        assert_eq!(outcome, BatchOutcome::Aborted);
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(set.len(), 2);
        assert!(sink.messages.is_empty());
    }

    #[tokio::test]
    async fn unselected_items_pass_through_in_place() {
        let mut set = items(&["1", "2", "3"]);
        set[1].selected = false;
        let mut sink = MemorySink::new();
        let cancel = CancelToken::new();

        let order = Rc::new(RefCell::new(Vec::new()));
        let outcome = {
            let order = order.clone();
            run_batch(
                &mut set,
                move |id, ()| {
                    order.borrow_mut().push(id);
                    async { Ok::<(), anyhow::Error>(()) }
                },
                &mut sink,
                || true,
                &cancel,
                "discussion",
            )
            .await
        };

        assert_eq!(
            outcome,
            BatchOutcome::Completed {
                succeeded: 2,
                failed: 0
            }
        );
        assert_eq!(*order.borrow(), vec!["1".to_string(), "3".to_string()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].id, "2");
        assert!(!set[0].selected);
    }

    #[tokio::test]
    async fn cancel_token_stops_between_items() {
        let mut set = items(&["1", "2", "3"]);
        let mut sink = MemorySink::new();
        let cancel = CancelToken::new();

        let outcome = {
            let cancel_inner = cancel.clone();
            run_batch(
                &mut set,
                move |_id, ()| {
                    // fires after the first item completes
                    cancel_inner.cancel();
                    async { Ok::<(), anyhow::Error>(()) }
                },
                &mut sink,
                || true,
                &cancel,
                "enrollment",
            )
            .await
        };

        assert_eq!(outcome, BatchOutcome::Cancelled { attempted: 1 });
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].id, "2");
        assert_eq!(set[1].id, "3");
        // no terminal "Finished" message on a cancelled run
        assert_eq!(sink.count(MessageKind::Success), 1);
    }

    #[tokio::test]
    async fn failures_never_stop_the_run() {
        let mut set = items(&["1", "2"]);
        let mut sink = MemorySink::new();
        let cancel = CancelToken::new();

        let outcome = run_batch(
            &mut set,
            |_id, ()| async { Err(anyhow!("boom")) },
            &mut sink,
            || true,
            &cancel,
            "course",
        )
        .await;

        assert_eq!(
            outcome,
            BatchOutcome::Completed {
                succeeded: 0,
                failed: 2
            }
        );
        assert_eq!(set.len(), 2);
        assert_eq!(sink.count(MessageKind::Error), 2);
        // terminal message still reported exactly once
        assert_eq!(sink.count(MessageKind::Success), 1);
    }
}
