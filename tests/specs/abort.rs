//! Abort-all: teardown of every outstanding evaluation, coordinator stays
//! usable.

use crate::prelude::BlockedEval;
use evalcoord::{operation, Coordinator, InvokeError, OperationError};
use std::sync::Arc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[tokio::test(start_paused = true)]
async fn abort_all_tears_down_every_outstanding_evaluation() {
    let coordinator = Arc::new(Coordinator::new());
    let good_a = Arc::new(BlockedEval::new("eval a"));
    let good_b = Arc::new(BlockedEval::new("eval b"));
    let bad = Arc::new(BlockedEval::refusing_aborts("eval bad"));

    let mut callers = Vec::new();
    for eval in [Arc::clone(&good_a), Arc::clone(&good_b), Arc::clone(&bad)] {
        let worker = Arc::clone(&coordinator);
        callers.push(tokio::spawn(async move {
            worker.invoke_polled(eval, Duration::from_secs(10)).await
        }));
    }
    tokio::time::sleep(ms(10)).await;
    assert_eq!(coordinator.in_flight(), 3);

    coordinator.abort_all().await.unwrap();

    // The two well-behaved evaluations were torn down even though the third
    // kept refusing its abort requests.
    assert!(good_a.abort_request_count() >= 1);
    assert!(good_b.abort_request_count() >= 1);
    assert!(bad.abort_request_count() >= 1);

    for caller in callers {
        assert_eq!(caller.await.unwrap(), Err(InvokeError::Aborted));
    }
}

#[tokio::test(start_paused = true)]
async fn the_coordinator_remains_usable_after_abort_all() {
    let coordinator = Arc::new(Coordinator::new());
    let worker = Arc::clone(&coordinator);
    let stuck = tokio::spawn(async move {
        let op = operation("old eval", |scope: evalcoord::CancelScope| async move {
            scope.cancelled().await;
            Err::<String, _>(OperationError::Cancelled)
        });
        worker.invoke(op, Duration::from_secs(10)).await
    });
    tokio::time::sleep(ms(10)).await;

    coordinator.abort_all().await.unwrap();
    assert_eq!(stuck.await.unwrap(), Err(InvokeError::Aborted));

    // A new evaluation runs on a fresh scope, unaffected by the abort.
    let op = operation("new eval", |_scope| async { Ok("ok".to_string()) });
    assert_eq!(coordinator.invoke(op, ms(100)).await, Ok("ok".to_string()));
}
