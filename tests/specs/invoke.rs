//! Bounded invoke: value, fault, timeout, and busy escalation.

use crate::prelude::BlockedEval;
use evalcoord::{operation, Coordinator, InvokeError, OperationError};
use std::sync::Arc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[tokio::test(start_paused = true)]
async fn evaluation_finishing_before_the_timeout_returns_its_value() {
    let coordinator = Coordinator::new();
    let (_sub, mut busy_rx) = coordinator.subscribe_busy();

    let op = operation("this.Count", |_scope| async {
        tokio::time::sleep(ms(50)).await;
        Ok("3".to_string())
    });

    let result = coordinator.invoke(op, ms(100)).await;
    assert_eq!(result, Ok("3".to_string()));
    assert_eq!(coordinator.in_flight(), 0);
    assert!(busy_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn evaluation_ignoring_cancellation_times_out_with_one_busy_pair() {
    let coordinator = Coordinator::new();
    let (_sub, mut busy_rx) = coordinator.subscribe_busy();

    let op = operation("while (true) {}", |_scope| async {
        std::future::pending::<Result<String, OperationError>>().await
    });

    let started = tokio::time::Instant::now();
    let result = coordinator.invoke(op, ms(100)).await;
    assert_eq!(result, Err(InvokeError::TimedOut));
    // Timeout plus both grace windows.
    assert!(started.elapsed() <= ms(2300));

    let raised = busy_rx.try_recv().unwrap();
    assert!(raised.is_busy);
    assert_eq!(raised.description, "while (true) {}");
    let cleared = busy_rx.try_recv().unwrap();
    assert!(!cleared.is_busy);
    assert!(busy_rx.try_recv().is_err());
}

#[tokio::test]
async fn failing_evaluation_is_reported_as_a_fault() {
    let coordinator = Coordinator::new();
    let op = operation("missing.Symbol", |_scope| async {
        Err::<String, _>(OperationError::Failed("unknown identifier".to_string()))
    });

    let result = coordinator.invoke(op, ms(100)).await;
    assert_eq!(
        result,
        Err(InvokeError::Fault("unknown identifier".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn blocked_evaluation_is_aborted_after_the_timeout() {
    let coordinator = Coordinator::new();
    let eval = Arc::new(BlockedEval::new("native.Call()"));

    let result = coordinator.invoke_polled(Arc::clone(&eval), ms(100)).await;
    assert_eq!(result, Err(InvokeError::TimedOut));
    assert!(eval.abort_request_count() >= 1);

    tokio::time::sleep(ms(10)).await;
    assert_eq!(coordinator.in_flight(), 0);
}
