//! Dispose: terminal, non-blocking, idempotent at the flag level.

use crate::prelude::BlockedEval;
use evalcoord::{operation, Coordinator, CoordinatorError, InvokeError, OperationError};
use std::sync::Arc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[tokio::test(start_paused = true)]
async fn dispose_unblocks_outstanding_evaluations_and_is_terminal() {
    let coordinator = Arc::new(Coordinator::new());

    let worker = Arc::clone(&coordinator);
    let cooperative = tokio::spawn(async move {
        let op = operation("watch expr", |scope: evalcoord::CancelScope| async move {
            scope.cancelled().await;
            Err::<String, _>(OperationError::Cancelled)
        });
        worker.invoke(op, Duration::from_secs(10)).await
    });

    let blocked = Arc::new(BlockedEval::new("native.Call()"));
    let worker = Arc::clone(&coordinator);
    let eval = Arc::clone(&blocked);
    let polled = tokio::spawn(async move {
        worker.invoke_polled(eval, Duration::from_secs(10)).await
    });

    tokio::time::sleep(ms(10)).await;
    assert_eq!(coordinator.in_flight(), 2);

    coordinator.dispose().unwrap();
    assert!(coordinator.is_disposed());
    assert!(blocked.was_forced());

    assert_eq!(cooperative.await.unwrap(), Err(InvokeError::Aborted));
    assert_eq!(polled.await.unwrap(), Err(InvokeError::Aborted));

    let late = operation("late eval", |_scope| async { Ok("never".to_string()) });
    assert_eq!(
        coordinator.invoke(late, ms(100)).await,
        Err(InvokeError::Disposed)
    );
    assert_eq!(
        coordinator.abort_all().await,
        Err(CoordinatorError::Disposed)
    );
    assert_eq!(coordinator.dispose(), Err(CoordinatorError::AlreadyDisposed));
}
