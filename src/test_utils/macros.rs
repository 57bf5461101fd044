/// Waits for the next [`ConnectionEvent`](crate::ConnectionEvent) and asserts it is a renewal.
///
/// Evaluates to the new generation. The default timeout is 120 seconds, which covers the whole
/// default backoff schedule under paused time.
///
/// # Panics
///
/// * **Timeout**: no event arrives in time.
/// * **Failure**: the manager reported [`ConnectionEvent::Failed`](crate::ConnectionEvent)
///   instead.
/// * **Closed**: the event channel was closed or the receiver lagged.
#[macro_export]
macro_rules! assert_renewed {
    ($events: expr) => {
        $crate::assert_renewed!($events, timeout = 120)
    };
    ($events: expr, timeout = $secs: expr) => {{
        let event = tokio::time::timeout(std::time::Duration::from_secs($secs), $events.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("connection event channel closed");
        match event {
            $crate::ConnectionEvent::Renewed { generation, .. } => generation,
            $crate::ConnectionEvent::Failed { attempts } => {
                panic!("Expected renewal, connection failed after {attempts} attempts")
            }
        }
    }};
}

/// Waits for the next [`ConnectionEvent`](crate::ConnectionEvent) and asserts the manager gave
/// up. Evaluates to the reported attempt count.
#[macro_export]
macro_rules! assert_gave_up {
    ($events: expr) => {
        $crate::assert_gave_up!($events, timeout = 600)
    };
    ($events: expr, timeout = $secs: expr) => {{
        let event = tokio::time::timeout(std::time::Duration::from_secs($secs), $events.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("connection event channel closed");
        match event {
            $crate::ConnectionEvent::Failed { attempts } => attempts,
            $crate::ConnectionEvent::Renewed { generation, .. } => {
                panic!("Expected failure, connection renewed as generation {generation}")
            }
        }
    }};
}

/// Waits until a [`RecordingHandler`](crate::test_utils::RecordingHandler) has completed at least
/// `count` calls.
///
/// # Panics
///
/// If the calls do not happen within the timeout (default 5 seconds).
#[macro_export]
macro_rules! assert_dispatched {
    ($handler: expr, $count: expr) => {
        $crate::assert_dispatched!($handler, $count, timeout = 5)
    };
    ($handler: expr, $count: expr, timeout = $secs: expr) => {
        let count = $count;
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            $handler.wait_for_calls(count),
        )
        .await;
        if waited.is_err() {
            panic!("Expected {} handler calls, got {}", count, $handler.call_count());
        }
    };
}

/// Asserts a [`RecordingHandler`](crate::test_utils::RecordingHandler) receives no further calls
/// within `millis` (default 500) milliseconds.
#[macro_export]
macro_rules! assert_quiet {
    ($handler: expr) => {
        $crate::assert_quiet!($handler, millis = 500)
    };
    ($handler: expr, millis = $millis: expr) => {
        let before = $handler.call_count();
        tokio::time::sleep(std::time::Duration::from_millis($millis)).await;
        assert_eq!($handler.call_count(), before, "Handler received unexpected calls");
    };
}
