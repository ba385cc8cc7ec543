//! Queue facade behavior: runner sharing, refcounted close, first-open
//! mode pinning, and declined dispatches.


use hopper::connection::{Connection, Mode};
use hopper::envelope::EnvelopeState;
use hopper::extend::NoopExtender;
use hopper::Queue;

use test_helpers::*;

#[tokio::test]
async fn facades_share_one_runner() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let name = unique_name("queue-shared");

        let first = Queue::open(Connection::new(&name), &settings, NoopExtender::new())
            .await
            .expect("open first");
        let second = Queue::open(Connection::new(&name), &settings, NoopExtender::new())
            .await
            .expect("open second");

        let key = unique_name("queue-shared-probe");
        let p = probe(&key);
        first.dispatch(ProbeJob::new(&key, Behavior::Succeed)).await;
        assert!(wait_until(5000, || p.succeeded_hook_count() == 1).await);

        // Both facades read the same counters
        assert_eq!(second.stats().dispatched, 1);
        assert_eq!(second.stats().succeeded, 1);

        // Closing one facade leaves the runner alive for the other
        first.close().await.expect("close first");
        second.dispatch(ProbeJob::new(&key, Behavior::Succeed)).await;
        assert!(wait_until(5000, || p.succeeded_hook_count() == 2).await);

        second.close().await.expect("close second");
    })
}

#[tokio::test]
async fn first_open_pins_the_mode() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let name = unique_name("queue-pinned");

        let serial = Queue::open(Connection::new(&name), &settings, NoopExtender::new())
            .await
            .expect("open serial");
        // Same name, wider mode; the existing serial engine wins
        let wide = Queue::open(
            Connection::new(&name).with_mode(Mode::Concurrent { max: 4 }),
            &settings,
            NoopExtender::new(),
        )
        .await
        .expect("open wide");

        let key = unique_name("queue-pinned-probe");
        let p = probe(&key);
        wide.dispatch(ProbeJob::new(&key, Behavior::Park)).await;
        wide.dispatch(ProbeJob::new(&key, Behavior::Park)).await;

        assert!(wait_until(5000, || p.handle_count() == 1).await);
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(p.handle_count(), 1);

        assert!(p.resolve_one_success());
        assert!(wait_until(5000, || p.handle_count() == 2).await);
        assert!(p.resolve_one_success());
        assert!(wait_until(5000, || p.succeeded_hook_count() == 2).await);

        serial.close().await.expect("close serial");
        wide.close().await.expect("close wide");
    })
}

#[tokio::test]
async fn declined_dispatch_still_returns_the_envelope() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let queue = Queue::open(
            Connection::new(unique_name("queue-declined")),
            &settings,
            NoopExtender::new(),
        )
        .await
        .expect("open queue");

        let key = unique_name("queue-declined-probe");
        let p = probe(&key);

        // Expired before it was ever offered; admission declines it
        let envelope = queue
            .dispatch(ProbeJob::new(&key, Behavior::Succeed).with_expiration_ms(now_ms() - 1_000))
            .await;

        assert_eq!(envelope.state(), EnvelopeState::Created);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(p.handle_count(), 0);

        let stats = queue.stats();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.attempts, 0);

        queue.close().await.expect("close");
    })
}

#[tokio::test]
async fn default_queue_uses_the_default_connection() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let queue = Queue::open_default(&settings).await.expect("open default");
        assert_eq!(queue.connection().name, Connection::DEFAULT_NAME);

        let key = unique_name("queue-default-probe");
        let p = probe(&key);
        queue.dispatch(ProbeJob::new(&key, Behavior::Succeed)).await;
        assert!(wait_until(5000, || p.succeeded_hook_count() == 1).await);

        queue.close().await.expect("close");
    })
}
