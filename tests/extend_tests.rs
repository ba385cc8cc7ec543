//! Execution extension grants: bracketing background units, declined
//! grants, and host-driven expiration.


use hopper::connection::Connection;
use hopper::extend::MockExtender;
use hopper::Queue;

use test_helpers::*;

#[tokio::test]
async fn grant_brackets_a_background_unit() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let extender = MockExtender::new_arc();
        let queue = Queue::open(
            Connection::new(unique_name("extend-bracket")),
            &settings,
            extender.clone(),
        )
        .await
        .expect("open queue");

        let key = unique_name("extend-bracket-probe");
        let p = probe(&key);
        queue
            .dispatch(ProbeJob::new(&key, Behavior::Succeed).in_background())
            .await;

        assert!(wait_until(5000, || p.succeeded_hook_count() == 1).await);
        assert_eq!(extender.begin_count(), 1);
        assert_eq!(extender.end_count(), 1);
        assert_eq!(extender.outstanding(), 0);

        // A foreground job never asks for a grant
        queue.dispatch(ProbeJob::new(&key, Behavior::Succeed)).await;
        assert!(wait_until(5000, || p.succeeded_hook_count() == 2).await);
        assert_eq!(extender.begin_count(), 1);

        queue.close().await.expect("close");
    })
}

#[tokio::test]
async fn declined_grant_still_runs_the_job() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let extender = MockExtender::declining_arc();
        let queue = Queue::open(
            Connection::new(unique_name("extend-declined")),
            &settings,
            extender.clone(),
        )
        .await
        .expect("open queue");

        let key = unique_name("extend-declined-probe");
        let p = probe(&key);
        queue
            .dispatch(ProbeJob::new(&key, Behavior::Succeed).in_background())
            .await;

        assert!(wait_until(5000, || p.succeeded_hook_count() == 1).await);
        assert_eq!(extender.begin_count(), 1);
        assert_eq!(extender.end_count(), 0);
        assert_eq!(extender.outstanding(), 0);

        queue.close().await.expect("close");
    })
}

#[tokio::test]
async fn expiration_cancels_the_running_unit() {
    with_timeout!(20000, {
        test_tracing();
        register_probe_job();
        let settings = memory_settings();
        let extender = MockExtender::new_arc();
        let queue = Queue::open(
            Connection::new(unique_name("extend-expire")),
            &settings,
            extender.clone(),
        )
        .await
        .expect("open queue");

        let key = unique_name("extend-expire-probe");
        let p = probe(&key);
        queue
            .dispatch(ProbeJob::new(&key, Behavior::Park).in_background())
            .await;

        assert!(wait_until(5000, || p.handle_count() == 1).await);
        assert_eq!(extender.outstanding(), 1);

        // Host reclaims its budget; the unit stops as cancelled
        extender.expire_all();
        assert!(wait_until(5000, || p.failed_hook_count() == 1).await);
        assert_eq!(p.fail_reasons(), vec!["cancelled".to_string()]);
        assert_eq!(p.cancel_count(), 1);
        assert_eq!(extender.end_count(), 1);
        assert_eq!(extender.outstanding(), 0);

        queue.close().await.expect("close");
    })
}
