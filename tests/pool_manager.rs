//! End-to-end scenarios driven through `PoolManager` itself, using the
//! `ManualClock` and scripted test doubles from `anytls_pool::testing` for
//! deterministic control over time and dial outcomes.

use std::sync::Arc;
use std::time::Duration;

use anytls_pool::clock::{Clock, ManualClock};
use anytls_pool::config::PoolConfig;
use anytls_pool::session::{DialContext, Dialer, SessionTransport};
use anytls_pool::testing::{ScriptedDialer, TestSessionTransport};
use anytls_pool::PoolManager;

fn ctx() -> DialContext {
    DialContext::new(Duration::from_secs(5))
}

#[tokio::test]
async fn warm_path_reuses_idle_session_without_redialing() {
    let dialer = ScriptedDialer::new();
    let transport = TestSessionTransport::new();
    dialer.push_session(transport.clone());

    let clock = ManualClock::new();
    let config = PoolConfig {
        idle_session_timeout: Duration::from_secs(30),
        ..PoolConfig::normalized_defaults()
    };
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        config,
        clock.clone() as Arc<dyn Clock>,
    );

    let stream = manager.acquire_stream(&ctx()).await.unwrap();
    assert_eq!(dialer.dial_count(), 1);
    drop(stream);

    let controller = transport.take_last_stream_controller().unwrap();
    controller.end();
    assert_eq!(manager.idle_len(), 1);

    clock.advance(Duration::from_secs(2));
    let _stream2 = manager.acquire_stream(&ctx()).await.unwrap();

    // The only idle session was handed back out; no new dial happened.
    assert_eq!(dialer.dial_count(), 1);
    assert_eq!(manager.idle_len(), 0);
}

#[tokio::test]
async fn idle_eviction_respects_floor_and_resets_lease_on_survivors() {
    let dialer = ScriptedDialer::new();
    let clock = ManualClock::new();
    let config = PoolConfig {
        idle_session_timeout: Duration::from_secs(30),
        min_idle_session: 2,
        ..PoolConfig::normalized_defaults()
    };
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        config,
        clock.clone() as Arc<dyn Clock>,
    );

    // Check out and immediately return 5 distinct sessions.
    let mut controllers = Vec::new();
    let mut streams = Vec::new();
    for _ in 0..5 {
        let transport = TestSessionTransport::new();
        dialer.push_session(transport.clone());
        let stream = manager.acquire_stream(&ctx()).await.unwrap();
        let controller = transport.take_last_stream_controller().unwrap();
        controllers.push(controller);
        streams.push(stream);
    }
    assert_eq!(dialer.dial_count(), 5);
    for controller in &controllers {
        controller.end();
    }
    assert_eq!(manager.idle_len(), 5);
    assert_eq!(manager.registered_len(), 5);

    clock.advance(Duration::from_secs(60));
    manager.run_maintenance_once().await;

    assert_eq!(manager.idle_len(), 2);
    assert_eq!(manager.registered_len(), 2);
    // No proactive replenishment is configured, so the dial count is unchanged.
    assert_eq!(dialer.dial_count(), 5);
}

#[tokio::test]
async fn age_rotation_closes_sessions_past_their_jittered_lifetime() {
    let dialer = ScriptedDialer::new();
    let clock = ManualClock::new();
    let config = PoolConfig {
        idle_session_timeout: Duration::from_secs(1000),
        max_connection_lifetime: Duration::from_secs(100),
        connection_lifetime_jitter: Duration::from_secs(10),
        ..PoolConfig::normalized_defaults()
    };
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        config,
        clock.clone() as Arc<dyn Clock>,
    );

    let transport1 = TestSessionTransport::new();
    dialer.push_session(transport1.clone());
    let stream1 = manager.acquire_stream(&ctx()).await.unwrap();
    let controller1 = transport1.take_last_stream_controller().unwrap();

    let transport2 = TestSessionTransport::new();
    dialer.push_session(transport2.clone());
    let stream2 = manager.acquire_stream(&ctx()).await.unwrap();
    let controller2 = transport2.take_last_stream_controller().unwrap();

    drop(stream1);
    drop(stream2);
    controller1.end();
    controller2.end();
    assert_eq!(manager.idle_len(), 2);

    // Both created at the same instant; both 105s old exceeds a 100s +/-10s
    // lifetime window regardless of which side of the jitter each seq lands on.
    clock.advance(Duration::from_secs(105));
    manager.run_maintenance_once().await;

    assert_eq!(manager.idle_len(), 0);
    assert_eq!(manager.registered_len(), 0);
}

#[tokio::test]
async fn proactive_replenishment_ramps_up_under_the_rate_cap() {
    let dialer = ScriptedDialer::new();
    let clock = ManualClock::new();
    let config = PoolConfig {
        ensure_idle_session: 10,
        ensure_idle_session_create_rate: 3,
        ..PoolConfig::normalized_defaults()
    };
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        config,
        clock.clone() as Arc<dyn Clock>,
    );

    let expected_after_tick = [3usize, 6, 9, 10];
    for expected in expected_after_tick {
        manager.run_maintenance_once().await;
        // Let the spawned proactive creators finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.idle_len(), expected);
    }
    assert_eq!(dialer.dial_count(), 10);
}

#[tokio::test]
async fn stream_end_after_manager_shutdown_is_a_no_op() {
    let dialer = ScriptedDialer::new();
    let transport = TestSessionTransport::new();
    dialer.push_session(transport.clone());

    let clock = ManualClock::new();
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        PoolConfig::normalized_defaults(),
        clock.clone() as Arc<dyn Clock>,
    );

    let stream = manager.acquire_stream(&ctx()).await.unwrap();
    let controller = transport.take_last_stream_controller().unwrap();

    manager.close().await;
    assert_eq!(manager.registered_len(), 0);
    assert!(transport.is_closed());

    // The stream's return-to-pool hook fires late, after the session is
    // already torn down; it must not resurrect pool state.
    controller.end();
    drop(stream);
    assert_eq!(manager.idle_len(), 0);
    assert_eq!(manager.registered_len(), 0);
}

#[tokio::test]
async fn stream_end_during_cancellation_race_closes_session_instead_of_pooling() {
    let dialer = ScriptedDialer::new();
    let transport = TestSessionTransport::new();
    dialer.push_session(transport.clone());

    let clock = ManualClock::new();
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        PoolConfig::normalized_defaults(),
        clock.clone() as Arc<dyn Clock>,
    );

    let stream = manager.acquire_stream(&ctx()).await.unwrap();
    let controller = transport.take_last_stream_controller().unwrap();

    // Narrow race: the manager is told to cancel, but this session hasn't
    // been drained and closed yet, when its stream ends.
    manager.initiate_cancellation();
    assert!(!transport.is_closed());

    controller.end();
    drop(stream);

    // The hook must close the session asynchronously rather than inserting
    // it into a pool that will never be drained again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.is_closed());
    assert_eq!(manager.idle_len(), 0);
    assert_eq!(manager.registered_len(), 0);
}

#[tokio::test]
async fn spontaneous_transport_death_is_reflected_in_both_structures() {
    let dialer = ScriptedDialer::new();
    let transport = TestSessionTransport::new();
    dialer.push_session(transport.clone());

    let clock = ManualClock::new();
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        PoolConfig::normalized_defaults(),
        clock.clone() as Arc<dyn Clock>,
    );

    let stream = manager.acquire_stream(&ctx()).await.unwrap();
    assert_eq!(manager.registered_len(), 1);
    drop(stream);

    transport.simulate_spontaneous_death();
    assert_eq!(manager.registered_len(), 0);
    assert_eq!(manager.idle_len(), 0);

    // The dead session is gone, not idle, so the next acquire must dial fresh.
    let _stream2 = manager.acquire_stream(&ctx()).await.unwrap();
    assert_eq!(dialer.dial_count(), 2);
}

#[tokio::test]
async fn acquire_after_close_returns_pool_closed_error() {
    let dialer = ScriptedDialer::new();
    let clock = ManualClock::new();
    let manager = PoolManager::new_without_ticker(
        dialer.clone() as Arc<dyn Dialer>,
        PoolConfig::normalized_defaults(),
        clock.clone() as Arc<dyn Clock>,
    );

    manager.close().await;
    let result = manager.acquire_stream(&ctx()).await;
    assert!(result.is_err());
}
