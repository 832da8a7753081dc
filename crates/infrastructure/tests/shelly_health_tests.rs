mod support;

use anyhow::Result;
use domain::{DriverState, IoDriver};
use infrastructure::drivers::shelly::ShellyOutputMapping;
use infrastructure::drivers::{ShellyConfig, ShellyDriver};
use support::FakeShelly;

const DEVICE_ID: &str = "shellyplus1-a8032ab12345";

fn config(host: String, unhealthy_limit: u32, freshness_secs: u64) -> ShellyConfig {
    ShellyConfig {
        hosts: vec![host],
        outputs: vec![ShellyOutputMapping {
            pin: 1,
            device_id: DEVICE_ID.to_string(),
            switch: 0,
        }],
        // Ticks are driven by hand
        health_interval_ms: 3_600_000,
        unhealthy_limit,
        freshness_secs,
        probe_timeout_ms: 500,
        discover_timeout_secs: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failed_set_triggers_exactly_one_rediscovery() -> Result<()> {
    let fake = FakeShelly::start(DEVICE_ID, 2).await;
    let mut driver = ShellyDriver::new(config(fake.host(), 2, 900));
    driver.setup(&[], &[1]).await?;
    assert!(driver.check_health().await);

    fake.fail_set(true);
    let output = driver.output(1)?;
    assert!(output.set(true).await.is_err());
    // Unhealthy devices refuse further commands
    assert!(output.set(true).await.unwrap_err().is_unhealthy());
    assert_eq!(fake.set_calls(), 1);

    assert!(!driver.check_health().await);
    assert_eq!(driver.unhealthy_count(), 1);
    assert_eq!(driver.state(), DriverState::Degraded);
    assert!(driver.is_ready());

    assert!(!driver.check_health().await);
    assert_eq!(driver.unhealthy_count(), 2);
    assert_eq!(fake.info_calls(), 1);

    // Third observation exceeds the limit
    fake.fail_set(false);
    assert!(!driver.check_health().await);
    assert_eq!(fake.info_calls(), 2);
    assert_eq!(driver.unhealthy_count(), 0);
    assert_eq!(driver.state(), DriverState::Ready);

    assert!(driver.check_health().await);
    output.set(true).await?;
    assert!(fake.output());
    assert_eq!(fake.info_calls(), 2);

    driver.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_stale_device_without_limit_never_rediscovers() -> Result<()> {
    let fake = FakeShelly::start(DEVICE_ID, 2).await;
    let mut driver = ShellyDriver::new(config(fake.host(), 0, 0));
    driver.setup(&[], &[1]).await?;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    for tick in 1..=4 {
        assert!(!driver.check_health().await);
        assert_eq!(driver.unhealthy_count(), tick);
    }
    assert_eq!(fake.info_calls(), 1);
    assert_eq!(driver.state(), DriverState::Degraded);

    let err = driver.output(1)?.state().await.unwrap_err();
    assert!(err.is_unhealthy());

    driver.close().await?;
    assert_eq!(driver.state(), DriverState::Closed);
    assert!(!driver.check_health().await);
    Ok(())
}
