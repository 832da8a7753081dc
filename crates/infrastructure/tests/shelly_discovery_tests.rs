mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use domain::{DriverState, EventListener, IoDriver, PushEvent};
use infrastructure::drivers::shelly::{ShellyInputMapping, ShellyOutputMapping, probe_all};
use infrastructure::drivers::{ShellyConfig, ShellyDriver};
use serde_json::json;
use support::{FakeShelly, eventually, refused_addr};
use tokio::sync::mpsc;

fn config(hosts: Vec<String>, device_id: &str) -> ShellyConfig {
    ShellyConfig {
        hosts,
        outputs: vec![ShellyOutputMapping {
            pin: 1,
            device_id: device_id.to_string(),
            switch: 0,
        }],
        inputs: vec![ShellyInputMapping {
            pin: 2,
            device_id: device_id.to_string(),
            input: 0,
        }],
        health_interval_ms: 3_600_000,
        probe_timeout_ms: 500,
        discover_timeout_secs: 5,
        ..Default::default()
    }
}

struct ChannelListener(mpsc::UnboundedSender<PushEvent>);

#[async_trait]
impl EventListener for ChannelListener {
    async fn fire_event(&self, event: PushEvent) {
        let _ = self.0.send(event);
    }
}

#[tokio::test]
async fn test_probe_keeps_only_gen2_targets() -> Result<()> {
    let gen2 = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let refused = refused_addr().await;

    let hosts = vec![gen2.host(), refused.to_string()];
    let found = probe_all(&hosts, Duration::from_millis(500), 4).await?;

    assert_eq!(found, vec![gen2.host()]);
    Ok(())
}

#[tokio::test]
async fn test_discovery_skips_refusing_and_first_generation_hosts() -> Result<()> {
    let gen2 = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let gen1 = FakeShelly::start("shelly1-b4e62d000001", 1).await;
    let refused = refused_addr().await;

    let mut driver = ShellyDriver::new(config(
        vec![refused.to_string(), gen1.host(), gen2.host()],
        "shellyplus1-a8032ab12345",
    ));
    driver.setup(&[2], &[1]).await?;

    assert!(driver.is_ready());
    assert_eq!(driver.state(), DriverState::Ready);
    assert_eq!(driver.devices().len(), 1);
    assert_eq!(gen1.info_calls(), 0);
    assert_eq!(driver.all_io(), (vec![2], vec![1]));

    let device = driver.device("shellyplus1-a8032ab12345").unwrap();
    assert_eq!(device.host(), gen2.host());
    assert_eq!(device.info().model, "SNSW-001X16EU");
    assert_eq!(device.apower(0), Some(0.0));

    driver.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_output_set_reaches_device() -> Result<()> {
    let fake = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let mut driver = ShellyDriver::new(config(vec![fake.host()], "shellyplus1-a8032ab12345"));
    driver.setup(&[2], &[1]).await?;

    let output = driver.output(1)?;
    assert!(!output.state().await?);

    output.set(true).await?;
    assert!(fake.output());
    assert!(output.state().await?);
    assert!(!driver.input(2)?.state().await?);

    driver.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_rediscovery_is_idempotent() -> Result<()> {
    let fake = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let mut driver = ShellyDriver::new(config(vec![fake.host()], "shellyplus1-a8032ab12345"));
    driver.setup(&[2], &[1]).await?;
    let output = driver.output(1)?;

    for _ in 0..3 {
        assert_eq!(driver.discover().await?, 0);
    }

    assert_eq!(driver.devices().len(), 1);
    assert_eq!(fake.info_calls(), 1);
    assert_eq!(driver.all_io(), (vec![2], vec![1]));
    output.set(true).await?;
    assert!(fake.output());

    driver.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_switch_fails_setup() -> Result<()> {
    let fake = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let mut cfg = config(vec![fake.host()], "shellyplus1-a8032ab12345");
    cfg.outputs[0].switch = 3;

    let mut driver = ShellyDriver::new(cfg);
    let err = driver.setup(&[], &[1]).await.unwrap_err();

    assert!(err.to_string().contains("switch:3"));
    assert!(!driver.is_ready());
    assert!(driver.devices().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_notifications_update_state_and_fire_presses() -> Result<()> {
    let fake = FakeShelly::start("shellyplus1-a8032ab12345", 2).await;
    let mut driver = ShellyDriver::new(config(vec![fake.host()], "shellyplus1-a8032ab12345"));
    driver.setup(&[2], &[1]).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    driver.input(2)?.subscribe(Arc::new(ChannelListener(tx)))?;

    fake.notify("NotifyStatus", json!({ "ts": 1.0, "switch:0": { "output": true } }));
    let device = driver.device("shellyplus1-a8032ab12345").unwrap();
    assert!(eventually(|| device.switch_output(0) == Some(true)).await);

    fake.notify(
        "NotifyEvent",
        json!({ "ts": 2.0, "events": [{ "component": "input:0", "id": 0, "event": "double_push", "ts": 2.0 }] }),
    );
    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(event, Some(PushEvent::Double));

    driver.close().await?;
    Ok(())
}
