use anyhow::Result;
use domain::{DomainError, IoDriver};
use infrastructure::{DriverRegistry, DriversConfig};

#[tokio::test]
async fn test_mock_driver_end_to_end() -> Result<()> {
    let registry = DriverRegistry::from_config(&DriversConfig::default())?;
    let mut driver = registry.create("mock")?;

    assert!(matches!(
        driver.output(2).err(),
        Some(DomainError::DriverNotReady { .. })
    ));

    driver.setup(&[1, 3, 5], &[2, 4]).await?;
    assert_eq!(driver.all_io(), (vec![1, 3, 5], vec![2, 4]));

    let first = driver.output(2)?;
    let second = driver.output(2)?;
    first.set(true).await?;
    assert!(second.state().await?);
    assert!(!driver.output(4)?.state().await?);

    assert!(!driver.input(3)?.state().await?);
    assert!(matches!(
        driver.input(2).err(),
        Some(DomainError::PinNotFound { pin: 2, .. })
    ));

    driver.close().await?;
    assert!(!driver.is_ready());
    assert!(driver.output(2).is_err());
    driver.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_each_registry_instance_owns_its_pins() -> Result<()> {
    let registry = DriverRegistry::from_config(&DriversConfig::default())?;
    let mut a = registry.create("mock")?;
    let mut b = registry.create("MOCK")?;

    a.setup(&[], &[1]).await?;
    b.setup(&[], &[1]).await?;
    a.output(1)?.set(true).await?;

    assert!(!b.output(1)?.state().await?);
    Ok(())
}
