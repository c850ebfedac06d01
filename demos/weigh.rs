use gofit_s2::{ConnectionParams, Result, ScaleDevice, SessionConfig, SessionStatus};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("⚖️  Gofit S2 Weighing Example");

    let params = ConnectionParams {
        read_device_info: true,
        log_services: true,
        ..Default::default()
    };

    let mut scale = match ScaleDevice::connect(params).await {
        Ok(device) => {
            info!("✅ Connected to: {}", device.device_info().name);
            device
        }
        Err(e) => {
            error!("❌ Could not connect to scale: {}", e);
            return Err(e);
        }
    };

    info!("👣 Step on the scale and stand still");

    let config = SessionConfig::default().with_bia(true);
    let result = scale.measure(&config).await;

    if let Err(e) = scale.disconnect().await {
        error!("❌ Failed to disconnect: {}", e);
    }

    let result = result?;
    println!("\n📊 Measurement");
    if let Some(weight) = result.stable_weight {
        println!("  Weight:     {weight}");
    }
    if let Some(bia) = result.bia_weight {
        println!("  BIA weight: {bia}");
    }
    println!("  Status:     {:?}", result.status);

    if result.status == SessionStatus::Mismatch {
        println!("⚠️  The two readings disagree; step on again to re-check");
    }

    Ok(())
}
