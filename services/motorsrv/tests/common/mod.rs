//! Shared helpers for motorsrv integration tests
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use motorsrv::test_utils::FakeRig;
use motorsrv::{HubEvent, LinkState, LinkStatus, MotorService, MotorSrvConfig, TelemetrySample};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Rig reporting raw rpm 1350 and raw torque 650
pub async fn rig_at_idle() -> FakeRig {
    let rig = FakeRig::new();
    rig.set_register(100, 1350).await;
    rig.set_register(120, 650).await;
    rig
}

pub fn service_for(rig: &FakeRig) -> MotorService {
    MotorService::new(
        MotorSrvConfig::default(),
        rig.connector(),
        CancellationToken::new(),
    )
}

pub async fn wait_connected(service: &MotorService) {
    let mut state_rx = service.link().subscribe_state();
    state_rx
        .wait_for(|status| status.state == LinkState::Connected)
        .await
        .unwrap();
}

pub async fn next_state(rx: &mut broadcast::Receiver<LinkStatus>) -> LinkState {
    rx.recv().await.unwrap().state
}

pub fn as_sample(event: HubEvent) -> TelemetrySample {
    match event {
        HubEvent::Telemetry(sample) => sample,
        other => panic!("expected telemetry, got {:?}", other),
    }
}
