//! Register client against the in-process controller
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::time::Duration;

use rig_modbus::simulator::RigSimulator;
use rig_modbus::{
    ConnectionParams, LinkConnector, LinkError, RegisterTransport, TcpConnector, TcpRegisterClient,
};

fn params(sim: &RigSimulator, unit_id: u8) -> ConnectionParams {
    ConnectionParams {
        host: "127.0.0.1".to_string(),
        port: sim.port(),
        unit_id,
        timeout: Duration::from_millis(500),
        probe_register: Some(100),
    }
}

#[tokio::test]
async fn test_read_rpm_and_torque_registers() {
    let sim = RigSimulator::start(1).await.unwrap();
    sim.set_register(100, 1350).await;
    sim.set_register(120, 650).await;

    let mut client = TcpRegisterClient::connect(params(&sim, 1)).await.unwrap();
    assert_eq!(client.read_holding_registers(100, 1).await.unwrap(), vec![1350]);
    assert_eq!(client.read_holding_registers(120, 1).await.unwrap(), vec![650]);
}

#[tokio::test]
async fn test_write_speed_register() {
    let sim = RigSimulator::start(1).await.unwrap();

    let mut client = TcpRegisterClient::connect(params(&sim, 1)).await.unwrap();
    client.write_single_register(100, 12150).await.unwrap();
    client.write_single_register(100, 3510).await.unwrap();

    assert_eq!(sim.writes().await, vec![(100, 12150), (100, 3510)]);
    assert_eq!(sim.register(100).await, Some(3510));
}

#[tokio::test]
async fn test_exception_keeps_session_usable() {
    let sim = RigSimulator::start(1).await.unwrap();
    sim.fail_address(120).await;
    sim.set_register(100, 42).await;

    let mut client = TcpRegisterClient::connect(params(&sim, 1)).await.unwrap();
    let err = client.read_holding_registers(120, 1).await.unwrap_err();
    assert_eq!(
        err,
        LinkError::Exception {
            function: 0x03,
            code: 0x02
        }
    );
    assert!(!err.needs_reconnect());

    assert_eq!(client.read_holding_registers(100, 1).await.unwrap(), vec![42]);
}

#[tokio::test]
async fn test_wrong_unit_times_out() {
    let sim = RigSimulator::start(1).await.unwrap();

    let mut client = TcpRegisterClient::connect(params(&sim, 7)).await.unwrap();
    let err = client.read_holding_registers(100, 1).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout(_)));
    assert!(err.needs_reconnect());
}

#[tokio::test]
async fn test_connector_handshake() {
    let sim = RigSimulator::start(1).await.unwrap();
    sim.set_register(100, 1350).await;

    let connector = TcpConnector::new(params(&sim, 1));
    assert!(connector.endpoint().ends_with("unit=1"));

    let mut transport = connector.connect().await.unwrap();
    assert_eq!(sim.request_count().await, 1);
    assert_eq!(transport.read_holding_registers(100, 1).await.unwrap(), vec![1350]);
    transport.close().await;
}

#[tokio::test]
async fn test_connector_probe_exception_still_connects() {
    let sim = RigSimulator::start(1).await.unwrap();
    sim.fail_address(100).await;

    let connector = TcpConnector::new(params(&sim, 1));
    assert!(connector.connect().await.is_ok());
}

#[tokio::test]
async fn test_connector_dead_controller() {
    let sim = RigSimulator::start(1).await.unwrap();
    sim.set_drop_connections(true).await;

    let connector = TcpConnector::new(params(&sim, 1));
    let err = connector.connect().await.err().unwrap();
    assert!(matches!(err, LinkError::Connection(ref msg) if msg.contains("Handshake")));
}

#[tokio::test]
async fn test_session_lost_mid_operation() {
    let sim = RigSimulator::start(1).await.unwrap();

    let mut client = TcpRegisterClient::connect(params(&sim, 1)).await.unwrap();
    client.read_holding_registers(100, 1).await.unwrap();

    sim.set_drop_connections(true).await;
    let err = client.read_holding_registers(100, 1).await.unwrap_err();
    assert!(err.needs_reconnect());
}
