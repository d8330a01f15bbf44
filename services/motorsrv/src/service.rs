//! Service wiring
//!
//! Builds the link, hub, command channel and poller from one config and owns
//! their background tasks. Everything stops on one cancellation token.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use rig_modbus::{LinkConnector, TcpConnector};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{create_router, ApiState};
use crate::command::CommandChannel;
use crate::config::MotorSrvConfig;
use crate::fanout::{EventHub, HubEvent};
use crate::link::MotorLink;
use crate::poller::TelemetryPoller;

pub struct MotorService {
    config: MotorSrvConfig,
    link: Arc<MotorLink>,
    hub: EventHub,
    command: Arc<CommandChannel>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl MotorService {
    pub fn new(
        config: MotorSrvConfig,
        connector: Arc<dyn LinkConnector>,
        shutdown: CancellationToken,
    ) -> Self {
        let link = Arc::new(MotorLink::new(
            connector,
            config.reconnect_policy(),
            config.op_timeout(),
        ));
        let hub = EventHub::new(config.fanout.capacity);
        let command = Arc::new(CommandChannel::new(
            Arc::clone(&link),
            hub.clone(),
            config.converter(),
            config.registers.speed_command,
        ));

        Self {
            config,
            link,
            hub,
            command,
            shutdown,
            tasks: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Service talking Modbus TCP to `config.motor`
    pub fn with_tcp(config: MotorSrvConfig, shutdown: CancellationToken) -> Self {
        let connector = Arc::new(TcpConnector::new(config.connection_params()));
        Self::new(config, connector, shutdown)
    }

    pub fn config(&self) -> &MotorSrvConfig {
        &self.config
    }

    pub fn link(&self) -> &Arc<MotorLink> {
        &self.link
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn command(&self) -> &Arc<CommandChannel> {
        &self.command
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the status forwarder, the reconnect supervisor and the poller
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Service already started");
            return;
        }

        // Subscribe before the supervisor runs so the first transition is forwarded
        self.tasks.push(spawn_status_forwarder(
            Arc::clone(&self.link),
            self.hub.clone(),
            self.shutdown.child_token(),
        ));

        if let Some(handle) = self.link.start_supervisor(self.shutdown.child_token()) {
            self.tasks.push(handle);
        }

        let poller = TelemetryPoller::new(
            Arc::clone(&self.link),
            self.hub.clone(),
            self.config.converter(),
            self.config.registers,
            self.config.poll_interval(),
            self.config.poll_cooldown(),
        );
        self.tasks
            .push(tokio::spawn(poller.run(self.shutdown.child_token())));

        info!(
            "Service started: motor {} poll {}ms",
            self.link.endpoint(),
            self.config.polling.interval_ms
        );
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            link: Arc::clone(&self.link),
            hub: self.hub.clone(),
            command: Arc::clone(&self.command),
            registers: self.config.registers,
            unit_id: self.config.motor.unit_id,
            started_at: self.started_at,
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.api_state())
    }

    /// Cancel every task, wait for them, then close the link
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.tasks {
            if let Err(e) = handle.await {
                warn!("Task ended abnormally: {}", e);
            }
        }
        self.link.close().await;
        info!("Service stopped");
    }
}

/// Republish every link transition as a `linkStatus` event
fn spawn_status_forwarder(
    link: Arc<MotorLink>,
    hub: EventHub,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut transitions = link.subscribe_transitions();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = transitions.recv() => match received {
                    Ok(status) => {
                        hub.publish(HubEvent::LinkStatus(status));
                    },
                    Err(RecvError::Lagged(n)) => {
                        warn!("Status forwarder lagged by {}", n);
                        hub.publish(HubEvent::LinkStatus(link.status()));
                    },
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::fanout::Topic;
    use crate::link::LinkState;
    use crate::test_utils::FakeRig;

    #[tokio::test(start_paused = true)]
    async fn test_link_status_forwarded() {
        let rig = FakeRig::new();
        let mut service = MotorService::new(
            MotorSrvConfig::default(),
            rig.connector(),
            CancellationToken::new(),
        );
        let mut statuses = service.hub().subscribe_topics(&[Topic::LinkStatus]);
        service.start();

        let mut states = Vec::new();
        for _ in 0..2 {
            match statuses.recv().await.unwrap() {
                HubEvent::LinkStatus(status) => states.push(status.state),
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(states, vec![LinkState::Connecting, LinkState::Connected]);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_tasks_and_closes_link() {
        let rig = FakeRig::new();
        let mut service = MotorService::new(
            MotorSrvConfig::default(),
            rig.connector(),
            CancellationToken::new(),
        );
        service.start();
        // Second start is a no-op
        service.start();

        let mut state_rx = service.link().subscribe_state();
        state_rx
            .wait_for(|s| s.state.is_connected())
            .await
            .unwrap();

        let link = Arc::clone(service.link());
        service.shutdown().await;
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(rig.closed_sessions().await, 1);
    }
}
