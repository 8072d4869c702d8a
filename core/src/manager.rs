//! ConnectionManager: the controller process's only loop.
//!
//! SESSION ORDER (fixed, never reordered):
//!   1. Connect (client dials, or server accepts one engine)
//!   2. hello / welcome, protocol version check
//!   3. Scenario descriptor
//!   4. Register and activate the controller's declared subscriptions
//!   5. Loop: schedule_ack → step → resolve → dispatch → take schedule
//!
//! RULES:
//!   - One request in flight. The engine's reply is the only suspension point.
//!   - Every step the engine delivers is resolved and acknowledged, in order.
//!   - Per-step and per-command errors are logged and contained.
//!   - Channel and protocol errors end the session. No reconnect.

use serde::Serialize;

use crate::{
    channel::{self, ConnectionMode, StateChannel, TcpTransport, Transport},
    config::SessionConfig,
    controller::{Controller, ControllerState, StepContext},
    error::{ControlError, ControlResult},
    protocol::{Request, Response, StepPayload, PROTOCOL_VERSION},
    scenario::Scenario,
    scheduler::Scheduler,
    subscription::SubscriptionRegistry,
    types::{SessionId, SimTime},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// The engine said `closed` (simulation finished or aborted).
    EngineClosed { reason: Option<String> },
    /// The controller asked to disconnect.
    ControllerDisconnected,
    /// A fatal channel or protocol error.
    Failed { error: String },
}

/// What happened during one session. Returned once the session is over.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session_id:      SessionId,
    pub controller:      String,
    pub engine:          String,
    pub end_reason:      EndReason,
    pub final_state:     ControllerState,
    pub steps_seen:      u64,
    pub invocations:     u64,
    pub commands_issued: u64,
    pub last_time:       Option<SimTime>,
    /// The fatal error, if any. Not serialized; see `end_reason`.
    #[serde(skip)]
    pub error:           Option<ControlError>,
}

impl SessionReport {
    /// True unless the session ended on a fatal error.
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// One controller-engine connection and everything scoped to it.
pub struct Session<T: Transport> {
    pub id:          SessionId,
    pub host:        String,
    pub port:        u16,
    pub mode:        ConnectionMode,
    engine:          String,
    channel:         StateChannel<T>,
    registry:        SubscriptionRegistry,
    scheduler:       Scheduler,
    state:           ControllerState,
    /// Activation time last forwarded to the engine.
    wake_at:         Option<SimTime>,
    last_time:       Option<SimTime>,
    steps_seen:      u64,
    invocations:     u64,
    commands_issued: u64,
}

impl<T: Transport> Session<T> {
    pub fn new(config: &SessionConfig, channel: StateChannel<T>) -> Self {
        Self {
            id:              uuid::Uuid::new_v4().to_string(),
            host:            config.host.clone(),
            port:            config.port,
            mode:            config.mode,
            engine:          String::new(),
            channel,
            registry:        SubscriptionRegistry::new(),
            scheduler:       Scheduler::new(),
            state:           ControllerState::Uninitialized,
            wake_at:         None,
            last_time:       None,
            steps_seen:      0,
            invocations:     0,
            commands_issued: 0,
        }
    }

    fn setup(
        &mut self,
        controller: &dyn Controller,
        scenario: &Scenario,
        gui_mode: bool,
    ) -> ControlResult<()> {
        let hello = Request::Hello {
            protocol_version: PROTOCOL_VERSION,
            controller:       controller.name().to_string(),
            gui_mode,
        };
        match self.channel.send_request(hello)? {
            Response::Welcome { protocol_version, engine } if protocol_version == PROTOCOL_VERSION => {
                log::info!("[{}] engine '{engine}' speaks protocol v{protocol_version}", self.id);
                self.engine = engine;
            }
            Response::Welcome { protocol_version, .. } => {
                return Err(ControlError::protocol(
                    format!("protocol v{PROTOCOL_VERSION}"),
                    format!("protocol v{protocol_version}"),
                ));
            }
            other => return Err(ControlError::protocol("welcome", other.kind())),
        }

        self.channel.send_expect_ack(scenario.to_request())?;
        log::info!(
            "[{}] scenario {} sent ({} bytes)",
            self.id,
            scenario.file_name,
            scenario.content.len()
        );

        for (i, subscription) in controller.subscriptions().into_iter().enumerate() {
            let name = subscription.name.clone();
            self.registry.register_subscription(subscription, true)?;
            if i == 0 {
                self.registry.set_default(&name)?;
            }
        }
        self.registry.flush(&mut self.channel)?;
        Ok(())
    }

    fn drive(&mut self, controller: &mut dyn Controller) -> ControlResult<EndReason> {
        loop {
            let ack = Request::ScheduleAck { next_time: self.wake_at };
            let payload = match self.channel.send_request(ack)? {
                Response::Step(payload) => payload,
                Response::Closed { reason } => {
                    log::info!("[{}] engine closed the session: {reason:?}", self.id);
                    return Ok(EndReason::EngineClosed { reason });
                }
                other => return Err(ControlError::protocol("step or closed", other.kind())),
            };

            if self.handle_step(controller, &payload)? {
                match self.channel.send_request(Request::Disconnect)? {
                    Response::Ack | Response::Closed { .. } => {}
                    other => return Err(ControlError::protocol("ack for disconnect", other.kind())),
                }
                log::info!("[{}] controller disconnected at t={}", self.id, payload.time);
                return Ok(EndReason::ControllerDisconnected);
            }
        }
    }

    /// Resolve one step and dispatch it. Returns true if the controller
    /// asked to disconnect.
    fn handle_step(
        &mut self,
        controller: &mut dyn Controller,
        payload: &StepPayload,
    ) -> ControlResult<bool> {
        let time = payload.time;
        if !time.is_finite() {
            return Err(ControlError::protocol("finite step time", time.to_string()));
        }
        if let Some(previous) = self.last_time {
            if time < previous {
                return Err(ControlError::TimeRegression { previous, current: time });
            }
        }
        self.last_time = Some(time);
        self.steps_seen += 1;

        let snapshot = self.registry.resolve(payload);

        let qualifying = match self.state {
            ControllerState::Uninitialized => true,
            ControllerState::Running       => self.wake_at.map_or(true, |wake| time >= wake),
            ControllerState::Terminated    => return Err(ControlError::ChannelClosed),
        };
        if !qualifying {
            log::trace!("[{}] t={time} before wake-up at {:?}, acknowledging only", self.id, self.wake_at);
            return Ok(false);
        }

        let mut ctx = StepContext::new(
            time,
            &mut self.registry,
            &mut self.channel,
            &mut self.scheduler,
            &mut self.commands_issued,
        );
        let result = if self.state == ControllerState::Uninitialized {
            self.state = ControllerState::Running;
            log::debug!("[{}] t={time} on_init", self.id);
            controller.on_init(time, &snapshot, &mut ctx)
        } else {
            controller.on_step(time, &snapshot, &mut ctx)
        };
        let disconnect = ctx.disconnect_requested();
        drop(ctx);
        self.invocations += 1;

        if let Err(e) = result {
            if e.is_fatal() {
                return Err(e);
            }
            log::warn!("[{}] t={time} {} error contained: {e}", self.id, controller.name());
        }

        // Subscriptions the controller registered during the callback.
        if let Err(e) = self.registry.flush(&mut self.channel) {
            if e.is_fatal() {
                return Err(e);
            }
            log::warn!("[{}] t={time} subscription request refused: {e}", self.id);
        }

        self.wake_at = self.scheduler.take();
        log::debug!("[{}] t={time} next activation {:?}", self.id, self.wake_at);
        Ok(disconnect)
    }

    fn finish(
        mut self,
        controller: &dyn Controller,
        outcome: ControlResult<EndReason>,
    ) -> SessionReport {
        self.state = ControllerState::Terminated;
        let (end_reason, error) = match outcome {
            Ok(reason) => (reason, None),
            Err(e) => {
                log::error!("[{}] session failed: {e}", self.id);
                (EndReason::Failed { error: e.to_string() }, Some(e))
            }
        };
        if let Err(e) = self.channel.close() {
            log::debug!("[{}] close failed: {e}", self.id);
        }
        log::info!(
            "[{}] session over: steps={} invocations={} commands={} last_t={:?}",
            self.id,
            self.steps_seen,
            self.invocations,
            self.commands_issued,
            self.last_time
        );
        SessionReport {
            session_id:      self.id.clone(),
            controller:      controller.name().to_string(),
            engine:          std::mem::take(&mut self.engine),
            end_reason,
            final_state:     self.state,
            steps_seen:      self.steps_seen,
            invocations:     self.invocations,
            commands_issued: self.commands_issued,
            last_time:       self.last_time,
            error,
        }
    }
}

pub struct ConnectionManager {
    config: SessionConfig,
}

impl ConnectionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect over TCP and run the whole session.
    /// Only a failed connect is returned as `Err`; everything after that
    /// ends up in the report.
    pub fn start(
        &self,
        controller: &mut dyn Controller,
        scenario: &Scenario,
    ) -> ControlResult<SessionReport> {
        let channel: StateChannel<TcpTransport> = channel::connect(
            &self.config.host,
            self.config.port,
            self.config.mode,
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )?;
        Ok(self.run(channel, controller, scenario))
    }

    /// Run a session over an already-open channel.
    pub fn run<T: Transport>(
        &self,
        channel: StateChannel<T>,
        controller: &mut dyn Controller,
        scenario: &Scenario,
    ) -> SessionReport {
        let mut session = Session::new(&self.config, channel);
        log::info!(
            "[{}] session start: controller={} engine={}:{} mode={:?}",
            session.id,
            controller.name(),
            session.host,
            session.port,
            session.mode
        );
        let outcome = session
            .setup(controller, scenario, self.config.gui_mode)
            .and_then(|()| session.drive(controller));
        session.finish(controller, outcome)
    }
}
