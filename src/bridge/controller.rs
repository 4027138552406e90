//! The per-session actor.
//!
//! Every mutation of a call's state happens inside [`BridgeController::run`],
//! one `tokio::select!` iteration at a time. Sources:
//! - carrier leg inbound frames
//! - engine leg inbound frames (once attached)
//! - results of spawned work (engine connect, agent lookup, tool dispatch)
//! - keepalive ticks (Active only)
//! - the hard maximum-duration deadline
//! - the session cancellation token

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::{BridgeSession, SessionWarning};
use super::{BridgeDeps, BridgeState, CloseReason, SessionReport};
use crate::agent::{self, AgentConfig, CallerOverrides, SessionAgent};
use crate::audio::{rechunk, Transcoder, CARRIER_FRAME_BYTES};
use crate::error::ProtocolError;
use crate::finalizer::{FinalizeOutcome, SkipReason};
use crate::recorder::ConversationRecorder;
use crate::tools::{ToolCall, ToolLedger, ToolOutput};
use crate::voice::carrier::{self, CarrierEvent, MediaPayload, StartMetadata};
use crate::voice::openai_realtime;
use crate::voice::{EngineEvent, Leg, LegInbound, LegOutbound};

const INTERNAL_CHANNEL_CAPACITY: usize = 32;

/// Log relay progress every this many frames.
const FRAME_LOG_INTERVAL: u64 = 50;

/// Results of work spawned off the relay path.
enum InternalEvent {
    EngineAttached(anyhow::Result<Leg>),
    AgentConfigLoaded(Option<AgentConfig>),
    ToolResolved(ToolOutput),
    CloseRequested,
}

enum AgentLookup {
    Pending,
    Done(Option<AgentConfig>),
}

/// Ends a running session from outside its task.
#[derive(Clone)]
pub struct CloseHandle {
    tx: mpsc::Sender<InternalEvent>,
}

impl CloseHandle {
    /// Request teardown. A no-op once the session is closing.
    pub async fn close(&self) {
        let _ = self.tx.send(InternalEvent::CloseRequested).await;
    }
}

/// Bridge one call from carrier connect to finalization.
pub async fn run_session(
    carrier: Leg,
    tenant_hint: Option<String>,
    deps: BridgeDeps,
) -> anyhow::Result<SessionReport> {
    let controller = BridgeController::new(carrier, tenant_hint, deps)?;
    Ok(controller.run().await)
}

pub struct BridgeController {
    deps: BridgeDeps,
    state: BridgeState,
    session: BridgeSession,
    transcoder: Transcoder,
    carrier: Leg,
    engine: Option<Leg>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    keepalive: Option<Interval>,
    cancel: CancellationToken,
    recorder: ConversationRecorder,
    ledger: ToolLedger,
    /// Tool names announced by `response.output_item.added`, by call id.
    announced_tools: HashMap<String, String>,
    overrides: CallerOverrides,
    lookup: AgentLookup,
    /// Agent last sent to the engine in a `session.update`.
    applied: Option<SessionAgent>,
    greeting_sent: bool,
    duration_notice_sent: bool,
    close_reason: Option<CloseReason>,
}

impl BridgeController {
    /// `tenant_hint` is whatever the listener resolved before the call
    /// started (e.g. from the upgrade URL). The carrier `start` event
    /// overrides it.
    pub fn new(
        carrier: Leg,
        tenant_hint: Option<String>,
        deps: BridgeDeps,
    ) -> anyhow::Result<Self> {
        let transcoder = Transcoder::new(deps.config.engine.audio)?;
        let cancel = deps.shutdown.child_token();
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);

        Ok(Self {
            deps,
            state: BridgeState::Idle,
            session: BridgeSession::new(tenant_hint),
            transcoder,
            carrier,
            engine: None,
            internal_tx,
            internal_rx,
            keepalive: None,
            cancel,
            recorder: ConversationRecorder::new(),
            ledger: ToolLedger::new(),
            announced_tools: HashMap::new(),
            overrides: CallerOverrides::default(),
            lookup: AgentLookup::Pending,
            applied: None,
            greeting_sent: false,
            duration_notice_sent: false,
            close_reason: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: self.internal_tx.clone(),
        }
    }

    /// Drive the call to completion. Returns after both legs are closed and
    /// the finalizer has finished.
    pub async fn run(mut self) -> SessionReport {
        self.state = BridgeState::CarrierConnected;
        tracing::info!(
            session_id = %self.session.session_id,
            tenant_hint = ?self.session.tenant_id,
            audio = self.transcoder.mode().engine_format(),
            "Carrier leg connected"
        );

        let deadline = tokio::time::sleep(self.deps.config.timing.max_session());
        tokio::pin!(deadline);

        while !self.session.is_closed() {
            tokio::select! {
                msg = self.carrier.inbound.recv() => self.on_carrier_message(msg),
                msg = next_engine_message(&mut self.engine) => self.on_engine_message(msg),
                Some(event) = self.internal_rx.recv() => self.on_internal_event(event),
                () = next_keepalive_tick(&mut self.keepalive) => self.on_keepalive(),
                () = &mut deadline => {
                    tracing::warn!(
                        session_id = %self.session.session_id,
                        max_session_secs = self.deps.config.timing.max_session_secs,
                        "Maximum session duration reached"
                    );
                    self.close(CloseReason::MaxDuration);
                }
                () = self.cancel.cancelled() => {
                    self.close(CloseReason::Shutdown);
                }
            }
        }

        self.shutdown().await
    }

    // ── Closing ──────────────────────────────────────────────────

    /// Enter `Closing`. Only the first call has any effect.
    fn close(&mut self, reason: CloseReason) -> bool {
        if !self.session.mark_closed() {
            tracing::debug!(
                session_id = %self.session.session_id,
                reason = ?reason,
                "Session already closing"
            );
            return false;
        }

        tracing::info!(
            session_id = %self.session.session_id,
            call_sid = ?self.session.call_sid,
            reason = ?reason,
            "Closing session"
        );
        self.state = BridgeState::Closing;
        self.close_reason = Some(reason);
        if self.keepalive.take().is_some() {
            tracing::debug!(session_id = %self.session.session_id, "Keepalive stopped");
        }
        // Stops the engine connect, agent lookup and in-flight tool calls.
        self.cancel.cancel();
        true
    }

    async fn shutdown(mut self) -> SessionReport {
        if let Some(engine) = self.engine.take() {
            let _ = engine.outbound.send(LegOutbound::Close);
        }
        let _ = self.carrier.outbound.send(LegOutbound::Close);

        // An engine leg that connected after close still needs closing.
        while let Ok(event) = self.internal_rx.try_recv() {
            if let InternalEvent::EngineAttached(Ok(leg)) = event {
                let _ = leg.outbound.send(LegOutbound::Close);
            }
        }

        let finalize = match &self.deps.finalizer {
            Some(finalizer) => {
                finalizer
                    .finalize(
                        &self.session.snapshot(),
                        self.recorder.turns(),
                        &self.deps.shutdown,
                    )
                    .await
            }
            None => FinalizeOutcome::Skipped(SkipReason::Disabled),
        };

        self.state = BridgeState::Closed;
        tracing::info!(
            session_id = %self.session.session_id,
            call_sid = ?self.session.call_sid,
            inbound_frames = self.session.inbound_frames,
            outbound_frames = self.session.outbound_seq,
            dropped_frames = self.session.dropped_frames,
            turns = self.recorder.turns().len(),
            "Session closed"
        );

        SessionReport {
            session_id: self.session.session_id.clone(),
            call_sid: self.session.call_sid.clone(),
            tenant_id: self.session.tenant_id.clone(),
            close_reason: self.close_reason.take().unwrap_or(CloseReason::Explicit),
            finalize,
            inbound_frames: self.session.inbound_frames,
            outbound_frames: self.session.outbound_seq,
            dropped_frames: self.session.dropped_frames,
            config_source: self.session.config_source,
            warnings: self.session.warnings().to_vec(),
            transcript: self.recorder.turns().to_vec(),
        }
    }

    // ── Carrier leg ──────────────────────────────────────────────

    fn on_carrier_message(&mut self, msg: Option<LegInbound>) {
        match msg {
            Some(LegInbound::Text(text)) => self.on_carrier_text(&text),
            Some(LegInbound::Closed) | None => {
                self.close(CloseReason::CarrierClosed);
            }
            Some(LegInbound::Error(e)) => {
                tracing::warn!(session_id = %self.session.session_id, error = %e, "Carrier leg failed");
                self.close(CloseReason::CarrierError(e));
            }
        }
    }

    fn on_carrier_text(&mut self, text: &str) {
        let event = match carrier::parse_carrier_message(text) {
            Ok(event) => event,
            Err(ProtocolError::UnknownEvent(kind)) => {
                tracing::debug!(session_id = %self.session.session_id, event = %kind, "Ignoring carrier event");
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session.session_id, error = %e, "Malformed carrier message");
                return;
            }
        };

        match event {
            CarrierEvent::Connected { protocol } => {
                tracing::debug!(session_id = %self.session.session_id, protocol = ?protocol, "Carrier stream connected");
            }
            CarrierEvent::Start { start } => self.on_start(start),
            CarrierEvent::Media { media } => self.on_carrier_media(&media),
            CarrierEvent::Mark { mark } => {
                tracing::debug!(session_id = %self.session.session_id, mark = %mark.name, "Playback mark reached");
            }
            CarrierEvent::Stop { .. } => {
                tracing::info!(session_id = %self.session.session_id, "Carrier sent stop");
                self.close(CloseReason::Stop);
            }
        }
    }

    fn on_start(&mut self, start: StartMetadata) {
        if self.state != BridgeState::CarrierConnected {
            tracing::warn!(session_id = %self.session.session_id, "Duplicate start event ignored");
            return;
        }

        let tenant_id =
            agent::resolve_tenant(self.session.tenant_id.as_deref(), start.tenant_id().as_deref());
        self.session.apply_start(&start, tenant_id);
        self.overrides = CallerOverrides::from_start(&start);
        self.state = BridgeState::EngineConnecting;

        tracing::info!(
            session_id = %self.session.session_id,
            call_sid = ?self.session.call_sid,
            stream_sid = ?self.session.stream_sid,
            tenant_id = ?self.session.tenant_id,
            caller = ?self.session.caller_number,
            "Call started"
        );

        self.spawn_engine_connect();
        self.spawn_agent_lookup();
    }

    fn on_carrier_media(&mut self, media: &MediaPayload) {
        self.session.inbound_frames += 1;
        if !media.is_inbound_track() {
            return;
        }
        let audio = match media.decode() {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(session_id = %self.session.session_id, error = %e, "Undecodable carrier media");
                return;
            }
        };

        let ready = self.engine.is_some()
            && matches!(self.state, BridgeState::EngineReady | BridgeState::Active);
        if !ready {
            self.session.dropped_frames += 1;
            tracing::debug!(
                session_id = %self.session.session_id,
                state = ?self.state,
                "Engine not ready, dropping caller audio"
            );
            return;
        }

        let converted = self.transcoder.to_engine_format(&audio);
        for frame in rechunk(&converted, self.transcoder.engine_frame_bytes()) {
            if !self.send_engine_audio(openai_realtime::audio_append(frame)) {
                self.session.dropped_frames += 1;
            }
        }

        if self.session.inbound_frames % FRAME_LOG_INTERVAL == 0 {
            tracing::debug!(
                session_id = %self.session.session_id,
                frames = self.session.inbound_frames,
                "Relaying caller audio"
            );
        }
    }

    // ── Engine leg ───────────────────────────────────────────────

    fn on_engine_message(&mut self, msg: Option<LegInbound>) {
        match msg {
            Some(LegInbound::Text(text)) => match openai_realtime::parse_server_event(&text) {
                Ok(event) => self.on_engine_event(event),
                Err(e) => {
                    tracing::warn!(session_id = %self.session.session_id, error = %e, "Malformed engine event");
                }
            },
            Some(LegInbound::Closed) | None => {
                tracing::info!(session_id = %self.session.session_id, "Engine leg closed");
                self.close(CloseReason::EngineClosed);
            }
            Some(LegInbound::Error(e)) => {
                tracing::warn!(session_id = %self.session.session_id, error = %e, "Engine leg failed");
                self.close(CloseReason::EngineError(e));
            }
        }
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SessionCreated => self.on_session_created(),
            EngineEvent::SessionUpdated => self.on_session_updated(),
            EngineEvent::Audio { data } => self.on_engine_audio(&data),
            EngineEvent::OutputTranscriptDelta { text } => self.recorder.assistant_delta(&text),
            EngineEvent::OutputTranscriptDone { text } => {
                tracing::debug!(session_id = %self.session.session_id, transcript = %text, "Assistant turn");
                self.recorder.assistant_done(&text);
            }
            EngineEvent::InputTranscript { text } => {
                tracing::debug!(session_id = %self.session.session_id, transcript = %text, "Caller turn");
                self.recorder.caller(&text);
            }
            EngineEvent::FunctionCallStarted { call_id, name } => {
                self.announced_tools.insert(call_id, name);
            }
            EngineEvent::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let announced = self.announced_tools.remove(&call_id);
                // A nameless call still gets an unknown-tool reply.
                let name = name.or(announced).unwrap_or_else(|| {
                    tracing::warn!(session_id = %self.session.session_id, call_id = %call_id, "Tool call without a name");
                    String::new()
                });
                self.on_function_call(ToolCall {
                    name,
                    call_id,
                    arguments,
                });
            }
            EngineEvent::SpeechStarted => self.on_barge_in(),
            EngineEvent::ResponseDone => self.on_response_done(),
            EngineEvent::Error { message } => {
                tracing::warn!(session_id = %self.session.session_id, error = %message, "Engine reported an error");
            }
            EngineEvent::Ignored { event_type } => {
                tracing::trace!(session_id = %self.session.session_id, event = %event_type, "Engine event ignored");
            }
        }
    }

    fn on_session_created(&mut self) {
        if self.state != BridgeState::EngineConnecting {
            tracing::debug!(session_id = %self.session.session_id, state = ?self.state, "Unexpected session.created");
            return;
        }
        self.state = BridgeState::EngineReady;

        if matches!(self.lookup, AgentLookup::Pending) {
            tracing::info!(
                session_id = %self.session.session_id,
                "Agent config still loading, applying default configuration"
            );
            self.session.warn(SessionWarning::DefaultConfig);
        }
        let agent = self.resolve_agent();
        self.apply_agent(agent);
    }

    fn on_session_updated(&mut self) {
        match self.state {
            BridgeState::EngineReady => {
                self.state = BridgeState::Active;
                self.start_keepalive();
                tracing::info!(session_id = %self.session.session_id, "Engine configured, bridge active");
                self.maybe_greet();
            }
            BridgeState::Active => {
                tracing::debug!(session_id = %self.session.session_id, "Engine applied session update");
                self.maybe_greet();
            }
            _ => {
                tracing::debug!(session_id = %self.session.session_id, state = ?self.state, "Unexpected session.updated");
            }
        }
    }

    fn on_engine_audio(&mut self, data: &[u8]) {
        let converted = self.transcoder.to_carrier_format(data);
        self.send_playback(&converted);
    }

    /// Queue converted engine audio toward the caller in carrier frames.
    fn send_playback(&mut self, audio: &[u8]) {
        if audio.is_empty() {
            return;
        }
        let Some(stream_sid) = self.session.stream_sid.clone() else {
            self.session.dropped_frames += 1;
            tracing::debug!(session_id = %self.session.session_id, "No carrier stream yet, dropping engine audio");
            return;
        };

        for frame in rechunk(audio, CARRIER_FRAME_BYTES) {
            if send_text(&self.carrier, carrier::media_message(&stream_sid, frame)) {
                self.session.outbound_seq += 1;
                if self.session.outbound_seq % FRAME_LOG_INTERVAL == 0 {
                    tracing::debug!(
                        session_id = %self.session.session_id,
                        frames = self.session.outbound_seq,
                        "Relaying engine audio"
                    );
                }
            } else {
                self.session.dropped_frames += 1;
                tracing::debug!(session_id = %self.session.session_id, "Carrier writer gone, dropping engine audio");
            }
        }
    }

    fn on_response_done(&mut self) {
        self.recorder.boundary();
        let tail = self.transcoder.finish_carrier();
        self.send_playback(&tail);
    }

    /// The caller started talking over the assistant: flush queued playback
    /// and stop the assistant turn.
    fn on_barge_in(&mut self) {
        tracing::debug!(session_id = %self.session.session_id, "Caller speech started");
        self.recorder.interrupt();
        self.transcoder.reset_carrier();
        if let Some(stream_sid) = &self.session.stream_sid {
            send_text(&self.carrier, carrier::clear_message(stream_sid));
        }
    }

    fn on_function_call(&mut self, call: ToolCall) {
        if let Err(duplicate) = self.ledger.accept(&call) {
            tracing::warn!(session_id = %self.session.session_id, error = %duplicate, "Ignoring repeated tool call");
            return;
        }
        tracing::info!(
            session_id = %self.session.session_id,
            call_id = %call.call_id,
            tool = %call.name,
            "Dispatching tool call"
        );

        let mediator = Arc::clone(&self.deps.mediator);
        let tenant_id = self.session.tenant_id.clone();
        let tx = self.internal_tx.clone();
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(call_id = %call.call_id, "Tool call cancelled with its session");
                }
                output = mediator.dispatch(&call, tenant_id.as_deref()) => {
                    let _ = tx.send(InternalEvent::ToolResolved(output)).await;
                }
            }
        });
    }

    // ── Spawned work ─────────────────────────────────────────────

    fn spawn_engine_connect(&self) {
        let connector = Arc::clone(&self.deps.engine);
        let session_id = self.session.session_id.clone();
        let tx = self.internal_tx.clone();
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                result = connector.connect(&session_id) => {
                    let _ = tx.send(InternalEvent::EngineAttached(result)).await;
                }
            }
        });
    }

    fn spawn_agent_lookup(&mut self) {
        let (Some(source), Some(tenant_id)) =
            (self.deps.agents.clone(), self.session.tenant_id.clone())
        else {
            self.on_agent_config(None);
            return;
        };

        let session_id = self.session.session_id.clone();
        let tx = self.internal_tx.clone();
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            let config = tokio::select! {
                () = token.cancelled() => return,
                result = source.fetch(&tenant_id) => match result {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            tenant_id = %tenant_id,
                            error = %e,
                            "Agent config lookup failed, using default"
                        );
                        None
                    }
                },
            };
            let _ = tx.send(InternalEvent::AgentConfigLoaded(config)).await;
        });
    }

    fn on_internal_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::EngineAttached(Ok(leg)) => {
                tracing::info!(session_id = %self.session.session_id, "Engine leg connected");
                self.engine = Some(leg);
            }
            InternalEvent::EngineAttached(Err(e)) => {
                tracing::error!(session_id = %self.session.session_id, error = %e, "Engine connection failed");
                self.close(CloseReason::EngineConnectFailed(e.to_string()));
            }
            InternalEvent::AgentConfigLoaded(config) => self.on_agent_config(config),
            InternalEvent::ToolResolved(output) => self.on_tool_resolved(output),
            InternalEvent::CloseRequested => {
                self.close(CloseReason::Explicit);
            }
        }
    }

    // ── Agent configuration ──────────────────────────────────────

    fn on_agent_config(&mut self, config: Option<AgentConfig>) {
        if config.is_none() {
            tracing::info!(
                session_id = %self.session.session_id,
                tenant_id = ?self.session.tenant_id,
                "No stored agent config, using default receptionist"
            );
            self.session.warn(SessionWarning::DomainMismatch);
        }
        self.lookup = AgentLookup::Done(config);

        // The default already went out; re-apply if the result differs.
        if self.applied.is_some() {
            let agent = self.resolve_agent();
            if self.applied.as_ref() != Some(&agent) {
                tracing::info!(
                    session_id = %self.session.session_id,
                    "Agent config arrived after default, re-applying"
                );
                self.apply_agent(agent);
            }
        }
    }

    fn resolve_agent(&self) -> SessionAgent {
        let stored = match &self.lookup {
            AgentLookup::Done(config) => config.as_ref(),
            AgentLookup::Pending => None,
        };
        SessionAgent::resolve(stored, &self.overrides, &self.deps.config.engine)
    }

    fn apply_agent(&mut self, agent: SessionAgent) {
        let message = agent::build_init_message(
            &agent,
            self.transcoder.mode(),
            &self.deps.config.engine.transcription_model,
        );
        self.send_engine(message.to_string());
        tracing::debug!(
            session_id = %self.session.session_id,
            source = ?agent.source,
            voice = %agent.voice,
            tools = agent.tools.len(),
            "Sent session.update"
        );
        self.session.business_name = agent.business_name.clone();
        self.session.config_source = Some(agent.source);
        self.applied = Some(agent);
    }

    /// Speak the greeting, once, before any conversation has happened.
    fn maybe_greet(&mut self) {
        if self.greeting_sent || !self.recorder.is_empty() {
            return;
        }
        let Some(greeting) = self.applied.as_ref().and_then(|a| a.greeting.clone()) else {
            return;
        };
        self.greeting_sent = true;
        for message in agent::greeting_messages(&greeting) {
            self.send_engine(message);
        }
    }

    // ── Tools ────────────────────────────────────────────────────

    fn on_tool_resolved(&mut self, output: ToolOutput) {
        if !self.ledger.is_pending(&output.call_id) {
            tracing::warn!(
                session_id = %self.session.session_id,
                call_id = %output.call_id,
                "Tool output for unknown or already answered call"
            );
            return;
        }
        // Resolved only once the reply is queued; a gone engine leaves it pending.
        if !self.send_engine(openai_realtime::function_call_output(
            &output.call_id,
            &output.output,
        )) {
            return;
        }
        self.ledger.resolve(&output.call_id);
        self.send_engine(openai_realtime::response_create());
    }

    // ── Timers ───────────────────────────────────────────────────

    fn start_keepalive(&mut self) {
        let period = self.deps.config.timing.keepalive_interval();
        if period.is_zero() {
            tracing::warn!(session_id = %self.session.session_id, "Keepalive disabled (zero interval)");
            return;
        }
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(interval);
    }

    fn on_keepalive(&mut self) {
        let timing = &self.deps.config.timing;
        let age = self.session.started.elapsed();
        tracing::info!(
            session_id = %self.session.session_id,
            age_secs = age.as_secs(),
            inbound_frames = self.session.inbound_frames,
            outbound_frames = self.session.outbound_seq,
            "Session keepalive"
        );

        if self.duration_notice_sent || age < timing.warning_at() {
            return;
        }
        self.duration_notice_sent = true;
        tracing::warn!(
            session_id = %self.session.session_id,
            age_secs = age.as_secs(),
            max_session_secs = timing.max_session_secs,
            "Session approaching maximum duration"
        );
        if self.state == BridgeState::Active {
            for message in agent::duration_notice_messages() {
                self.send_engine(message);
            }
        }
    }

    // ── Output ───────────────────────────────────────────────────

    fn send_engine(&self, text: String) -> bool {
        match &self.engine {
            Some(engine) => send_text(engine, text),
            None => {
                tracing::debug!(session_id = %self.session.session_id, "No engine leg, message dropped");
                false
            }
        }
    }

    /// Relay caller audio. A full engine queue drops the frame.
    fn send_engine_audio(&self, text: String) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };
        match engine.audio.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %self.session.session_id, "Engine audio queue full, caller frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Queue one control or playback frame. Fails only once the writer is gone.
fn send_text(leg: &Leg, text: String) -> bool {
    leg.outbound.send(LegOutbound::Text(text)).is_ok()
}

async fn next_engine_message(engine: &mut Option<Leg>) -> Option<LegInbound> {
    match engine {
        Some(leg) => leg.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_keepalive_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
