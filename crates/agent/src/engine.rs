//! Call engine: reacts to telephony events and runs one provider session
//! per active call
//!
//! ```text
//! ┌────────────┐  events   ┌────────────┐  establish  ┌─────────────────┐
//! │ Telephony  │──────────▶│ CallEngine │────────────▶│ CallSession (N) │
//! │  driver    │◀──────────│            │             │  bridge+provider│
//! └────────────┘  answer/  └────────────┘             └─────────────────┘
//!                 dial/hangup
//! ```
//!
//! Incoming calls are answered automatically. Outbound INVITEs rejected with
//! a 4xx or 5xx are retried with capped backoff until the attempt limit;
//! registration retries indefinitely.

use crate::retry::{RetryDecision, RetryPolicy, RetryScheduler, Timer, TokioTimer};
use crate::session::{CallEvent, CallSession, CallState};
use crate::telephony::{CallDirection, CallId, TelephonyDriver, TelephonyEvent};
use crate::AgentError;
use dashmap::DashMap;
use sip_agent_config::Settings;
use sip_agent_core::observability;
use sip_agent_provider::SessionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

struct OutboundCall {
    uri: String,
    scheduler: RetryScheduler,
}

pub struct CallEngine {
    driver: Arc<dyn TelephonyDriver>,
    settings: Arc<Settings>,
    timer: Arc<dyn Timer>,
    sessions: DashMap<CallId, Arc<CallSession>>,
    outbound: DashMap<CallId, OutboundCall>,
    shutdown_tx: broadcast::Sender<()>,
    registering: AtomicBool,
}

impl CallEngine {
    pub fn new(driver: Arc<dyn TelephonyDriver>, settings: Arc<Settings>) -> Arc<Self> {
        Self::with_timer(driver, settings, Arc::new(TokioTimer))
    }

    pub fn with_timer(
        driver: Arc<dyn TelephonyDriver>,
        settings: Arc<Settings>,
        timer: Arc<dyn Timer>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            driver,
            settings,
            timer,
            sessions: DashMap::new(),
            outbound: DashMap::new(),
            shutdown_tx,
            registering: AtomicBool::new(false),
        })
    }

    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Register with the SIP registrar, retrying with capped backoff until
    /// it succeeds.
    pub async fn register(self: &Arc<Self>) -> Result<(), AgentError> {
        let mut scheduler = RetryScheduler::new(RetryPolicy::registration(&self.settings.sip));
        loop {
            let started = Instant::now();
            match self.driver.register().await {
                Ok(()) => {
                    observability::record_registration_status(true);
                    observability::record_registration_attempt("success");
                    observability::record_registration_duration(started.elapsed().as_secs_f64());
                    info!(domain = %self.settings.sip.domain, "registered with SIP registrar");
                    return Ok(());
                }
                Err(e) => {
                    observability::record_registration_status(false);
                    observability::record_registration_attempt("failure");
                    warn!(error = %e, "registration failed");
                    match scheduler.wait(self.timer.as_ref()).await {
                        RetryDecision::Retry { attempt, delay } => {
                            debug!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "registration retry"
                            );
                        }
                        RetryDecision::Exhausted => return Err(AgentError::RetryExhausted),
                    }
                }
            }
        }
    }

    /// Place an outbound call.
    pub async fn place_call(self: &Arc<Self>, uri: &str) -> Result<CallId, AgentError> {
        let call_id = self.driver.dial(uri).await?;
        self.adopt_outbound(
            call_id.clone(),
            uri,
            RetryScheduler::new(RetryPolicy::invite(&self.settings.sip)),
        )
        .await?;
        info!(%call_id, uri, "outbound call placed");
        Ok(call_id)
    }

    /// Drive the engine until the driver's event stream closes or
    /// [`CallEngine::shutdown`] is called.
    pub async fn run(self: Arc<Self>) {
        let mut events = self.driver.events();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "telephony events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("telephony event stream closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    }

    /// Hang up every active call and stop the event loop.
    pub async fn shutdown(&self) {
        info!("shutting down call engine");
        let _ = self.shutdown_tx.send(());
        let sessions: Vec<Arc<CallSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            let _ = self.driver.hangup(session.call_id()).await;
            session.shutdown("agent shutting down").await;
        }
        self.sessions.clear();
        self.outbound.clear();
    }

    async fn handle_event(self: &Arc<Self>, event: TelephonyEvent) {
        match event {
            TelephonyEvent::RegistrationChanged {
                registered,
                status_code,
            } => {
                observability::record_registration_status(registered);
                if registered {
                    info!(status_code, "registration refreshed");
                } else {
                    warn!(status_code, "registration lost");
                    self.spawn_reregistration();
                }
            }
            TelephonyEvent::IncomingCall {
                call_id,
                remote_uri,
            } => {
                self.accept_incoming(call_id, remote_uri).await;
            }
            TelephonyEvent::CallConfirmed { call_id } => {
                self.activate(&call_id).await;
            }
            TelephonyEvent::MediaActive { call_id } => {
                self.activate(&call_id).await;
            }
            TelephonyEvent::CallDisconnected {
                call_id,
                status_code,
            } => {
                self.handle_disconnect(call_id, status_code).await;
            }
        }
    }

    fn spawn_reregistration(self: &Arc<Self>) {
        if self
            .registering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.register().await {
                error!(error = %e, "re-registration failed");
            }
            engine.registering.store(false, Ordering::SeqCst);
        });
    }

    async fn accept_incoming(self: &Arc<Self>, call_id: CallId, remote_uri: String) {
        info!(%call_id, remote_uri = %remote_uri, "incoming call");
        let session = match CallSession::new(
            call_id.clone(),
            CallDirection::Inbound,
            &self.settings.audio,
        ) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!(%call_id, error = %e, "failed to create call session");
                let _ = self.driver.hangup(&call_id).await;
                return;
            }
        };
        if let Err(e) = self.driver.attach_media(&call_id, session.audio_port()).await {
            error!(%call_id, error = %e, "failed to attach media");
            let _ = self.driver.hangup(&call_id).await;
            return;
        }
        self.sessions.insert(call_id.clone(), Arc::clone(&session));
        if let Err(e) = self.driver.answer(&call_id).await {
            error!(%call_id, error = %e, "failed to answer call");
            self.sessions.remove(&call_id);
        }
    }

    /// Start the provider session once the call is confirmed or its media
    /// comes up, whichever event lands first.
    async fn activate(self: &Arc<Self>, call_id: &CallId) {
        let Some(session) = self.sessions.get(call_id).map(|s| Arc::clone(s.value())) else {
            debug!(%call_id, "activation event for unknown call");
            return;
        };
        if session.state().await != CallState::Idle {
            return;
        }
        let format = match self.settings.audio.format() {
            Ok(format) => format,
            Err(e) => {
                error!(error = %e, "invalid audio configuration");
                let _ = self.driver.hangup(call_id).await;
                return;
            }
        };
        let config = SessionConfig::from_settings(&self.settings.provider, format);
        match session.establish(config).await {
            Ok(()) => {
                if let Some(mut outbound) = self.outbound.get_mut(call_id) {
                    outbound.scheduler.reset();
                }
                self.spawn_provider_watcher(&session);
            }
            Err(e) => {
                error!(%call_id, error = %e, "failed to establish provider session");
                let _ = self.driver.hangup(call_id).await;
            }
        }
    }

    /// Hang up the call when its provider session ends first.
    fn spawn_provider_watcher(self: &Arc<Self>, session: &Arc<CallSession>) {
        let engine = Arc::clone(self);
        let call_id = session.call_id().clone();
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CallEvent::ProviderClosed { error }) => {
                        match &error {
                            Some(error) => {
                                warn!(%call_id, error = %error, "provider session ended, hanging up");
                            }
                            None => {
                                info!(%call_id, "provider session finished, hanging up");
                            }
                        }
                        let _ = engine.driver.hangup(&call_id).await;
                    }
                    Ok(CallEvent::Terminated { .. })
                    | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
        });
    }

    async fn handle_disconnect(self: &Arc<Self>, call_id: CallId, status_code: Option<u16>) {
        let Some((_, session)) = self.sessions.remove(&call_id) else {
            debug!(%call_id, "disconnect for unknown call");
            return;
        };
        let outbound = self.outbound.remove(&call_id).map(|(_, entry)| entry);

        let retryable = session.direction() == CallDirection::Outbound
            && session.state().await == CallState::Idle
            && matches!(status_code, Some(code) if (400..600).contains(&code));

        if retryable {
            if let Some(outbound) = outbound {
                self.schedule_invite_retry(session, outbound, status_code).await;
                return;
            }
        }

        let reason = match status_code {
            Some(code) => format!("disconnected with status {code}"),
            None => "disconnected".to_string(),
        };
        session.shutdown(reason).await;
    }

    async fn schedule_invite_retry(
        self: &Arc<Self>,
        session: Arc<CallSession>,
        mut outbound: OutboundCall,
        status_code: Option<u16>,
    ) {
        match outbound.scheduler.next_decision() {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    call_id = %session.call_id(),
                    uri = %outbound.uri,
                    ?status_code,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "invite rejected, retrying"
                );
                session.mark_invite_retry().await;
                session.shutdown("invite retry scheduled").await;

                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    let OutboundCall { uri, mut scheduler } = outbound;
                    let mut delay = delay;
                    loop {
                        engine.timer.sleep(delay).await;
                        match engine.driver.dial(&uri).await {
                            Ok(call_id) => {
                                info!(%call_id, uri = %uri, "outbound call re-placed");
                                if let Err(e) =
                                    engine.adopt_outbound(call_id, &uri, scheduler).await
                                {
                                    error!(error = %e, uri = %uri, "failed to set up retried call");
                                }
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, uri = %uri, "redial failed");
                                match scheduler.next_decision() {
                                    RetryDecision::Retry { delay: next, .. } => delay = next,
                                    RetryDecision::Exhausted => {
                                        error!(uri = %uri, "retry limit reached, abandoning call");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                });
            }
            RetryDecision::Exhausted => {
                error!(
                    call_id = %session.call_id(),
                    uri = %outbound.uri,
                    "retry limit reached, abandoning call"
                );
                session
                    .shutdown_with_result("retry limit reached", Some("retry_exhausted"))
                    .await;
            }
        }
    }

    async fn adopt_outbound(
        self: &Arc<Self>,
        call_id: CallId,
        uri: &str,
        scheduler: RetryScheduler,
    ) -> Result<(), AgentError> {
        let session = Arc::new(CallSession::new(
            call_id.clone(),
            CallDirection::Outbound,
            &self.settings.audio,
        )?);
        self.driver.attach_media(&call_id, session.audio_port()).await?;
        self.sessions.insert(call_id.clone(), Arc::clone(&session));
        self.outbound.insert(
            call_id,
            OutboundCall {
                uri: uri.to_string(),
                scheduler,
            },
        );
        Ok(())
    }
}
