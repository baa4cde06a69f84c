//! Session lifecycle: opening, teardown, transport event handling and the
//! fixed-delay reconnect timer.
//!
//! All lifecycle mutations run under [`ManagerContext::lifecycle`], so
//! `initialize`, `clear_session` and each transport event are applied one
//! at a time.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crmlink_protocol::{ConnectionPhase, ConnectionStatus};

use crate::auth_store::AuthStore;
use crate::error::ConnectionError;
use crate::transport::{
    CloseInfo, ConnectionUpdate, OpenedSession, Session, Transport, TransportEvent,
};
use crate::types::{ConnectionEvent, ConnectionState};

/// The live session plus the task draining its events.
pub(crate) struct ActiveSession {
    pub(crate) session: Arc<dyn Session>,
    pub(crate) generation: u64,
    pub(crate) event_task: JoinHandle<()>,
}

/// Shared state passed to the lifecycle free functions and the tasks they
/// spawn.
#[derive(Clone)]
pub(crate) struct ManagerContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) auth_store: Arc<AuthStore>,
    pub(crate) state: Arc<RwLock<ConnectionState>>,
    pub(crate) session: Arc<Mutex<Option<ActiveSession>>>,
    /// Generation of the session whose events are current; 0 when none.
    pub(crate) active_generation: Arc<AtomicU64>,
    pub(crate) next_generation: Arc<AtomicU64>,
    /// Serializes initialize, clear and event handling.
    pub(crate) lifecycle: Arc<Mutex<()>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) reconnect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) reconnect_delay: Duration,
}

impl ManagerContext {
    /// Applies a state transition and emits `StateChanged` if the status moved.
    pub(crate) async fn transition(&self, apply: impl FnOnce(&mut ConnectionState)) {
        let (before, after) = {
            let mut state = self.state.write().await;
            let before = state.status();
            apply(&mut *state);
            (before, state.status())
        };
        if before != after {
            debug!(from = %before, to = %after, "connection state changed");
            self.emit(ConnectionEvent::StateChanged(after));
        }
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("connection event not delivered: {e}");
        }
    }

    /// Removes the live session from the slot and retires its generation.
    ///
    /// When `abort_task` is false the event task is left running; callers
    /// on the event task itself must pass false.
    pub(crate) async fn take_session(&self, abort_task: bool) -> Option<Arc<dyn Session>> {
        let active = self.session.lock().await.take()?;
        self.active_generation.store(0, Ordering::SeqCst);
        if abort_task {
            active.event_task.abort();
        }
        debug!(generation = active.generation, "session released");
        Some(active.session)
    }
}

/// Cancels a pending reconnect timer, if any.
pub(crate) fn cancel_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
) {
    if let Ok(mut guard) = reconnect_cancel.lock()
        && let Some(token) = guard.take()
    {
        debug!("pending reconnect cancelled");
        token.cancel();
    }
}

/// Who asked for the session to be (re)opened.
#[derive(Debug)]
pub(crate) enum InitTrigger {
    Caller,
    /// A reconnect timer fired; carries the timer's token.
    Reconnect(CancellationToken),
}

impl InitTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Reconnect(_) => "reconnect",
        }
    }
}

/// Claims the reconnect slot for a timer that fired. Returns `false` if the
/// timer was cancelled in the meantime.
fn claim_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
    token: &CancellationToken,
) -> bool {
    let Ok(mut guard) = reconnect_cancel.lock() else {
        return !token.is_cancelled();
    };
    if token.is_cancelled() {
        return false;
    }
    // An uncancelled token is always the one in the slot.
    *guard = None;
    true
}

/// Opens a new session unless already connected.
pub(crate) async fn initialize(
    ctx: &ManagerContext,
    trigger: InitTrigger,
) -> Result<ConnectionStatus, ConnectionError> {
    let _lifecycle = ctx.lifecycle.lock().await;

    // Timers only claim their slot under the lifecycle lock, so cancelling
    // here also disarms one that fired and is waiting for the lock.
    match &trigger {
        InitTrigger::Caller => cancel_reconnect(&ctx.reconnect_cancel),
        InitTrigger::Reconnect(token) => {
            if !claim_reconnect(&ctx.reconnect_cancel, token) {
                debug!("reconnect superseded before it started");
                return Ok(ctx.state.read().await.status());
            }
        }
    }

    let current = ctx.state.read().await.status();
    if current == ConnectionStatus::Connected {
        debug!(trigger = trigger.as_str(), "already connected, initialize is a no-op");
        return Ok(current);
    }

    // One session per process: end the previous one first.
    if let Some(previous) = ctx.take_session(true).await {
        previous.end().await;
    }

    ctx.transition(ConnectionState::begin_connecting).await;
    info!(trigger = trigger.as_str(), "opening WhatsApp session");

    let opened = match open_session(ctx).await {
        Ok(opened) => opened,
        Err(message) => {
            warn!(error = %message, "failed to open WhatsApp session");
            let recorded = message.clone();
            ctx.transition(move |s| s.disconnected(Some(recorded))).await;
            if matches!(trigger, InitTrigger::Reconnect(_)) {
                schedule_reconnect(ctx);
            }
            return Err(ConnectionError::Initialization(message));
        }
    };

    let generation = ctx.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.active_generation.store(generation, Ordering::SeqCst);
    let event_task = tokio::spawn(event_loop(ctx.clone(), generation, opened.events));
    *ctx.session.lock().await = Some(ActiveSession {
        session: opened.session,
        generation,
        event_task,
    });

    let status = ctx.state.read().await.status();
    debug!(generation, %status, "session opened, awaiting transport events");
    Ok(status)
}

/// Loads auth, resolves the protocol version and opens the session.
async fn open_session(ctx: &ManagerContext) -> Result<OpenedSession, String> {
    let auth = ctx
        .auth_store
        .load()
        .map_err(|e| format!("failed to load auth state: {e}"))?;
    let version = ctx
        .transport
        .fetch_latest_version()
        .await
        .map_err(|e| format!("failed to fetch protocol version: {e}"))?;
    debug!(%version, "using WhatsApp Web version");
    ctx.transport
        .open_session(version, auth)
        .await
        .map_err(|e| format!("failed to open session: {e}"))
}

/// Resets to the empty baseline and wipes persisted auth.
///
/// Must be called with the lifecycle lock held. `end_gracefully` is false
/// when the transport already closed the session.
pub(crate) async fn clear_session_locked(
    ctx: &ManagerContext,
    abort_task: bool,
    end_gracefully: bool,
) -> Result<(), crate::auth_store::AuthStoreError> {
    if let Some(session) = ctx.take_session(abort_task).await
        && end_gracefully
    {
        session.end().await;
    }
    ctx.transition(ConnectionState::reset).await;
    ctx.auth_store.clear()
}

/// Drains one session's events in order.
async fn event_loop(
    ctx: ManagerContext,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let _lifecycle = ctx.lifecycle.lock().await;
        if ctx.active_generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "ignoring event from superseded session");
            return;
        }

        let finished = match event {
            TransportEvent::ConnectionUpdate(update) => {
                handle_connection_update(&ctx, update).await
            }
            TransportEvent::CredsUpdate(update) => {
                if let Err(e) = ctx.auth_store.save_creds(&update) {
                    warn!("failed to persist creds: {e}");
                }
                false
            }
            TransportEvent::KeysUpdate(updates) => {
                if let Err(e) = ctx.auth_store.apply_key_updates(&updates) {
                    warn!("failed to persist keys: {e}");
                }
                false
            }
        };
        if finished {
            return;
        }
    }

    // Stream ended without a close event.
    let _lifecycle = ctx.lifecycle.lock().await;
    if ctx.active_generation.load(Ordering::SeqCst) == generation {
        handle_close(
            &ctx,
            CloseInfo {
                status_code: None,
                message: "transport event stream ended".into(),
            },
        )
        .await;
    }
}

/// Applies a connection update. Returns `true` when the session is over.
async fn handle_connection_update(ctx: &ManagerContext, update: ConnectionUpdate) -> bool {
    if let Some(code) = update.qr {
        let status = ctx.state.read().await.status();
        match status {
            ConnectionStatus::Connecting | ConnectionStatus::QrReady => {
                info!("pairing challenge issued");
                let challenge = code.clone();
                ctx.transition(move |s| s.challenge_issued(challenge)).await;
                ctx.emit(ConnectionEvent::PairingChallenge(code));
            }
            other => debug!(status = %other, "ignoring pairing challenge"),
        }
    }

    match update.connection {
        Some(ConnectionPhase::Open) => {
            info!("WhatsApp connected");
            ctx.transition(ConnectionState::opened).await;
            false
        }
        Some(ConnectionPhase::Close) => {
            let close = update.close.unwrap_or(CloseInfo {
                status_code: None,
                message: "connection closed".into(),
            });
            handle_close(ctx, close).await;
            true
        }
        Some(ConnectionPhase::Connecting) => {
            trace!("transport reports connecting");
            false
        }
        None => false,
    }
}

/// Routes a close to a full logout wipe or a scheduled reconnect.
async fn handle_close(ctx: &ManagerContext, close: CloseInfo) {
    if close.is_logged_out() {
        warn!(status_code = ?close.status_code, "WhatsApp logged out, clearing session");
        if let Err(e) = clear_session_locked(ctx, false, false).await {
            warn!("failed to clear auth store after logout: {e}");
        }
        ctx.emit(ConnectionEvent::LoggedOut);
        return;
    }

    warn!(
        status_code = ?close.status_code,
        error = %close.message,
        "WhatsApp connection closed"
    );
    ctx.take_session(false).await;
    let message = close.message;
    ctx.transition(move |s| s.disconnected(Some(message))).await;
    schedule_reconnect(ctx);
}

/// Arms the reconnect timer, replacing any pending one. Must be called
/// with the lifecycle lock held.
pub(crate) fn schedule_reconnect(ctx: &ManagerContext) {
    let cancel = CancellationToken::new();
    cancel_reconnect(&ctx.reconnect_cancel);
    if let Ok(mut guard) = ctx.reconnect_cancel.lock() {
        *guard = Some(cancel.clone());
    }

    info!(
        delay_secs = format_args!("{:.1}", ctx.reconnect_delay.as_secs_f64()),
        "reconnect scheduled"
    );
    ctx.emit(ConnectionEvent::Reconnecting {
        delay: ctx.reconnect_delay,
    });
    tokio::spawn(reconnect_after_delay(ctx.clone(), cancel));
}

/// Waits the fixed delay, then re-runs `initialize`. A failed attempt
/// schedules the next one itself.
///
/// Returns a boxed future to break the recursive type cycle with
/// `initialize` (which spawns the event loop that schedules this).
fn reconnect_after_delay(
    ctx: ManagerContext,
    cancel: CancellationToken,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect timer cancelled");
                return;
            }
            _ = tokio::time::sleep(ctx.reconnect_delay) => {}
        }

        match initialize(&ctx, InitTrigger::Reconnect(cancel)).await {
            Ok(status) => debug!(%status, "reconnect attempt started"),
            Err(e) => warn!("reconnect attempt failed: {e}"),
        }
    })
}
