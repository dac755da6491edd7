//! The dashboard state machine: load, view, edit, save. Owns the config and
//! the edit session; everything else goes through it. Methods take `&self`
//! and lock internally, so the controller can sit behind an `Arc` shared by
//! the host shell and background tasks.

use crate::dashboard::config::{Breakpoint, DashboardConfig, Placement};
use crate::dashboard::layout;
use crate::dashboard::persistence::{ConfigGateway, LoadError, SaveError};
use crate::dashboard::registry::{WidgetKind, WidgetRegistry};
use crate::dashboard::session::EditSession;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardPhase {
    Loading,
    Ready,
    Editing,
    Saving,
    LoadFailed,
    SaveFailed,
}

impl DashboardPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DashboardPhase::Loading => "loading",
            DashboardPhase::Ready => "ready",
            DashboardPhase::Editing => "editing",
            DashboardPhase::Saving => "saving",
            DashboardPhase::LoadFailed => "load-failed",
            DashboardPhase::SaveFailed => "save-failed",
        }
    }
}

impl std::fmt::Display for DashboardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications for the host shell (toasts, status line). Emitted outside
/// the state lock, after the transition they describe has landed.
#[derive(Debug, Clone)]
pub enum DashboardEvent {
    Loaded { default_layout: bool },
    LoadFailed { message: String },
    EditStarted,
    EditDiscarded,
    Saved,
    SaveFailed { message: String },
}

pub type EventHook = Arc<dyn Fn(&DashboardEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    #[error("operation not allowed while {0}")]
    Phase(DashboardPhase),
    #[error("dashboard controller is detached")]
    Detached,
    #[error(transparent)]
    Layout(#[from] layout::LayoutError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Save(#[from] SaveError),
}

/// How a [`DashboardController::save`] call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The pending layout was persisted.
    Saved,
    /// Nothing was dirty; edit mode closed without a network call.
    Clean,
    /// Another save is in flight; it will rerun with the latest pending
    /// state, so this request is covered.
    Queued,
    /// The controller detached while the request was in flight; the result
    /// was dropped.
    Abandoned,
}

struct ControllerState {
    phase: DashboardPhase,
    config: Option<DashboardConfig>,
    session: Option<EditSession>,
    load_in_flight: bool,
    save_in_flight: bool,
    save_queued: bool,
    detached: bool,
    load_error: Option<String>,
    save_error: Option<String>,
}

pub struct DashboardController {
    user_id: String,
    gateway: ConfigGateway,
    registry: Arc<WidgetRegistry>,
    state: Mutex<ControllerState>,
    events: Option<EventHook>,
}

impl DashboardController {
    pub fn new(
        gateway: ConfigGateway,
        registry: Arc<WidgetRegistry>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            gateway,
            registry,
            state: Mutex::new(ControllerState {
                phase: DashboardPhase::Loading,
                config: None,
                session: None,
                load_in_flight: false,
                save_in_flight: false,
                save_queued: false,
                detached: false,
                load_error: None,
                save_error: None,
            }),
            events: None,
        }
    }

    pub fn with_event_hook(mut self, hook: EventHook) -> Self {
        self.events = Some(hook);
        self
    }

    // Recover the guard if a panicking holder poisoned the lock; the state
    // itself is still coherent because sections never panic mid-write.
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: DashboardEvent) {
        if let Some(hook) = &self.events {
            hook(&event);
        }
    }

    /// Fetch the stored config and hydrate. Allowed from the initial state
    /// and after a failed load; anything else is a phase error, including a
    /// second call while one load is still in flight.
    pub async fn load(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.state();
            if state.detached {
                return Err(ControllerError::Detached);
            }
            match state.phase {
                DashboardPhase::Loading | DashboardPhase::LoadFailed => {}
                other => return Err(ControllerError::Phase(other)),
            }
            if state.load_in_flight {
                return Err(ControllerError::Phase(DashboardPhase::Loading));
            }
            state.load_in_flight = true;
            state.phase = DashboardPhase::Loading;
            state.load_error = None;
        }

        match self.gateway.load(&self.user_id).await {
            Ok(config) => {
                let (clean, warnings) = layout::sanitize(&config, &self.registry);
                for warning in &warnings {
                    tracing::warn!(user = %self.user_id, "{warning}");
                }
                self.finish_load(clean, false)
            }
            Err(LoadError::NotFound) => {
                tracing::info!(
                    user = %self.user_id,
                    "no stored dashboard, starting from the default template"
                );
                let config = self.registry.default_config(&self.user_id);
                self.finish_load(config, true)
            }
            Err(err) => {
                {
                    let mut state = self.state();
                    state.load_in_flight = false;
                    if state.detached {
                        return Err(ControllerError::Detached);
                    }
                    state.phase = DashboardPhase::LoadFailed;
                    state.load_error = Some(err.to_string());
                }
                self.emit(DashboardEvent::LoadFailed {
                    message: err.to_string(),
                });
                Err(ControllerError::Load(err))
            }
        }
    }

    pub async fn retry_load(&self) -> Result<(), ControllerError> {
        self.load().await
    }

    fn finish_load(
        &self,
        config: DashboardConfig,
        default_layout: bool,
    ) -> Result<(), ControllerError> {
        {
            let mut state = self.state();
            state.load_in_flight = false;
            if state.detached {
                return Err(ControllerError::Detached);
            }
            state.config = Some(config);
            state.phase = DashboardPhase::Ready;
        }
        self.emit(DashboardEvent::Loaded { default_layout });
        Ok(())
    }

    /// Open an edit session snapshotting the current config.
    pub fn enter_edit(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.state();
            if state.detached {
                return Err(ControllerError::Detached);
            }
            if state.phase != DashboardPhase::Ready {
                return Err(ControllerError::Phase(state.phase));
            }
            let Some(config) = state.config.clone() else {
                return Err(ControllerError::Phase(state.phase));
            };
            state.session = Some(EditSession::open(config));
            state.phase = DashboardPhase::Editing;
        }
        self.emit(DashboardEvent::EditStarted);
        Ok(())
    }

    /// Add a widget of `kind` to the pending layout. Returns the new
    /// instance's id.
    pub fn add_widget(&self, kind: WidgetKind) -> Result<String, ControllerError> {
        let mut state = self.state();
        if state.detached {
            return Err(ControllerError::Detached);
        }
        let phase = state.phase;
        let Some(session) = state.session.as_mut() else {
            return Err(ControllerError::Phase(phase));
        };
        let (next, id) = layout::add_widget(session.pending(), kind);
        session.update(next);
        Ok(id)
    }

    pub fn remove_widget(&self, widget_id: &str) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.detached {
            return Err(ControllerError::Detached);
        }
        let phase = state.phase;
        let Some(session) = state.session.as_mut() else {
            return Err(ControllerError::Phase(phase));
        };
        let next = layout::remove_widget(session.pending(), widget_id)?;
        session.update(next);
        Ok(())
    }

    /// Replace one breakpoint's placements after a drag or resize. Invalid
    /// candidates are rejected and the pending layout is left untouched.
    pub fn apply_layout_change(
        &self,
        breakpoint: Breakpoint,
        placements: Vec<Placement>,
    ) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.detached {
            return Err(ControllerError::Detached);
        }
        let phase = state.phase;
        let Some(session) = state.session.as_mut() else {
            return Err(ControllerError::Phase(phase));
        };
        let next = layout::apply_layout_change(session.pending(), breakpoint, placements)?;
        session.update(next);
        Ok(())
    }

    /// Persist the pending layout. A clean session closes edit mode without
    /// a network call. While a save is in flight further calls queue a rerun
    /// that picks up whatever is pending when the first one resolves.
    pub async fn save(&self) -> Result<SaveOutcome, ControllerError> {
        let mut snapshot = {
            let mut state = self.state();
            if state.detached {
                return Err(ControllerError::Detached);
            }
            let (dirty, pending) = match state.session.as_ref() {
                Some(session) => (session.is_dirty(), session.pending().clone()),
                None => return Err(ControllerError::Phase(state.phase)),
            };
            if state.save_in_flight {
                state.save_queued = true;
                return Ok(SaveOutcome::Queued);
            }
            if !dirty {
                state.session = None;
                state.phase = DashboardPhase::Ready;
                drop(state);
                self.emit(DashboardEvent::EditDiscarded);
                return Ok(SaveOutcome::Clean);
            }
            state.save_in_flight = true;
            state.save_queued = false;
            state.save_error = None;
            state.phase = DashboardPhase::Saving;
            pending
        };

        loop {
            match self.gateway.save(&snapshot).await {
                Ok(saved) => {
                    let rerun = {
                        let mut state = self.state();
                        if state.detached {
                            state.save_in_flight = false;
                            return Ok(SaveOutcome::Abandoned);
                        }
                        state.config = Some(saved.clone());
                        let queued = std::mem::take(&mut state.save_queued);
                        let mut rerun = None;
                        if let Some(session) = state.session.as_mut() {
                            session.rebase(saved);
                            if queued && session.is_dirty() {
                                rerun = Some(session.pending().clone());
                            }
                        }
                        if rerun.is_none() {
                            let keep_session = state
                                .session
                                .as_ref()
                                .map(EditSession::is_dirty)
                                .unwrap_or(false);
                            state.save_in_flight = false;
                            if keep_session {
                                // Edits made during the flight stay pending.
                                state.phase = DashboardPhase::Editing;
                            } else {
                                state.session = None;
                                state.phase = DashboardPhase::Ready;
                            }
                        }
                        rerun
                    };
                    match rerun {
                        Some(pending) => snapshot = pending,
                        None => {
                            self.emit(DashboardEvent::Saved);
                            return Ok(SaveOutcome::Saved);
                        }
                    }
                }
                Err(err) => {
                    {
                        let mut state = self.state();
                        state.save_in_flight = false;
                        state.save_queued = false;
                        if state.detached {
                            return Ok(SaveOutcome::Abandoned);
                        }
                        state.phase = DashboardPhase::SaveFailed;
                        state.save_error = Some(err.to_string());
                    }
                    self.emit(DashboardEvent::SaveFailed {
                        message: err.to_string(),
                    });
                    return Err(ControllerError::Save(err));
                }
            }
        }
    }

    pub async fn retry_save(&self) -> Result<SaveOutcome, ControllerError> {
        self.save().await
    }

    /// Throw away pending edits and return to viewing. Rejected while a save
    /// is in flight, since the outcome of that save decides the baseline.
    pub fn discard_edits(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.state();
            if state.detached {
                return Err(ControllerError::Detached);
            }
            if state.session.is_none() || state.save_in_flight {
                return Err(ControllerError::Phase(state.phase));
            }
            state.session = None;
            state.save_error = None;
            state.phase = DashboardPhase::Ready;
        }
        self.emit(DashboardEvent::EditDiscarded);
        Ok(())
    }

    /// Called when the dashboard unmounts. In-flight requests finish on the
    /// wire but their results are no longer applied, and every later call
    /// fails with [`ControllerError::Detached`].
    pub fn detach(&self) {
        let mut state = self.state();
        state.detached = true;
    }

    pub fn phase(&self) -> DashboardPhase {
        self.state().phase
    }

    /// The last config known to be persisted (or the default template before
    /// the first save).
    pub fn config(&self) -> Option<DashboardConfig> {
        self.state().config.clone()
    }

    /// The in-progress config while an edit session is open.
    pub fn pending_config(&self) -> Option<DashboardConfig> {
        self.state().session.as_ref().map(|s| s.pending().clone())
    }

    /// What the host should render right now: pending edits if a session is
    /// open, the saved config otherwise.
    pub fn display_config(&self) -> Option<DashboardConfig> {
        let state = self.state();
        state
            .session
            .as_ref()
            .map(|s| s.pending().clone())
            .or_else(|| state.config.clone())
    }

    pub fn is_dirty(&self) -> bool {
        self.state()
            .session
            .as_ref()
            .map(EditSession::is_dirty)
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<String> {
        let state = self.state();
        match state.phase {
            DashboardPhase::LoadFailed => state.load_error.clone(),
            DashboardPhase::SaveFailed => state.save_error.clone(),
            _ => None,
        }
    }
}
