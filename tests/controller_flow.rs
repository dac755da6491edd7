use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tradedeck::dashboard::config::{DashboardConfig, WidgetInstance};
use tradedeck::dashboard::controller::{
    ControllerError, DashboardController, DashboardEvent, DashboardPhase, SaveOutcome,
};
use tradedeck::dashboard::layout::{add_widget, validate};
use tradedeck::dashboard::persistence::{ApiError, ConfigGateway, DashboardApi, RetryPolicy};
use tradedeck::dashboard::registry::{WidgetKind, WidgetRegistry};

/// Scripted dashboard service. Fetch and store outcomes are queued up front;
/// unscripted calls succeed. Stores can be gated behind a semaphore so tests
/// can hold a save in flight.
struct RecordingApi {
    fetches: Mutex<VecDeque<Result<DashboardConfig, ApiError>>>,
    store_failures: Mutex<VecDeque<ApiError>>,
    saved_payloads: Mutex<Vec<DashboardConfig>>,
    fetch_calls: AtomicUsize,
    store_calls: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
}

impl RecordingApi {
    fn new() -> Self {
        Self {
            fetches: Mutex::new(VecDeque::new()),
            store_failures: Mutex::new(VecDeque::new()),
            saved_payloads: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            store_calls: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    fn script_fetch(&self, result: Result<DashboardConfig, ApiError>) {
        self.fetches.lock().unwrap().push_back(result);
    }

    fn script_store_failure(&self, error: ApiError) {
        self.store_failures.lock().unwrap().push_back(error);
    }

    fn hold_stores(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    fn release_stores(&self, count: usize) {
        self.gate.add_permits(count);
    }

    fn saved_payloads(&self) -> Vec<DashboardConfig> {
        self.saved_payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DashboardApi for RecordingApi {
    async fn fetch_config(&self, user_id: &str) -> Result<DashboardConfig, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::NotFound(user_id.to_string())))
    }

    async fn store_config(&self, config: &DashboardConfig) -> Result<DashboardConfig, ApiError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }
        self.saved_payloads.lock().unwrap().push(config.clone());
        if let Some(error) = self.store_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut stored = config.clone();
        stored.updated_at = Utc::now();
        Ok(stored)
    }
}

fn two_widget_config() -> DashboardConfig {
    let config = DashboardConfig::new("user-1");
    let (config, _) = add_widget(&config, WidgetKind::PortfolioOverview);
    let (config, _) = add_widget(&config, WidgetKind::NewsFeed);
    config
}

fn controller_with(api: Arc<RecordingApi>) -> (Arc<DashboardController>, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&events);
    let hook = move |event: &DashboardEvent| {
        let name = match event {
            DashboardEvent::Loaded { .. } => "loaded",
            DashboardEvent::LoadFailed { .. } => "load-failed",
            DashboardEvent::EditStarted => "edit-started",
            DashboardEvent::EditDiscarded => "edit-discarded",
            DashboardEvent::Saved => "saved",
            DashboardEvent::SaveFailed { .. } => "save-failed",
        };
        recorder.lock().unwrap().push(name.to_string());
    };
    // One attempt per request keeps call counts exact; backoff behavior is
    // covered by the gateway's own tests.
    let gateway = ConfigGateway::with_retry(
        api,
        RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
        },
    );
    let controller = DashboardController::new(
        gateway,
        Arc::new(WidgetRegistry::with_defaults()),
        "user-1",
    )
    .with_event_hook(Arc::new(hook));
    (Arc::new(controller), events)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn loads_stored_config() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, events) = controller_with(api.clone());

    controller.load().await.unwrap();
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert_eq!(controller.config().unwrap().widgets.len(), 2);
    assert_eq!(events.lock().unwrap().as_slice(), ["loaded"]);
}

#[tokio::test]
async fn load_failure_exposes_retry() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Err(ApiError::Transport("gateway timeout".to_string())));
    api.script_fetch(Ok(two_widget_config()));
    let (controller, events) = controller_with(api.clone());

    assert!(controller.load().await.is_err());
    assert_eq!(controller.phase(), DashboardPhase::LoadFailed);
    assert!(controller.last_error().is_some());
    assert!(controller.config().is_none());

    controller.retry_load().await.unwrap();
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(events.lock().unwrap().as_slice(), ["load-failed", "loaded"]);
}

#[tokio::test]
async fn exit_edit_saves_exactly_once_with_the_new_widget() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, events) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    let id = controller.add_widget(WidgetKind::Watchlist).unwrap();
    assert!(controller.is_dirty());

    let outcome = controller.save().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved);
    assert_eq!(controller.phase(), DashboardPhase::Ready);

    assert_eq!(api.store_calls.load(Ordering::SeqCst), 1);
    let payloads = api.saved_payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].widgets.len(), 3);
    assert!(payloads[0].has_widget(&id));
    assert!(validate(&payloads[0]).is_empty());

    assert_eq!(controller.config().unwrap().widgets.len(), 3);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["loaded", "edit-started", "saved"]
    );
}

#[tokio::test]
async fn unknown_widget_kinds_do_not_block_editing_or_saving() {
    let api = Arc::new(RecordingApi::new());
    let mut stored = two_widget_config();
    stored
        .widgets
        .push(WidgetInstance::new("options-chain", "Options"));
    api.script_fetch(Ok(stored));
    let (controller, events) = controller_with(api.clone());

    controller.load().await.unwrap();
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    let loaded = controller.config().unwrap();
    assert_eq!(loaded.widgets.len(), 3);
    assert!(validate(&loaded).is_empty());

    // The unrecognized widget stays put while the rest of the dashboard is
    // edited around it.
    controller.enter_edit().unwrap();
    let news_id = loaded
        .widgets
        .iter()
        .find(|w| w.kind == "news-feed")
        .unwrap()
        .id
        .clone();
    controller.remove_widget(&news_id).unwrap();
    let added = controller.add_widget(WidgetKind::Watchlist).unwrap();

    assert_eq!(controller.save().await.unwrap(), SaveOutcome::Saved);
    assert_eq!(controller.phase(), DashboardPhase::Ready);

    let payloads = api.saved_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].widgets.iter().any(|w| w.kind == "options-chain"));
    assert!(payloads[0].has_widget(&added));
    assert!(!payloads[0].has_widget(&news_id));
    assert!(validate(&payloads[0]).is_empty());
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["loaded", "edit-started", "saved"]
    );
}

#[tokio::test]
async fn clean_exit_never_touches_the_service() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, events) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    let outcome = controller.save().await.unwrap();
    assert_eq!(outcome, SaveOutcome::Clean);
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert_eq!(api.store_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["loaded", "edit-started", "edit-discarded"]
    );
}

#[tokio::test]
async fn edit_undone_in_place_counts_as_clean() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    let id = controller.add_widget(WidgetKind::Alerts).unwrap();
    controller.remove_widget(&id).unwrap();
    assert!(!controller.is_dirty());

    assert_eq!(controller.save().await.unwrap(), SaveOutcome::Clean);
    assert_eq!(api.store_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_save_keeps_the_pending_widgets() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    api.script_store_failure(ApiError::Transport("connection reset".to_string()));
    let (controller, events) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();

    let err = controller.save().await.unwrap_err();
    assert!(matches!(err, ControllerError::Save(_)));
    assert_eq!(controller.phase(), DashboardPhase::SaveFailed);
    assert!(controller.last_error().is_some());

    // Pending state is intact: still three widgets, still dirty.
    assert_eq!(controller.pending_config().unwrap().widgets.len(), 3);
    assert!(controller.is_dirty());
    // The persisted config was never replaced.
    assert_eq!(controller.config().unwrap().widgets.len(), 2);

    // Retrying succeeds against the unscripted (healthy) store.
    assert_eq!(controller.retry_save().await.unwrap(), SaveOutcome::Saved);
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert_eq!(controller.config().unwrap().widgets.len(), 3);
    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["loaded", "edit-started", "save-failed", "saved"]
    );
}

#[tokio::test]
async fn rejected_layout_change_leaves_the_session_untouched() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    let before = controller.pending_config().unwrap();
    let mut placements = before
        .placements(tradedeck::dashboard::config::Breakpoint::Lg)
        .to_vec();
    placements.pop();

    let err = controller
        .apply_layout_change(tradedeck::dashboard::config::Breakpoint::Lg, placements)
        .unwrap_err();
    assert!(matches!(err, ControllerError::Layout(_)));
    assert_eq!(controller.pending_config().unwrap(), before);
    assert!(!controller.is_dirty());
}

#[tokio::test]
async fn queued_save_reruns_with_the_latest_pending_state() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();

    api.hold_stores();
    let saver = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.save().await })
    };
    settle().await;
    assert_eq!(controller.phase(), DashboardPhase::Saving);

    // Edit while the first save is on the wire, then ask to save again.
    let late_id = controller.add_widget(WidgetKind::MarketMovers).unwrap();
    assert_eq!(controller.save().await.unwrap(), SaveOutcome::Queued);

    api.release_stores(2);
    assert_eq!(saver.await.unwrap().unwrap(), SaveOutcome::Saved);

    let payloads = api.saved_payloads();
    assert_eq!(api.store_calls.load(Ordering::SeqCst), 2);
    assert_eq!(payloads[0].widgets.len(), 3);
    assert_eq!(payloads[1].widgets.len(), 4);
    assert!(payloads[1].has_widget(&late_id));

    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert_eq!(controller.config().unwrap().widgets.len(), 4);
}

#[tokio::test]
async fn queued_save_is_skipped_when_nothing_new_is_pending() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();

    api.hold_stores();
    let saver = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.save().await })
    };
    settle().await;

    // A second request with no further edits queues, but resolves without a
    // second network call once the first save lands.
    assert_eq!(controller.save().await.unwrap(), SaveOutcome::Queued);
    api.release_stores(1);
    assert_eq!(saver.await.unwrap().unwrap(), SaveOutcome::Saved);

    assert_eq!(api.store_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), DashboardPhase::Ready);
}

#[tokio::test]
async fn discard_is_rejected_while_a_save_is_in_flight() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();

    api.hold_stores();
    let saver = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.save().await })
    };
    settle().await;

    assert!(matches!(
        controller.discard_edits(),
        Err(ControllerError::Phase(DashboardPhase::Saving))
    ));

    api.release_stores(1);
    saver.await.unwrap().unwrap();
}

#[tokio::test]
async fn discard_after_a_failed_save_reverts_to_the_saved_config() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    api.script_store_failure(ApiError::Rejected("schema mismatch".to_string()));
    let (controller, _) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();
    assert!(controller.save().await.is_err());
    assert_eq!(controller.phase(), DashboardPhase::SaveFailed);

    controller.discard_edits().unwrap();
    assert_eq!(controller.phase(), DashboardPhase::Ready);
    assert!(controller.pending_config().is_none());
    assert_eq!(controller.config().unwrap().widgets.len(), 2);
    assert!(controller.last_error().is_none());
}

#[tokio::test]
async fn detach_abandons_the_in_flight_save() {
    let api = Arc::new(RecordingApi::new());
    api.script_fetch(Ok(two_widget_config()));
    let (controller, events) = controller_with(api.clone());
    controller.load().await.unwrap();

    controller.enter_edit().unwrap();
    controller.add_widget(WidgetKind::Watchlist).unwrap();

    api.hold_stores();
    let saver = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.save().await })
    };
    settle().await;

    controller.detach();
    api.release_stores(1);
    assert_eq!(saver.await.unwrap().unwrap(), SaveOutcome::Abandoned);

    // The save reached the wire but its result was dropped.
    assert_eq!(api.store_calls.load(Ordering::SeqCst), 1);
    assert_eq!(controller.config().unwrap().widgets.len(), 2);
    assert!(!events.lock().unwrap().iter().any(|e| e == "saved"));
}
