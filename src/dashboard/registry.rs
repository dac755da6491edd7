//! Widget type registry: the catalogue of known widget kinds, their typed
//! settings, default spans and the async module loader behind them.

use crate::dashboard::config::{Breakpoint, DashboardConfig, WidgetInstance};
use crate::dashboard::layout;
use crate::live::feed::Topic;
use crate::live::store::InsightCategory;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_insights() -> usize {
    20
}

fn default_max_headlines() -> usize {
    15
}

fn default_mover_count() -> usize {
    5
}

/// Every widget kind the platform ships. The wire format stores the kebab-case
/// tag so configs written by newer releases still deserialize here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WidgetKind {
    PortfolioOverview,
    Watchlist,
    AiInsights,
    Alerts,
    NewsFeed,
    MarketMovers,
}

pub const ALL_KINDS: [WidgetKind; 6] = [
    WidgetKind::PortfolioOverview,
    WidgetKind::Watchlist,
    WidgetKind::AiInsights,
    WidgetKind::Alerts,
    WidgetKind::NewsFeed,
    WidgetKind::MarketMovers,
];

impl WidgetKind {
    pub fn as_tag(self) -> &'static str {
        match self {
            WidgetKind::PortfolioOverview => "portfolio-overview",
            WidgetKind::Watchlist => "watchlist",
            WidgetKind::AiInsights => "ai-insights",
            WidgetKind::Alerts => "alerts",
            WidgetKind::NewsFeed => "news-feed",
            WidgetKind::MarketMovers => "market-movers",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|k| k.as_tag() == tag)
    }

    fn index(self) -> usize {
        match self {
            WidgetKind::PortfolioOverview => 0,
            WidgetKind::Watchlist => 1,
            WidgetKind::AiInsights => 2,
            WidgetKind::Alerts => 3,
            WidgetKind::NewsFeed => 4,
            WidgetKind::MarketMovers => 5,
        }
    }

    pub fn descriptor(self) -> &'static WidgetDescriptor {
        &CATALOGUE[self.index()]
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanHint {
    pub w: u32,
    pub h: u32,
}

/// Static metadata for one widget kind: picker label, live-data topic and the
/// grid span it claims when first added at each breakpoint.
#[derive(Debug, Clone, Copy)]
pub struct WidgetDescriptor {
    pub kind: WidgetKind,
    pub display_name: &'static str,
    pub topic: Option<Topic>,
}

static CATALOGUE: [WidgetDescriptor; 6] = [
    WidgetDescriptor {
        kind: WidgetKind::PortfolioOverview,
        display_name: "Portfolio Overview",
        topic: None,
    },
    WidgetDescriptor {
        kind: WidgetKind::Watchlist,
        display_name: "Watchlist",
        topic: Some(Topic::Quotes),
    },
    WidgetDescriptor {
        kind: WidgetKind::AiInsights,
        display_name: "AI Insights",
        topic: Some(Topic::Insights),
    },
    WidgetDescriptor {
        kind: WidgetKind::Alerts,
        display_name: "Alerts",
        topic: None,
    },
    WidgetDescriptor {
        kind: WidgetKind::NewsFeed,
        display_name: "News Feed",
        topic: None,
    },
    WidgetDescriptor {
        kind: WidgetKind::MarketMovers,
        display_name: "Market Movers",
        topic: Some(Topic::Quotes),
    },
];

impl WidgetDescriptor {
    pub fn tag(&self) -> &'static str {
        self.kind.as_tag()
    }

    /// Span claimed when the widget is first added. Narrow breakpoints get the
    /// full row; Lg and Md pack several widgets side by side.
    pub fn default_span(&self, breakpoint: Breakpoint) -> SpanHint {
        let (lg, md, h) = match self.kind {
            WidgetKind::PortfolioOverview => (6, 5, 4),
            WidgetKind::Watchlist => (3, 5, 4),
            WidgetKind::AiInsights => (3, 4, 4),
            WidgetKind::Alerts => (4, 3, 3),
            WidgetKind::NewsFeed => (4, 3, 3),
            WidgetKind::MarketMovers => (4, 4, 3),
        };
        let w = match breakpoint {
            Breakpoint::Lg => lg,
            Breakpoint::Md => md,
            _ => breakpoint.columns(),
        };
        SpanHint { w, h }
    }

    pub fn default_settings(&self) -> serde_json::Value {
        self.default_config().to_settings()
    }

    pub fn default_config(&self) -> WidgetConfig {
        match self.kind {
            WidgetKind::PortfolioOverview => {
                WidgetConfig::PortfolioOverview(PortfolioOverviewSettings::default())
            }
            WidgetKind::Watchlist => WidgetConfig::Watchlist(WatchlistSettings::default()),
            WidgetKind::AiInsights => WidgetConfig::AiInsights(AiInsightsSettings::default()),
            WidgetKind::Alerts => WidgetConfig::Alerts(AlertsSettings::default()),
            WidgetKind::NewsFeed => WidgetConfig::NewsFeed(NewsFeedSettings::default()),
            WidgetKind::MarketMovers => {
                WidgetConfig::MarketMovers(MarketMoversSettings::default())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartRange {
    Day,
    Week,
    Month,
    Year,
}

impl Default for ChartRange {
    fn default() -> Self {
        ChartRange::Day
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioOverviewSettings {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub range: ChartRange,
    #[serde(default)]
    pub show_cash: bool,
}

impl Default for PortfolioOverviewSettings {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            range: ChartRange::default(),
            show_cash: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistSort {
    Custom,
    Symbol,
    Change,
}

impl Default for WatchlistSort {
    fn default() -> Self {
        WatchlistSort::Custom
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSettings {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub sort: WatchlistSort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiInsightsSettings {
    #[serde(default = "default_max_insights")]
    pub max_items: usize,
    /// Empty means every category is shown.
    #[serde(default)]
    pub categories: Vec<InsightCategory>,
}

impl Default for AiInsightsSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_insights(),
            categories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsSettings {
    #[serde(default)]
    pub triggered_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsFeedSettings {
    #[serde(default = "default_max_headlines")]
    pub max_items: usize,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Default for NewsFeedSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_headlines(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoverDirection {
    Gainers,
    Losers,
    Both,
}

impl Default for MoverDirection {
    fn default() -> Self {
        MoverDirection::Both
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMoversSettings {
    #[serde(default = "default_mover_count")]
    pub count: usize,
    #[serde(default)]
    pub direction: MoverDirection,
}

impl Default for MarketMoversSettings {
    fn default() -> Self {
        Self {
            count: default_mover_count(),
            direction: MoverDirection::default(),
        }
    }
}

/// Settings parsed out of a [`WidgetInstance`] into the schema of its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetConfig {
    PortfolioOverview(PortfolioOverviewSettings),
    Watchlist(WatchlistSettings),
    AiInsights(AiInsightsSettings),
    Alerts(AlertsSettings),
    NewsFeed(NewsFeedSettings),
    MarketMovers(MarketMoversSettings),
}

impl WidgetConfig {
    pub fn kind(&self) -> WidgetKind {
        match self {
            WidgetConfig::PortfolioOverview(_) => WidgetKind::PortfolioOverview,
            WidgetConfig::Watchlist(_) => WidgetKind::Watchlist,
            WidgetConfig::AiInsights(_) => WidgetKind::AiInsights,
            WidgetConfig::Alerts(_) => WidgetKind::Alerts,
            WidgetConfig::NewsFeed(_) => WidgetKind::NewsFeed,
            WidgetConfig::MarketMovers(_) => WidgetKind::MarketMovers,
        }
    }

    fn from_value(kind: WidgetKind, value: &serde_json::Value) -> serde_json::Result<Self> {
        let value = value.clone();
        Ok(match kind {
            WidgetKind::PortfolioOverview => {
                WidgetConfig::PortfolioOverview(serde_json::from_value(value)?)
            }
            WidgetKind::Watchlist => WidgetConfig::Watchlist(serde_json::from_value(value)?),
            WidgetKind::AiInsights => WidgetConfig::AiInsights(serde_json::from_value(value)?),
            WidgetKind::Alerts => WidgetConfig::Alerts(serde_json::from_value(value)?),
            WidgetKind::NewsFeed => WidgetConfig::NewsFeed(serde_json::from_value(value)?),
            WidgetKind::MarketMovers => {
                WidgetConfig::MarketMovers(serde_json::from_value(value)?)
            }
        })
    }

    /// Serialize back into the free-form settings blob stored on the instance.
    pub fn to_settings(&self) -> serde_json::Value {
        let result = match self {
            WidgetConfig::PortfolioOverview(s) => serde_json::to_value(s),
            WidgetConfig::Watchlist(s) => serde_json::to_value(s),
            WidgetConfig::AiInsights(s) => serde_json::to_value(s),
            WidgetConfig::Alerts(s) => serde_json::to_value(s),
            WidgetConfig::NewsFeed(s) => serde_json::to_value(s),
            WidgetConfig::MarketMovers(s) => serde_json::to_value(s),
        };
        result.unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Clamp numeric fields and tidy symbol lists so downstream code never
    /// sees out-of-range values.
    pub fn normalized(mut self) -> Self {
        match &mut self {
            WidgetConfig::Watchlist(s) => {
                s.symbols = normalize_symbols(&s.symbols);
            }
            WidgetConfig::AiInsights(s) => {
                s.max_items = s.max_items.clamp(1, 100);
                s.categories.dedup();
            }
            WidgetConfig::NewsFeed(s) => {
                s.max_items = s.max_items.clamp(1, 50);
                s.sources = dedup_preserving_order(&s.sources);
            }
            WidgetConfig::MarketMovers(s) => {
                s.count = s.count.clamp(1, 25);
            }
            WidgetConfig::PortfolioOverview(_) | WidgetConfig::Alerts(_) => {}
        }
        self
    }
}

fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Why a widget instance rendered as a placeholder instead of its module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The module load has not completed yet.
    Loading,
    /// The type tag is not in the catalogue, likely written by a newer release.
    UnknownKind,
    LoadFailed(String),
}

/// Placeholder card that keeps the grid cell when a widget cannot render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetFallback {
    pub widget_id: String,
    pub tag: String,
    pub reason: FallbackReason,
}

impl WidgetFallback {
    pub fn loading(instance: &WidgetInstance) -> Self {
        Self {
            widget_id: instance.id.clone(),
            tag: instance.kind.clone(),
            reason: FallbackReason::Loading,
        }
    }

    pub fn unsupported(instance: &WidgetInstance) -> Self {
        Self {
            widget_id: instance.id.clone(),
            tag: instance.kind.clone(),
            reason: FallbackReason::UnknownKind,
        }
    }

    pub fn failed(instance: &WidgetInstance, message: String) -> Self {
        Self {
            widget_id: instance.id.clone(),
            tag: instance.kind.clone(),
            reason: FallbackReason::LoadFailed(message),
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self.reason {
            FallbackReason::Loading => "Loading…",
            FallbackReason::UnknownKind => "Unsupported",
            FallbackReason::LoadFailed(_) => "Unavailable",
        }
    }
}

/// Outcome of resolving one widget instance against the registry.
#[derive(Clone)]
pub enum ResolvedWidget {
    Ready {
        module: Arc<dyn WidgetModule>,
        config: WidgetConfig,
    },
    Fallback(WidgetFallback),
}

impl ResolvedWidget {
    pub fn is_ready(&self) -> bool {
        matches!(self, ResolvedWidget::Ready { .. })
    }
}

/// A loaded widget implementation. Concrete modules carry the rendering and
/// data-fetch entry points the host shell binds to.
pub trait WidgetModule: Send + Sync {
    fn kind(&self) -> WidgetKind;

    fn display_name(&self) -> &'static str {
        self.kind().descriptor().display_name
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("widget module '{kind}' failed to load: {message}")]
pub struct WidgetLoadError {
    pub kind: WidgetKind,
    pub message: String,
}

/// Fetches the implementation behind a widget kind. Production bundles ship
/// everything in-process; tests substitute slow or failing loaders.
#[async_trait]
pub trait WidgetLoader: Send + Sync {
    async fn load(&self, kind: WidgetKind) -> Result<Arc<dyn WidgetModule>, WidgetLoadError>;
}

struct BuiltinModule(WidgetKind);

impl WidgetModule for BuiltinModule {
    fn kind(&self) -> WidgetKind {
        self.0
    }
}

static BUILTIN_MODULES: Lazy<HashMap<WidgetKind, Arc<dyn WidgetModule>>> = Lazy::new(|| {
    ALL_KINDS
        .iter()
        .map(|&kind| (kind, Arc::new(BuiltinModule(kind)) as Arc<dyn WidgetModule>))
        .collect()
});

/// Loader backed by the modules compiled into this crate.
pub struct BuiltinLoader;

#[async_trait]
impl WidgetLoader for BuiltinLoader {
    async fn load(&self, kind: WidgetKind) -> Result<Arc<dyn WidgetModule>, WidgetLoadError> {
        BUILTIN_MODULES
            .get(&kind)
            .cloned()
            .ok_or_else(|| WidgetLoadError {
                kind,
                message: "module not bundled".to_string(),
            })
    }
}

/// Catalogue plus module cache. Loads are deduplicated per kind: concurrent
/// widgets of the same kind share one in-flight load, and a failed load is
/// retried on the next request instead of being cached.
pub struct WidgetRegistry {
    loader: Arc<dyn WidgetLoader>,
    modules: [OnceCell<Arc<dyn WidgetModule>>; 6],
}

impl WidgetRegistry {
    pub fn new(loader: Arc<dyn WidgetLoader>) -> Self {
        Self {
            loader,
            modules: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(BuiltinLoader))
    }

    pub fn contains(&self, tag: &str) -> bool {
        WidgetKind::from_tag(tag).is_some()
    }

    /// Default span for a type tag at a breakpoint. Tags outside the
    /// catalogue get a conservative card so their fallback still fits the
    /// grid.
    pub fn span_for(&self, tag: &str, breakpoint: Breakpoint) -> SpanHint {
        match WidgetKind::from_tag(tag) {
            Some(kind) => kind.descriptor().default_span(breakpoint),
            None => SpanHint {
                w: breakpoint.columns().min(4),
                h: 3,
            },
        }
    }

    /// Catalogue entries sorted by display name, for widget pickers.
    pub fn descriptors(&self) -> Vec<&'static WidgetDescriptor> {
        let mut all: Vec<_> = CATALOGUE.iter().collect();
        all.sort_by_key(|d| d.display_name);
        all
    }

    /// Parse an instance's settings blob against its kind's schema. Malformed
    /// settings fall back to the kind's defaults rather than failing the
    /// dashboard; the result is always normalized.
    pub fn widget_config(&self, instance: &WidgetInstance) -> Option<WidgetConfig> {
        let kind = WidgetKind::from_tag(&instance.kind)?;
        let config = if instance.settings.is_null() {
            kind.descriptor().default_config()
        } else {
            match WidgetConfig::from_value(kind, &instance.settings) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(
                        widget = %instance.id,
                        kind = %kind,
                        error = %err,
                        "invalid widget settings, using defaults"
                    );
                    kind.descriptor().default_config()
                }
            }
        };
        Some(config.normalized())
    }

    /// Module for `kind` if a load already completed, without triggering one.
    pub fn module_if_loaded(&self, kind: WidgetKind) -> Option<Arc<dyn WidgetModule>> {
        self.modules[kind.index()].get().cloned()
    }

    pub async fn load(&self, kind: WidgetKind) -> Result<Arc<dyn WidgetModule>, WidgetLoadError> {
        let cell = &self.modules[kind.index()];
        cell.get_or_try_init(|| self.loader.load(kind))
            .await
            .map(Arc::clone)
    }

    /// Resolve one instance without waiting on a load. A kind whose module
    /// is not cached yet comes back as the loading placeholder; hosts render
    /// it and swap in the result of [`WidgetRegistry::resolve`] when that
    /// completes.
    pub fn resolve_now(&self, instance: &WidgetInstance) -> ResolvedWidget {
        let Some(kind) = WidgetKind::from_tag(&instance.kind) else {
            return ResolvedWidget::Fallback(WidgetFallback::unsupported(instance));
        };
        match self.module_if_loaded(kind) {
            Some(module) => {
                let config = self
                    .widget_config(instance)
                    .unwrap_or_else(|| kind.descriptor().default_config());
                ResolvedWidget::Ready { module, config }
            }
            None => ResolvedWidget::Fallback(WidgetFallback::loading(instance)),
        }
    }

    /// Resolve one instance to a renderable widget. Never fails: unknown tags
    /// and load errors come back as fallback placeholders so the rest of the
    /// dashboard is unaffected.
    pub async fn resolve(&self, instance: &WidgetInstance) -> ResolvedWidget {
        let Some(kind) = WidgetKind::from_tag(&instance.kind) else {
            tracing::warn!(
                widget = %instance.id,
                kind = %instance.kind,
                "unknown widget type, rendering fallback"
            );
            return ResolvedWidget::Fallback(WidgetFallback::unsupported(instance));
        };
        let config = self
            .widget_config(instance)
            .unwrap_or_else(|| kind.descriptor().default_config());
        match self.load(kind).await {
            Ok(module) => ResolvedWidget::Ready { module, config },
            Err(err) => {
                tracing::warn!(
                    widget = %instance.id,
                    kind = %kind,
                    error = %err,
                    "widget module load failed, rendering fallback"
                );
                ResolvedWidget::Fallback(WidgetFallback::failed(instance, err.message))
            }
        }
    }

    /// Starter dashboard for accounts with nothing persisted yet.
    pub fn default_config(&self, user_id: &str) -> DashboardConfig {
        let mut config = DashboardConfig::new(user_id);
        for kind in [
            WidgetKind::PortfolioOverview,
            WidgetKind::Watchlist,
            WidgetKind::AiInsights,
            WidgetKind::Alerts,
        ] {
            let (next, id) = layout::add_widget(&config, kind);
            config = next;
            if kind == WidgetKind::Watchlist {
                if let Some(instance) = config.widgets.iter_mut().find(|w| w.id == id) {
                    instance.settings = WidgetConfig::Watchlist(WatchlistSettings {
                        symbols: vec![
                            "AAPL".to_string(),
                            "MSFT".to_string(),
                            "NVDA".to_string(),
                            "SPY".to_string(),
                        ],
                        sort: WatchlistSort::Custom,
                    })
                    .to_settings();
                }
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn instance(kind: &str, settings: serde_json::Value) -> WidgetInstance {
        let mut inst = WidgetInstance::new(kind, "Test");
        inst.settings = settings;
        inst
    }

    #[test]
    fn tags_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(WidgetKind::from_tag(kind.as_tag()), Some(kind));
        }
        assert_eq!(WidgetKind::from_tag("crypto-heatmap"), None);
    }

    #[test]
    fn parses_valid_settings() {
        let registry = WidgetRegistry::with_defaults();
        let inst = instance(
            "watchlist",
            serde_json::json!({"symbols": ["aapl", " msft ", "AAPL"], "sort": "symbol"}),
        );
        let config = registry.widget_config(&inst).unwrap();
        match config {
            WidgetConfig::Watchlist(s) => {
                assert_eq!(s.symbols, vec!["AAPL", "MSFT"]);
                assert_eq!(s.sort, WatchlistSort::Symbol);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let registry = WidgetRegistry::with_defaults();
        let inst = instance("market-movers", serde_json::json!({"count": "lots"}));
        let config = registry.widget_config(&inst).unwrap();
        assert_eq!(
            config,
            WidgetConfig::MarketMovers(MarketMoversSettings::default())
        );
    }

    #[test]
    fn missing_fields_use_field_defaults() {
        let registry = WidgetRegistry::with_defaults();
        let inst = instance("news-feed", serde_json::json!({"sources": ["Reuters"]}));
        match registry.widget_config(&inst).unwrap() {
            WidgetConfig::NewsFeed(s) => {
                assert_eq!(s.max_items, 15);
                assert_eq!(s.sources, vec!["Reuters"]);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn normalization_clamps_counts() {
        let registry = WidgetRegistry::with_defaults();
        let inst = instance("ai-insights", serde_json::json!({"maxItems": 10_000}));
        match registry.widget_config(&inst).unwrap() {
            WidgetConfig::AiInsights(s) => assert_eq!(s.max_items, 100),
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_kind_resolves_to_fallback() {
        let registry = WidgetRegistry::with_defaults();
        let inst = instance("crypto-heatmap", serde_json::Value::Null);
        match registry.resolve(&inst).await {
            ResolvedWidget::Fallback(fb) => {
                assert_eq!(fb.tag, "crypto-heatmap");
                assert_eq!(fb.reason, FallbackReason::UnknownKind);
                assert_eq!(fb.indicator(), "Unsupported");
            }
            ResolvedWidget::Ready { .. } => panic!("expected fallback"),
        }
    }

    struct CountingLoader {
        calls: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl WidgetLoader for CountingLoader {
        async fn load(
            &self,
            kind: WidgetKind,
        ) -> Result<Arc<dyn WidgetModule>, WidgetLoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(Arc::new(BuiltinModule(kind)))
        }
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_load() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let registry = Arc::new(WidgetRegistry::new(loader.clone()));

        let a = instance("watchlist", serde_json::Value::Null);
        let b = instance("watchlist", serde_json::Value::Null);
        let (r1, r2) = {
            let reg1 = registry.clone();
            let reg2 = registry.clone();
            let task1 = tokio::spawn(async move { reg1.resolve(&a).await.is_ready() });
            let task2 = tokio::spawn(async move { reg2.resolve(&b).await.is_ready() });
            tokio::task::yield_now().await;
            loader.release.notify_waiters();
            loader.release.notify_waiters();
            (task1.await.unwrap(), task2.await.unwrap())
        };

        assert!(r1 && r2);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_now_reports_loading_until_the_module_arrives() {
        let loader = Arc::new(CountingLoader {
            calls: AtomicUsize::new(0),
            release: Notify::new(),
        });
        let registry = Arc::new(WidgetRegistry::new(loader.clone()));
        let inst = instance("watchlist", serde_json::Value::Null);

        match registry.resolve_now(&inst) {
            ResolvedWidget::Fallback(fb) => {
                assert_eq!(fb.reason, FallbackReason::Loading);
                assert_eq!(fb.indicator(), "Loading…");
            }
            ResolvedWidget::Ready { .. } => panic!("module cannot be loaded yet"),
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);

        let resolved = {
            let registry = registry.clone();
            let inst = inst.clone();
            let task = tokio::spawn(async move { registry.resolve(&inst).await.is_ready() });
            tokio::task::yield_now().await;
            loader.release.notify_waiters();
            task.await.unwrap()
        };
        assert!(resolved);
        assert!(registry.resolve_now(&inst).is_ready());
    }

    struct FlakyLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WidgetLoader for FlakyLoader {
        async fn load(
            &self,
            kind: WidgetKind,
        ) -> Result<Arc<dyn WidgetModule>, WidgetLoadError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(WidgetLoadError {
                    kind,
                    message: "bundle fetch timed out".to_string(),
                })
            } else {
                Ok(Arc::new(BuiltinModule(kind)))
            }
        }
    }

    #[tokio::test]
    async fn failed_load_is_retried_not_cached() {
        let loader = Arc::new(FlakyLoader {
            calls: AtomicUsize::new(0),
        });
        let registry = WidgetRegistry::new(loader.clone());
        let inst = instance("alerts", serde_json::Value::Null);

        match registry.resolve(&inst).await {
            ResolvedWidget::Fallback(fb) => {
                assert!(matches!(fb.reason, FallbackReason::LoadFailed(_)));
                assert_eq!(fb.indicator(), "Unavailable");
            }
            ResolvedWidget::Ready { .. } => panic!("first load should fail"),
        }
        assert!(registry.module_if_loaded(WidgetKind::Alerts).is_none());

        assert!(registry.resolve(&inst).await.is_ready());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert!(registry.module_if_loaded(WidgetKind::Alerts).is_some());
    }

    #[test]
    fn default_dashboard_has_four_widgets() {
        let registry = WidgetRegistry::with_defaults();
        let config = registry.default_config("user-1");
        assert_eq!(config.widgets.len(), 4);
        let kinds: Vec<_> = config.widgets.iter().map(|w| w.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["portfolio-overview", "watchlist", "ai-insights", "alerts"]
        );
        for bp in Breakpoint::ALL {
            assert_eq!(config.placements(bp).len(), 4);
        }
    }
}
