use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

fn default_version() -> u32 {
    1
}

fn default_settings() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Named responsive width tiers, narrowest first. Every dashboard carries one
/// grid arrangement per breakpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Xxs,
    Xs,
    Sm,
    Md,
    Lg,
}

impl Breakpoint {
    pub const ALL: [Breakpoint; 5] = [
        Breakpoint::Xxs,
        Breakpoint::Xs,
        Breakpoint::Sm,
        Breakpoint::Md,
        Breakpoint::Lg,
    ];

    /// Column count of the tier's grid. Rows are unbounded.
    pub fn columns(self) -> u32 {
        match self {
            Breakpoint::Xxs => 2,
            Breakpoint::Xs => 4,
            Breakpoint::Sm => 6,
            Breakpoint::Md => 10,
            Breakpoint::Lg => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Breakpoint::Xxs => "xxs",
            Breakpoint::Xs => "xs",
            Breakpoint::Sm => "sm",
            Breakpoint::Md => "md",
            Breakpoint::Lg => "lg",
        }
    }
}

impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One widget instance's cell rectangle on a breakpoint grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    #[serde(rename = "widgetInstanceId")]
    pub widget: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Placement {
    pub fn new(widget: impl Into<String>, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            widget: widget.into(),
            x,
            y,
            w,
            h,
        }
    }

    /// Rectangle intersection, computed in u64 so spans reaching past
    /// `u32::MAX` compare instead of overflowing.
    pub fn overlaps(&self, other: &Placement) -> bool {
        let (ax, ay) = (u64::from(self.x), u64::from(self.y));
        let (bx, by) = (u64::from(other.x), u64::from(other.y));
        ax < bx + u64::from(other.w)
            && bx < ax + u64::from(self.w)
            && ay < by + u64::from(other.h)
            && by < ay + u64::from(self.h)
    }
}

/// One placed, configured occurrence of a widget type. The raw `type` tag is
/// kept as a string so configs mentioning kinds this build does not know
/// survive a load and can be rendered as fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WidgetInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_settings")]
    pub settings: serde_json::Value,
}

impl WidgetInstance {
    pub fn new(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            title: title.into(),
            settings: default_settings(),
        }
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }
}

/// A user's dashboard: the widget list plus one placement set per breakpoint.
/// Loaded once per session, mutated only through the controller, replaced
/// wholesale on save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    /// Layout schema revision. Version 0 payloads predate the field and are
    /// lifted to 1 when the config is sanitized on load; newer versions pass
    /// through untouched so a newer writer's payload survives a round trip.
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub layouts: BTreeMap<Breakpoint, Vec<Placement>>,
    #[serde(default)]
    pub widgets: Vec<WidgetInstance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DashboardConfig {
    /// Fresh, empty dashboard with a client-assigned id. Used when the
    /// service has nothing stored for the user yet.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: default_version(),
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            layouts: BTreeMap::new(),
            widgets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn widget(&self, id: &str) -> Option<&WidgetInstance> {
        self.widgets.iter().find(|w| w.id == id)
    }

    pub fn has_widget(&self, id: &str) -> bool {
        self.widget(id).is_some()
    }

    pub fn placements(&self, breakpoint: Breakpoint) -> &[Placement] {
        self.layouts
            .get(&breakpoint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn placement_of(&self, breakpoint: Breakpoint, widget_id: &str) -> Option<&Placement> {
        self.placements(breakpoint)
            .iter()
            .find(|p| p.widget == widget_id)
    }

    /// True when both configs describe the same widgets and placements.
    /// Ignores ids and timestamps; this is the comparison behind dirty
    /// tracking. A breakpoint with no entry counts the same as one with an
    /// empty placement list.
    pub fn same_arrangement(&self, other: &DashboardConfig) -> bool {
        self.widgets == other.widgets
            && Breakpoint::ALL
                .iter()
                .all(|bp| self.placements(*bp) == other.placements(*bp))
    }
}
