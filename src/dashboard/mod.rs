pub mod config;
pub mod controller;
pub mod layout;
pub mod persistence;
pub mod registry;
pub mod session;

pub use config::{Breakpoint, DashboardConfig, Placement, WidgetInstance};
pub use controller::{DashboardController, DashboardEvent, DashboardPhase, SaveOutcome};
pub use persistence::{ConfigGateway, DashboardApi, FileStore};
pub use registry::{ResolvedWidget, WidgetKind, WidgetRegistry};
pub use session::EditSession;
