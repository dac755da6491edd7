//! Pure operations on the dashboard grid: placing, removing and validating
//! widgets across breakpoints. Nothing here touches the network or the
//! controller; every function takes a config and returns a new one.

use crate::dashboard::config::{Breakpoint, DashboardConfig, Placement, WidgetInstance};
use crate::dashboard::registry::{SpanHint, WidgetKind, WidgetRegistry};
use std::collections::HashSet;

/// One way a layout fails validation, tied to the breakpoint it occurred at.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutViolation {
    #[error("{breakpoint}: placement references unknown widget '{widget}'")]
    Orphan { breakpoint: Breakpoint, widget: String },
    #[error("{breakpoint}: widget '{widget}' has no placement")]
    Missing { breakpoint: Breakpoint, widget: String },
    #[error("{breakpoint}: widget '{widget}' is placed more than once")]
    Duplicate { breakpoint: Breakpoint, widget: String },
    #[error("{breakpoint}: widget '{widget}' has a zero-sized span")]
    EmptySpan { breakpoint: Breakpoint, widget: String },
    #[error("{breakpoint}: widget '{widget}' extends past column {columns}")]
    OutOfBounds {
        breakpoint: Breakpoint,
        widget: String,
        columns: u32,
    },
    #[error("{breakpoint}: widgets '{first}' and '{second}' overlap")]
    Overlap {
        breakpoint: Breakpoint,
        first: String,
        second: String,
    },
}

impl LayoutViolation {
    pub fn breakpoint(&self) -> Breakpoint {
        match self {
            LayoutViolation::Orphan { breakpoint, .. }
            | LayoutViolation::Missing { breakpoint, .. }
            | LayoutViolation::Duplicate { breakpoint, .. }
            | LayoutViolation::EmptySpan { breakpoint, .. }
            | LayoutViolation::OutOfBounds { breakpoint, .. }
            | LayoutViolation::Overlap { breakpoint, .. } => *breakpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("widget '{0}' does not exist")]
    UnknownWidget(String),
    #[error("invalid layout: {}", summarize(violations))]
    Invalid { violations: Vec<LayoutViolation> },
}

fn summarize(violations: &[LayoutViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Add a widget of `kind` with its catalogue defaults. The new instance gets
/// a first-fit placement at every breakpoint, so the result always validates
/// if the input did. Returns the new config and the id of the added widget.
pub fn add_widget(config: &DashboardConfig, kind: WidgetKind) -> (DashboardConfig, String) {
    let descriptor = kind.descriptor();
    let instance = WidgetInstance::new(kind.as_tag(), descriptor.display_name)
        .with_settings(descriptor.default_settings());
    let id = instance.id.clone();

    let mut next = config.clone();
    for bp in Breakpoint::ALL {
        let placement = pack_into(next.placements(bp), bp.columns(), &id, descriptor.default_span(bp));
        next.layouts.entry(bp).or_default().push(placement);
    }
    next.widgets.push(instance);
    (next, id)
}

/// Remove a widget instance and its placements at every breakpoint.
pub fn remove_widget(
    config: &DashboardConfig,
    widget_id: &str,
) -> Result<DashboardConfig, LayoutError> {
    if !config.has_widget(widget_id) {
        return Err(LayoutError::UnknownWidget(widget_id.to_string()));
    }
    let mut next = config.clone();
    next.widgets.retain(|w| w.id != widget_id);
    for placements in next.layouts.values_mut() {
        placements.retain(|p| p.widget != widget_id);
    }
    Ok(next)
}

/// Replace one breakpoint's placement list, typically after a drag or resize.
/// The candidate is validated in full; any violation rejects the whole change
/// and the previous config stands.
pub fn apply_layout_change(
    config: &DashboardConfig,
    breakpoint: Breakpoint,
    placements: Vec<Placement>,
) -> Result<DashboardConfig, LayoutError> {
    let mut candidate = config.clone();
    candidate.layouts.insert(breakpoint, placements);
    let violations: Vec<_> = validate(&candidate)
        .into_iter()
        .filter(|v| v.breakpoint() == breakpoint)
        .collect();
    if violations.is_empty() {
        Ok(candidate)
    } else {
        Err(LayoutError::Invalid { violations })
    }
}

/// Check every grid invariant at every breakpoint. An empty result means the
/// config is well formed.
pub fn validate(config: &DashboardConfig) -> Vec<LayoutViolation> {
    let mut violations = Vec::new();
    for bp in Breakpoint::ALL {
        let columns = bp.columns();
        let placements = config.placements(bp);
        let mut seen: HashSet<&str> = HashSet::new();

        for p in placements {
            if !config.has_widget(&p.widget) {
                violations.push(LayoutViolation::Orphan {
                    breakpoint: bp,
                    widget: p.widget.clone(),
                });
            }
            if !seen.insert(p.widget.as_str()) {
                violations.push(LayoutViolation::Duplicate {
                    breakpoint: bp,
                    widget: p.widget.clone(),
                });
            }
            if p.w == 0 || p.h == 0 {
                violations.push(LayoutViolation::EmptySpan {
                    breakpoint: bp,
                    widget: p.widget.clone(),
                });
            } else if p.x.saturating_add(p.w) > columns {
                violations.push(LayoutViolation::OutOfBounds {
                    breakpoint: bp,
                    widget: p.widget.clone(),
                    columns,
                });
            }
        }

        for (i, a) in placements.iter().enumerate() {
            for b in &placements[i + 1..] {
                let degenerate = a.w == 0 || a.h == 0 || b.w == 0 || b.h == 0;
                if !degenerate && a.overlaps(b) {
                    violations.push(LayoutViolation::Overlap {
                        breakpoint: bp,
                        first: a.widget.clone(),
                        second: b.widget.clone(),
                    });
                }
            }
        }

        for w in &config.widgets {
            if !placements.iter().any(|p| p.widget == w.id) {
                violations.push(LayoutViolation::Missing {
                    breakpoint: bp,
                    widget: w.id.clone(),
                });
            }
        }
    }
    violations
}

/// Repair a config loaded from storage so it satisfies every grid invariant.
/// Unknown widget types are kept (they render as fallbacks); everything else
/// that cannot be fixed in place is dropped or repacked, with one warning per
/// repair.
pub fn sanitize(
    config: &DashboardConfig,
    registry: &WidgetRegistry,
) -> (DashboardConfig, Vec<String>) {
    let mut warnings = Vec::new();
    let mut next = config.clone();

    if next.version == 0 {
        warnings.push("lifting legacy config from version 0".to_string());
        next.version = 1;
    }

    let mut seen_ids = HashSet::new();
    next.widgets.retain(|w| {
        if w.id.trim().is_empty() || w.kind.trim().is_empty() {
            warnings.push("dropping widget with a blank id or type".to_string());
            return false;
        }
        if !seen_ids.insert(w.id.clone()) {
            warnings.push(format!("dropping duplicate widget id '{}'", w.id));
            return false;
        }
        true
    });

    for bp in Breakpoint::ALL {
        let columns = bp.columns();
        let original = next.layouts.remove(&bp).unwrap_or_default();
        let mut accepted: Vec<Placement> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for mut p in original {
            if !next.widgets.iter().any(|w| w.id == p.widget) {
                warnings.push(format!(
                    "{bp}: dropping placement for unknown widget '{}'",
                    p.widget
                ));
                continue;
            }
            if !seen.insert(p.widget.clone()) {
                warnings.push(format!(
                    "{bp}: dropping duplicate placement for widget '{}'",
                    p.widget
                ));
                continue;
            }
            let w = p.w.clamp(1, columns);
            let h = p.h.max(1);
            if w != p.w || h != p.h {
                warnings.push(format!("{bp}: clamped span of widget '{}'", p.widget));
                p.w = w;
                p.h = h;
            }
            if p.x.saturating_add(p.w) > columns {
                warnings.push(format!(
                    "{bp}: moved widget '{}' back inside the grid",
                    p.widget
                ));
                p.x = columns - p.w;
            }
            if accepted.iter().any(|q| q.overlaps(&p)) {
                warnings.push(format!("{bp}: repacked overlapping widget '{}'", p.widget));
                let repacked =
                    pack_into(&accepted, columns, &p.widget, SpanHint { w: p.w, h: p.h });
                p = repacked;
            }
            accepted.push(p);
        }

        for w in &next.widgets {
            if seen.contains(&w.id) {
                continue;
            }
            warnings.push(format!("{bp}: adding missing placement for widget '{}'", w.id));
            let span = registry.span_for(&w.kind, bp);
            let placement = pack_into(&accepted, columns, &w.id, span);
            accepted.push(placement);
        }

        next.layouts.insert(bp, accepted);
    }

    (next, warnings)
}

/// First free cell scanning left to right, top to bottom. Only row 0 and the
/// bottom edges of existing placements can start a first fit, so those are
/// the rows tried; the grid has no bottom edge, so the row below everything
/// always fits and the scan cannot fail.
fn pack_into(existing: &[Placement], columns: u32, widget_id: &str, span: SpanHint) -> Placement {
    let w = span.w.clamp(1, columns);
    let h = span.h.max(1);
    let mut rows: Vec<u32> = std::iter::once(0)
        .chain(existing.iter().map(|p| p.y.saturating_add(p.h)))
        .collect();
    rows.sort_unstable();
    rows.dedup();
    for &y in &rows {
        for x in 0..=(columns - w) {
            let candidate = Placement::new(widget_id, x, y, w, h);
            if existing.iter().all(|p| !p.overlaps(&candidate)) {
                return candidate;
            }
        }
    }
    Placement::new(widget_id, 0, *rows.last().unwrap_or(&0), w, h)
}
