//! Chart rendering and supervision
//!
//! Each chart is produced by a Result-returning render function. The
//! [`RenderSupervisor`] renders the charts of a layout one by one and replaces
//! any chart that fails with a [`ChartView::Fallback`], so a single broken
//! chart never takes the dashboard down. A failed chart stays on its fallback
//! until [`RenderSupervisor::reset`] is called for it.

use crate::aggregate::{BucketCount, DashboardSummary, LevelCount, Series, TOP_TARGETS};
use crate::error::RenderError;
use crate::layout::DashboardLayout;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

/// Dashboard charts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartId {
    /// Total threat count
    Summary,
    /// STRIDE distribution
    Category,
    /// Likelihood distribution
    Likelihood,
    /// Most targeted assets
    TopTargets,
    /// Threat sources
    Sources,
    /// Category × likelihood stacked bars
    CategoryLikelihood,
    /// Target × likelihood stacked bars
    TargetLikelihood,
}

impl ChartId {
    /// Every chart, in default layout order
    pub const ALL: [ChartId; 7] = [
        ChartId::Summary,
        ChartId::Category,
        ChartId::Likelihood,
        ChartId::TopTargets,
        ChartId::Sources,
        ChartId::CategoryLikelihood,
        ChartId::TargetLikelihood,
    ];

    /// Stable identifier used in persisted layouts
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Category => "category",
            Self::Likelihood => "likelihood",
            Self::TopTargets => "top-targets",
            Self::Sources => "sources",
            Self::CategoryLikelihood => "category-likelihood",
            Self::TargetLikelihood => "target-likelihood",
        }
    }

    /// Human-readable title
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Summary => "Total Threats",
            Self::Category => "Threats by STRIDE Category",
            Self::Likelihood => "Threats by Likelihood",
            Self::TopTargets => "Top Targeted Assets",
            Self::Sources => "Threat Sources",
            Self::CategoryLikelihood => "Category by Likelihood",
            Self::TargetLikelihood => "Target by Likelihood",
        }
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Rendered chart data handed to the view layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ChartView {
    /// Single number
    Metric {
        /// Chart id
        chart: ChartId,
        /// Value
        value: usize,
    },
    /// Horizontal bars
    Bars {
        /// Chart id
        chart: ChartId,
        /// Bars in display order
        bars: Vec<BucketCount>,
    },
    /// Stacked bars
    Stacked {
        /// Chart id
        chart: ChartId,
        /// One series per stack layer
        series: Vec<Series>,
    },
    /// Placeholder shown when rendering failed
    Fallback {
        /// Chart id
        chart: ChartId,
        /// Failure message
        reason: String,
    },
}

impl ChartView {
    /// Chart this view belongs to
    #[must_use]
    pub fn chart(&self) -> ChartId {
        match self {
            Self::Metric { chart, .. }
            | Self::Bars { chart, .. }
            | Self::Stacked { chart, .. }
            | Self::Fallback { chart, .. } => *chart,
        }
    }

    /// Whether this is a fallback placeholder
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Plain-text rendering for terminals
    #[must_use]
    pub fn to_text(&self) -> String {
        let chart = self.chart();
        let mut out = format!("== {} ==\n", chart.title());
        match self {
            Self::Metric { value, .. } => {
                let _ = writeln!(out, "{value}");
            }
            Self::Bars { bars, .. } => write_bars(&mut out, bars),
            Self::Stacked { series, .. } => {
                for s in series {
                    let _ = writeln!(out, "[{}]", s.name);
                    write_bars(&mut out, &s.points);
                }
            }
            Self::Fallback { reason, .. } => {
                let _ = writeln!(out, "chart unavailable: {reason}");
                let _ = writeln!(out, "(reset the chart to try again)");
            }
        }
        out
    }
}

const BAR_WIDTH: usize = 40;

fn write_bars(out: &mut String, bars: &[BucketCount]) {
    let max = bars.iter().map(|b| b.count).max().unwrap_or(0);
    let label_width = bars.iter().map(|b| b.label.len()).max().unwrap_or(0);
    for bar in bars {
        let len = if max == 0 { 0 } else { bar.count * BAR_WIDTH / max };
        let _ = writeln!(
            out,
            "{:<lw$} | {:<bw$} {}",
            bar.label,
            "#".repeat(len),
            bar.count,
            lw = label_width,
            bw = BAR_WIDTH,
        );
    }
}

/// Produces chart views from a summary
pub trait ChartRenderer {
    /// Render one chart
    ///
    /// # Errors
    /// [`RenderError`] when the summary cannot be drawn as that chart.
    fn render(&self, chart: ChartId, summary: &DashboardSummary) -> Result<ChartView, RenderError>;
}

/// Renderer for the built-in charts
///
/// Checks the invariants each chart relies on before drawing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRenderer;

impl ChartRenderer for StandardRenderer {
    fn render(&self, chart: ChartId, summary: &DashboardSummary) -> Result<ChartView, RenderError> {
        match chart {
            ChartId::Summary => Ok(ChartView::Metric {
                chart,
                value: summary.total,
            }),
            ChartId::Category => bars(chart, summary.total, summary.by_category.clone()),
            ChartId::Likelihood => bars(chart, summary.total, levels(&summary.by_likelihood)),
            ChartId::Sources => bars(chart, summary.total, summary.by_source.clone()),
            ChartId::TopTargets => ranking(chart, &summary.top_targets),
            ChartId::CategoryLikelihood => {
                stacked(chart, &summary.category_by_likelihood, Some(summary.total))
            }
            ChartId::TargetLikelihood => stacked(chart, &summary.target_by_likelihood, None),
        }
    }
}

fn levels(counts: &[LevelCount]) -> Vec<BucketCount> {
    counts
        .iter()
        .map(|l| BucketCount {
            label: l.level.clone(),
            count: l.count,
        })
        .collect()
}

fn bars(chart: ChartId, total: usize, bars: Vec<BucketCount>) -> Result<ChartView, RenderError> {
    let actual: usize = bars.iter().map(|b| b.count).sum();
    if actual != total {
        return Err(RenderError::InconsistentTotals {
            chart,
            expected: total,
            actual,
        });
    }
    Ok(ChartView::Bars { chart, bars })
}

fn ranking(chart: ChartId, bars: &[BucketCount]) -> Result<ChartView, RenderError> {
    if bars.len() > TOP_TARGETS {
        return Err(RenderError::InvalidRanking {
            chart,
            reason: format!("{} entries, limit {TOP_TARGETS}", bars.len()),
        });
    }
    if bars.windows(2).any(|w| w[0].count < w[1].count) {
        return Err(RenderError::InvalidRanking {
            chart,
            reason: "counts not in descending order".to_string(),
        });
    }
    Ok(ChartView::Bars {
        chart,
        bars: bars.to_vec(),
    })
}

fn stacked(
    chart: ChartId,
    series: &[Series],
    expected_total: Option<usize>,
) -> Result<ChartView, RenderError> {
    if let Some(first) = series.first() {
        let width = first.points.len();
        if let Some(ragged) = series.iter().find(|s| s.points.len() != width) {
            return Err(RenderError::RaggedSeries {
                chart,
                series: ragged.name.clone(),
                expected: width,
                actual: ragged.points.len(),
            });
        }
    }
    if let Some(expected) = expected_total {
        let actual: usize = series.iter().map(Series::total).sum();
        if actual != expected {
            return Err(RenderError::InconsistentTotals {
                chart,
                expected,
                actual,
            });
        }
    }
    Ok(ChartView::Stacked {
        chart,
        series: series.to_vec(),
    })
}

/// Renders a layout, isolating failures per chart
#[derive(Debug, Default)]
pub struct RenderSupervisor<R = StandardRenderer> {
    renderer: R,
    failed: HashMap<ChartId, String>,
}

impl RenderSupervisor<StandardRenderer> {
    /// Supervisor over the built-in renderer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_renderer(StandardRenderer)
    }
}

impl<R: ChartRenderer> RenderSupervisor<R> {
    /// Supervisor over a custom renderer
    #[inline]
    #[must_use]
    pub fn with_renderer(renderer: R) -> Self {
        Self {
            renderer,
            failed: HashMap::new(),
        }
    }

    /// Render a single chart, substituting a fallback on failure
    pub fn render(&mut self, chart: ChartId, summary: &DashboardSummary) -> ChartView {
        if let Some(reason) = self.failed.get(&chart) {
            return ChartView::Fallback {
                chart,
                reason: reason.clone(),
            };
        }

        match self.renderer.render(chart, summary) {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(%chart, error = %e, "chart render failed, showing fallback");
                let reason = e.to_string();
                self.failed.insert(chart, reason.clone());
                ChartView::Fallback { chart, reason }
            }
        }
    }

    /// Render every chart of a layout in order
    pub fn render_layout(
        &mut self,
        layout: &DashboardLayout,
        summary: &DashboardSummary,
    ) -> Vec<ChartView> {
        layout
            .charts()
            .map(|chart| self.render(chart, summary))
            .collect()
    }

    /// Clear a chart's failure so the next render retries it
    ///
    /// Returns `true` if the chart had failed.
    pub fn reset(&mut self, chart: ChartId) -> bool {
        self.failed.remove(&chart).is_some()
    }

    /// Charts currently showing a fallback
    #[must_use]
    pub fn failed_charts(&self) -> Vec<ChartId> {
        ChartId::ALL
            .into_iter()
            .filter(|c| self.failed.contains_key(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::summarize;
    use std::cell::Cell;
    use tm_model::Threat;

    fn threats() -> Vec<Threat> {
        vec![
            Threat::new("a")
                .with_category("Spoofing")
                .with_likelihood("High")
                .with_target("API"),
            Threat::new("b").with_likelihood("Low").with_target("DB"),
        ]
    }

    /// Fails the first `failures` renders of one chart
    struct Flaky {
        chart: ChartId,
        failures: Cell<u32>,
    }

    impl ChartRenderer for Flaky {
        fn render(
            &self,
            chart: ChartId,
            summary: &DashboardSummary,
        ) -> Result<ChartView, RenderError> {
            if chart == self.chart && self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(RenderError::InvalidRanking {
                    chart,
                    reason: "boom".to_string(),
                });
            }
            StandardRenderer.render(chart, summary)
        }
    }

    #[test]
    fn standard_renderer_renders_every_chart() {
        let summary = summarize(&threats());
        for chart in ChartId::ALL {
            let view = StandardRenderer.render(chart, &summary).unwrap();
            assert_eq!(view.chart(), chart);
        }
    }

    #[test]
    fn inconsistent_summary_is_a_render_error() {
        let mut summary = summarize(&threats());
        summary.total = 5;

        let err = StandardRenderer.render(ChartId::Category, &summary).unwrap_err();
        assert!(matches!(err, RenderError::InconsistentTotals { expected: 5, actual: 2, .. }));
    }

    #[test]
    fn ragged_series_is_a_render_error() {
        let mut summary = summarize(&threats());
        summary.target_by_likelihood[1].points.pop();

        let err = StandardRenderer
            .render(ChartId::TargetLikelihood, &summary)
            .unwrap_err();
        assert!(matches!(err, RenderError::RaggedSeries { .. }));
    }

    #[test]
    fn supervisor_isolates_failures() {
        let summary = summarize(&threats());
        let mut supervisor = RenderSupervisor::with_renderer(Flaky {
            chart: ChartId::Sources,
            failures: Cell::new(1),
        });

        let views = supervisor.render_layout(&DashboardLayout::default(), &summary);

        assert_eq!(views.len(), ChartId::ALL.len());
        let fallbacks: Vec<_> = views.iter().filter(|v| v.is_fallback()).collect();
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].chart(), ChartId::Sources);
        assert_eq!(supervisor.failed_charts(), vec![ChartId::Sources]);
    }

    #[test]
    fn fallback_is_sticky_until_reset() {
        let summary = summarize(&threats());
        let mut supervisor = RenderSupervisor::with_renderer(Flaky {
            chart: ChartId::Category,
            failures: Cell::new(1),
        });

        assert!(supervisor.render(ChartId::Category, &summary).is_fallback());
        // renderer would succeed now, but the failure is remembered
        assert!(supervisor.render(ChartId::Category, &summary).is_fallback());

        assert!(supervisor.reset(ChartId::Category));
        assert!(!supervisor.render(ChartId::Category, &summary).is_fallback());
        assert!(!supervisor.reset(ChartId::Category));
    }

    #[test]
    fn text_rendering() {
        let summary = summarize(&threats());
        let text = StandardRenderer
            .render(ChartId::Likelihood, &summary)
            .unwrap()
            .to_text();

        assert!(text.starts_with("== Threats by Likelihood =="));
        assert!(text.contains("Not Assessed"));

        let fallback = ChartView::Fallback {
            chart: ChartId::Sources,
            reason: "bad data".to_string(),
        };
        assert!(fallback.to_text().contains("chart unavailable: bad data"));
    }

    #[test]
    fn chart_ids_serialize_as_keys() {
        for chart in ChartId::ALL {
            let json = serde_json::to_string(&chart).unwrap();
            assert_eq!(json, format!("\"{}\"", chart.key()));
        }
    }
}
