//! Dashboard aggregation
//!
//! Pure functions turning a threat list into chart-ready counts. Every threat
//! lands in exactly one bucket per aggregation; missing or unrecognised values
//! go to the sentinel buckets defined in `tm-model`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tm_model::{Likelihood, StrideCategory, Threat};

/// Number of entries kept by the target ranking
pub const TOP_TARGETS: usize = 10;

/// A labelled count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    /// Bucket label
    pub label: String,
    /// Number of threats
    pub count: usize,
}

/// A likelihood level count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCount {
    /// Likelihood label or `Not Assessed`
    pub level: String,
    /// Number of threats
    pub count: usize,
}

/// One stacked-bar series: a likelihood level across a label domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Likelihood label
    pub name: String,
    /// One point per domain label, zero counts included
    pub points: Vec<BucketCount>,
}

impl Series {
    /// Sum of the series
    #[must_use]
    pub fn total(&self) -> usize {
        self.points.iter().map(|p| p.count).sum()
    }
}

/// Every aggregate the dashboard shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Number of threats
    pub total: usize,
    /// STRIDE distribution
    pub by_category: Vec<BucketCount>,
    /// Likelihood distribution
    pub by_likelihood: Vec<LevelCount>,
    /// Most targeted assets
    pub top_targets: Vec<BucketCount>,
    /// Threat source distribution
    pub by_source: Vec<BucketCount>,
    /// Category × likelihood
    pub category_by_likelihood: Vec<Series>,
    /// Top target × likelihood
    pub target_by_likelihood: Vec<Series>,
}

/// Category bucket label for a threat
#[must_use]
pub fn category_label(threat: &Threat) -> &'static str {
    threat
        .stride()
        .map_or(StrideCategory::SENTINEL, StrideCategory::label)
}

/// Likelihood bucket label for a threat
#[must_use]
pub fn likelihood_label(threat: &Threat) -> &'static str {
    threat
        .likelihood_level()
        .map_or(Likelihood::SENTINEL, Likelihood::label)
}

fn category_domain() -> impl Iterator<Item = &'static str> {
    StrideCategory::ALL
        .into_iter()
        .map(StrideCategory::label)
        .chain(std::iter::once(StrideCategory::SENTINEL))
}

fn likelihood_domain() -> impl Iterator<Item = &'static str> {
    Likelihood::ALL
        .into_iter()
        .map(Likelihood::label)
        .chain(std::iter::once(Likelihood::SENTINEL))
}

/// Count labels into a fixed-then-observed domain
///
/// Domain labels come first (zeros kept); labels outside the domain are
/// appended in first-encounter order.
fn tally<'a>(
    domain: impl IntoIterator<Item = &'a str>,
    labels: impl IntoIterator<Item = &'a str>,
) -> IndexMap<&'a str, usize> {
    let mut counts: IndexMap<&str, usize> = domain.into_iter().map(|l| (l, 0)).collect();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

fn to_buckets(counts: IndexMap<&str, usize>) -> Vec<BucketCount> {
    counts
        .into_iter()
        .map(|(label, count)| BucketCount {
            label: label.to_string(),
            count,
        })
        .collect()
}

/// Counts per STRIDE category, full domain plus `Uncategorized`
#[must_use]
pub fn count_by_category(threats: &[Threat]) -> Vec<BucketCount> {
    to_buckets(tally(category_domain(), threats.iter().map(category_label)))
}

/// Counts per likelihood: High, Medium, Low, Not Assessed
#[must_use]
pub fn count_by_likelihood(threats: &[Threat]) -> Vec<LevelCount> {
    tally(likelihood_domain(), threats.iter().map(likelihood_label))
        .into_iter()
        .map(|(level, count)| LevelCount {
            level: level.to_string(),
            count,
        })
        .collect()
}

/// Counts per target in first-encounter order
#[must_use]
pub fn count_by_target(threats: &[Threat]) -> Vec<BucketCount> {
    to_buckets(tally(std::iter::empty(), threats.iter().map(Threat::target_label)))
}

/// Counts per source in first-encounter order
#[must_use]
pub fn count_by_source(threats: &[Threat]) -> Vec<BucketCount> {
    to_buckets(tally(std::iter::empty(), threats.iter().map(Threat::source_label)))
}

/// The `n` most targeted assets, highest count first
///
/// Ties keep first-encounter order.
#[must_use]
pub fn top_targets(threats: &[Threat], n: usize) -> Vec<BucketCount> {
    let mut ranked = count_by_target(threats);
    // sort_by is stable
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(n);
    ranked
}

fn cross_tab<'a>(
    threats: &'a [Threat],
    domain: &[&'a str],
    row: impl Fn(&'a Threat) -> &'a str,
) -> Vec<Series> {
    likelihood_domain()
        .map(|level| {
            let labels = threats
                .iter()
                .filter(|t| likelihood_label(t) == level)
                .map(&row)
                .filter(|label| domain.contains(label));
            Series {
                name: level.to_string(),
                points: to_buckets(tally(domain.iter().copied(), labels)),
            }
        })
        .collect()
}

/// Category × likelihood, one series per likelihood level
#[must_use]
pub fn category_by_likelihood(threats: &[Threat]) -> Vec<Series> {
    let domain: Vec<&str> = category_domain().collect();
    cross_tab(threats, &domain, |t| category_label(t))
}

/// Target × likelihood over the `n` most targeted assets
///
/// Threats whose target falls outside the ranking are not shown.
#[must_use]
pub fn target_by_likelihood(threats: &[Threat], n: usize) -> Vec<Series> {
    let ranked = top_targets(threats, n);
    let domain: Vec<&str> = ranked.iter().map(|b| b.label.as_str()).collect();
    cross_tab(threats, &domain, |t| t.target_label())
}

/// Compute every dashboard aggregate
#[must_use]
pub fn summarize(threats: &[Threat]) -> DashboardSummary {
    DashboardSummary {
        total: threats.len(),
        by_category: count_by_category(threats),
        by_likelihood: count_by_likelihood(threats),
        top_targets: top_targets(threats, TOP_TARGETS),
        by_source: count_by_source(threats),
        category_by_likelihood: category_by_likelihood(threats),
        target_by_likelihood: target_by_likelihood(threats, TOP_TARGETS),
    }
}
