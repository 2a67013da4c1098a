use proptest::prelude::*;
use tm_model::Threat;
use tm_report::{
    category_by_likelihood, count_by_category, count_by_likelihood, count_by_source,
    count_by_target, summarize, target_by_likelihood, top_targets, ChartId, DashboardLayout,
    RenderSupervisor, TOP_TARGETS,
};

fn optional_label(values: &'static [&'static str]) -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        proptest::sample::select(values).prop_map(|v| Some(v.to_string())),
        "[a-z ]{0,8}".prop_map(Some),
    ]
}

fn threat() -> impl Strategy<Value = Threat> {
    (
        "[a-z]{1,6}",
        optional_label(&["Spoofing", "tampering", "REPUDIATION", "Denial of Service"]),
        optional_label(&["High", "medium", "Low", "Critical"]),
        optional_label(&["API", "DB", "Queue", "Bucket", "Gateway", ""]),
        optional_label(&["Insider", "External attacker"]),
    )
        .prop_map(|(name, category, likelihood, target, source)| Threat {
            name,
            stride_category: category,
            likelihood,
            target,
            source,
            ..Threat::default()
        })
}

fn sum<T>(items: &[T], count: impl Fn(&T) -> usize) -> usize {
    items.iter().map(count).sum()
}

#[test]
fn test_empty_catalog_renders() {
    let summary = summarize(&[]);
    let mut supervisor = RenderSupervisor::new();
    let views = supervisor.render_layout(&DashboardLayout::default(), &summary);
    assert_eq!(views.len(), ChartId::ALL.len());
    assert!(supervisor.failed_charts().is_empty());
}

proptest! {
    #[test]
    fn prop_every_threat_lands_in_one_bucket(threats in prop::collection::vec(threat(), 0..60)) {
        let n = threats.len();
        prop_assert_eq!(sum(&count_by_category(&threats), |b| b.count), n);
        prop_assert_eq!(sum(&count_by_likelihood(&threats), |l| l.count), n);
        prop_assert_eq!(sum(&count_by_target(&threats), |b| b.count), n);
        prop_assert_eq!(sum(&count_by_source(&threats), |b| b.count), n);
        prop_assert_eq!(count_by_category(&threats).len(), 7);
        prop_assert_eq!(count_by_likelihood(&threats).len(), 4);
    }

    #[test]
    fn prop_top_targets_bounded_and_sorted(threats in prop::collection::vec(threat(), 0..60)) {
        let ranked = top_targets(&threats, TOP_TARGETS);
        prop_assert!(ranked.len() <= TOP_TARGETS);
        prop_assert!(ranked.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn prop_cross_tabs_cover_full_domain(threats in prop::collection::vec(threat(), 0..60)) {
        let by_category = category_by_likelihood(&threats);
        prop_assert_eq!(by_category.len(), 4);
        for series in &by_category {
            prop_assert_eq!(series.points.len(), 7);
        }
        prop_assert_eq!(sum(&by_category, |s| s.total()), threats.len());

        let domain = top_targets(&threats, TOP_TARGETS);
        for series in target_by_likelihood(&threats, TOP_TARGETS) {
            let labels: Vec<&str> = series.points.iter().map(|p| p.label.as_str()).collect();
            let expected: Vec<&str> = domain.iter().map(|b| b.label.as_str()).collect();
            prop_assert_eq!(labels, expected);
        }
    }

    #[test]
    fn prop_standard_charts_never_fall_back(threats in prop::collection::vec(threat(), 0..60)) {
        let summary = summarize(&threats);
        let mut supervisor = RenderSupervisor::new();
        let views = supervisor.render_layout(&DashboardLayout::default(), &summary);
        prop_assert!(views.iter().all(|v| !v.is_fallback()));
    }
}
