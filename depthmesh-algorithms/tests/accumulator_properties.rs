//! Property-based tests for accumulation and quality tiers.
//!
//! Run with: cargo test -p depthmesh-algorithms -- proptest

use depthmesh_algorithms::{AccumulatorConfig, DuplicateSearch, PointCloudAccumulator, QualityValidator};
use depthmesh_core::Point3f;
use proptest::prelude::*;

/// A batch of samples inside a small cube so duplicates are common
fn arb_batch() -> impl Strategy<Value = (Vec<Point3f>, Vec<f32>)> {
    prop::collection::vec((prop::array::uniform3(0.0f32..0.05), 0.0f32..=1.0), 0..120).prop_map(
        |samples| {
            let points = samples.iter().map(|(p, _)| Point3f::from(*p)).collect();
            let confidences = samples.iter().map(|(_, c)| *c).collect();
            (points, confidences)
        },
    )
}

fn min_pairwise_distance(points: &[Point3f]) -> f32 {
    let mut min = f32::INFINITY;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            min = min.min((a - b).norm());
        }
    }
    min
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_no_duplicates_retained(batches in prop::collection::vec(arb_batch(), 1..5)) {
        let mut acc = PointCloudAccumulator::new();
        for (points, confidences) in &batches {
            acc.accumulate(points, confidences).unwrap();
        }
        let positions: Vec<Point3f> = acc.cloud().positions().collect();
        prop_assert!(min_pairwise_distance(&positions) >= 0.005);
        prop_assert!(acc.cloud().confidences().all(|c| c >= 0.5));
    }

    #[test]
    fn proptest_cardinality_cap(
        batches in prop::collection::vec(arb_batch(), 1..6),
        max_points in 1usize..60,
    ) {
        let config = AccumulatorConfig::default().with_max_points(max_points);
        let mut acc = PointCloudAccumulator::with_config(config);
        for (points, confidences) in &batches {
            acc.accumulate(points, confidences).unwrap();
            prop_assert!(acc.len() <= max_points);
        }
    }

    #[test]
    fn proptest_grid_matches_linear(batches in prop::collection::vec(arb_batch(), 1..4)) {
        let mut grid = PointCloudAccumulator::new();
        let mut linear = PointCloudAccumulator::with_config(
            AccumulatorConfig::default().with_duplicate_search(DuplicateSearch::Linear),
        );
        for (points, confidences) in &batches {
            let a = grid.accumulate(points, confidences).unwrap();
            let b = linear.accumulate(points, confidences).unwrap();
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(grid.cloud(), linear.cloud());
    }

    #[test]
    fn proptest_quality_tier_monotonic(
        d0 in 0.0f32..2000.0,
        d1 in 0.0f32..2000.0,
        c0 in 0.0f32..=1.0,
        c1 in 0.0f32..=1.0,
    ) {
        let v = QualityValidator::new();
        let (dl, dh) = if d0 <= d1 { (d0, d1) } else { (d1, d0) };
        let (cl, ch) = if c0 <= c1 { (c0, c1) } else { (c1, c0) };
        prop_assert!(v.tier(dl, c0) <= v.tier(dh, c0));
        prop_assert!(v.tier(d0, cl) <= v.tier(d0, ch));
    }
}
