use std::cmp::Ordering;

use crate::models::{CohortPosition, RankEntry, SchoolRanking, SchoolResultRow};

/// The five comparison keys of a result row, missing values read as 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankKey {
    pub expected: f64,
    pub higher: f64,
    pub gap: f64,
    pub gps_expected: f64,
    pub gps_higher: f64,
}

impl RankKey {
    pub fn of(row: &SchoolResultRow) -> Self {
        let expected = row.expected_standard_percentage.unwrap_or(0.0);
        let higher = row.higher_standard_percentage.unwrap_or(0.0);
        Self {
            expected,
            higher,
            gap: expected - higher,
            gps_expected: row.grammar_punctuation_spelling_expected.unwrap_or(0.0),
            gps_higher: row.grammar_punctuation_spelling_higher.unwrap_or(0.0),
        }
    }
}

/// Best row first. A smaller expected/higher gap ranks better.
pub fn compare_rows(a: &SchoolResultRow, b: &SchoolResultRow) -> Ordering {
    compare_keys(&RankKey::of(a), &RankKey::of(b))
}

fn compare_keys(a: &RankKey, b: &RankKey) -> Ordering {
    b.expected
        .total_cmp(&a.expected)
        .then_with(|| b.higher.total_cmp(&a.higher))
        .then_with(|| a.gap.total_cmp(&b.gap))
        .then_with(|| b.gps_expected.total_cmp(&a.gps_expected))
        .then_with(|| b.gps_higher.total_cmp(&a.gps_higher))
}

/// Competition ranking (1, 1, 3) of a cohort, returned in ranked order.
pub fn rank_cohort(rows: &[SchoolResultRow]) -> Vec<RankEntry> {
    let mut keyed: Vec<(i64, RankKey)> = rows
        .iter()
        .map(|row| (row.urn, RankKey::of(row)))
        .collect();
    keyed.sort_by(|a, b| compare_keys(&a.1, &b.1));

    let ranks = competition_ranks(keyed.iter().map(|(_, key)| key));
    keyed
        .into_iter()
        .zip(ranks)
        .map(|((urn, _), rank)| RankEntry { urn, rank })
        .collect()
}

pub fn cohort_position(rows: &[SchoolResultRow], urn: i64) -> Option<CohortPosition> {
    rank_cohort(rows)
        .into_iter()
        .find(|entry| entry.urn == urn)
        .map(|entry| CohortPosition {
            urn,
            rank: entry.rank,
            total: rows.len(),
        })
}

/// National league table for one year.
///
/// Schools reporting an RWM expected figure always rank above schools that
/// only report GPS. Ties never span the two tiers.
pub fn rank_national(data_year: i32, rows: &[SchoolResultRow]) -> Vec<SchoolRanking> {
    let mut ordered: Vec<&SchoolResultRow> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        let a_missing = a.expected_standard_percentage.is_none();
        let b_missing = b.expected_standard_percentage.is_none();
        a_missing.cmp(&b_missing).then_with(|| compare_rows(a, b))
    });

    let tiered_keys: Vec<(bool, RankKey)> = ordered
        .iter()
        .map(|row| (row.expected_standard_percentage.is_some(), RankKey::of(row)))
        .collect();
    let ranks = competition_ranks(tiered_keys.iter());
    let total_schools = ordered.len();

    ordered
        .into_iter()
        .zip(ranks)
        .map(|(row, rank)| SchoolRanking {
            urn: row.urn,
            data_year,
            rank,
            total_schools,
            percentile: percentile(rank, total_schools),
            expected_percentage: row.expected_standard_percentage,
            higher_percentage: row.higher_standard_percentage,
            gps_expected_percentage: row.grammar_punctuation_spelling_expected,
            gps_higher_percentage: row.grammar_punctuation_spelling_higher,
        })
        .collect()
}

/// Share of the cohort at or below this rank, to two decimal places.
pub fn percentile(rank: u32, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let raw = (total - f64::from(rank) + 1.0) / total * 100.0;
    (raw * 100.0).round() / 100.0
}

fn competition_ranks<T, I>(sorted_keys: I) -> Vec<u32>
where
    T: PartialEq,
    I: IntoIterator<Item = T>,
{
    let mut ranks = Vec::new();
    let mut previous: Option<(T, u32)> = None;

    for (index, key) in sorted_keys.into_iter().enumerate() {
        let position = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let rank = match &previous {
            Some((prev_key, prev_rank)) if *prev_key == key => *prev_rank,
            _ => position,
        };
        ranks.push(rank);
        previous = Some((key, rank));
    }

    ranks
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use proptest::prelude::*;

    fn row(urn: i64, expected: f64, higher: f64) -> SchoolResultRow {
        SchoolResultRow {
            urn,
            expected_standard_percentage: Some(expected),
            higher_standard_percentage: Some(higher),
            ..SchoolResultRow::default()
        }
    }

    fn ranks(entries: &[RankEntry]) -> Vec<u32> {
        entries.iter().map(|entry| entry.rank).collect()
    }

    #[test]
    fn empty_cohort_has_no_ranks() {
        assert!(rank_cohort(&[]).is_empty());
    }

    #[test]
    fn identical_rows_share_first_place() {
        let rows = vec![row(1, 70.0, 20.0), row(2, 70.0, 20.0), row(3, 70.0, 20.0)];
        assert_eq!(ranks(&rank_cohort(&rows)), vec![1, 1, 1]);
    }

    #[test]
    fn ties_skip_following_ranks() {
        let rows = vec![row(1, 90.0, 30.0), row(2, 90.0, 30.0), row(3, 80.0, 50.0)];
        let ranked = rank_cohort(&rows);
        assert_eq!(ranks(&ranked), vec![1, 1, 3]);
        assert_eq!(ranked[2].urn, 3);
    }

    #[test]
    fn higher_standard_breaks_expected_ties() {
        let rows = vec![row(1, 85.0, 20.0), row(2, 85.0, 40.0)];
        let ranked = rank_cohort(&rows);
        assert_eq!(ranked[0], RankEntry { urn: 2, rank: 1 });
        assert_eq!(ranked[1], RankEntry { urn: 1, rank: 2 });
    }

    #[test]
    fn grammar_scores_break_remaining_ties() {
        let mut weaker = row(1, 75.0, 25.0);
        weaker.grammar_punctuation_spelling_expected = Some(80.0);
        weaker.grammar_punctuation_spelling_higher = Some(30.0);
        let mut stronger = weaker.clone();
        stronger.urn = 2;
        stronger.grammar_punctuation_spelling_higher = Some(35.0);

        let ranked = rank_cohort(&[weaker, stronger]);
        assert_eq!(ranked[0].urn, 2);
        assert_eq!(ranks(&ranked), vec![1, 2]);
    }

    #[test]
    fn missing_values_compare_as_zero() {
        let blank = SchoolResultRow {
            urn: 1,
            ..SchoolResultRow::default()
        };
        let zeroes = row(2, 0.0, 0.0);
        let scored = row(3, 10.0, 0.0);

        let ranked = rank_cohort(&[blank, zeroes, scored]);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].urn, 3);
        assert_eq!(ranks(&ranked), vec![1, 2, 2]);
    }

    #[test]
    fn position_reports_rank_and_cohort_size() {
        let rows = vec![row(1, 60.0, 10.0), row(2, 90.0, 30.0), row(3, 75.0, 20.0)];
        let position = cohort_position(&rows, 3).expect("school in cohort");
        assert_eq!(position.rank, 2);
        assert_eq!(position.total, 3);
        assert!(cohort_position(&rows, 99).is_none());
    }

    #[test]
    fn national_ranking_puts_schools_without_rwm_last() {
        let gps_only = SchoolResultRow {
            urn: 1,
            grammar_punctuation_spelling_expected: Some(99.0),
            ..SchoolResultRow::default()
        };
        let rows = vec![gps_only, row(2, 40.0, 5.0), row(3, 0.0, 0.0)];

        let table = rank_national(2024, &rows);
        let urns: Vec<i64> = table.iter().map(|entry| entry.urn).collect();
        assert_eq!(urns, vec![2, 3, 1]);
        assert_eq!(table[2].rank, 3);
        assert_eq!(table[0].percentile, 100.0);
        assert!(table.iter().all(|entry| entry.total_schools == 3));
    }

    #[test]
    fn percentile_rounds_to_two_places() {
        assert_eq!(percentile(1, 3), 100.0);
        assert_eq!(percentile(2, 3), 66.67);
        assert_eq!(percentile(3, 3), 33.33);
        assert_eq!(percentile(1, 0), 0.0);
    }

    fn percentage() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![Just(None), (0u8..=10).prop_map(|v| Some(f64::from(v) * 10.0))]
    }

    /// Rows with distinct URNs and coarse scores, so ties are common.
    fn cohort() -> impl Strategy<Value = Vec<SchoolResultRow>> {
        let scores = (percentage(), percentage(), percentage(), percentage());
        prop::collection::vec(scores, 0..40).prop_map(|scores| {
            scores
                .into_iter()
                .enumerate()
                .map(|(index, (expected, higher, gps_expected, gps_higher))| SchoolResultRow {
                    urn: 100_000 + index as i64,
                    expected_standard_percentage: expected,
                    higher_standard_percentage: higher,
                    grammar_punctuation_spelling_expected: gps_expected,
                    grammar_punctuation_spelling_higher: gps_higher,
                })
                .collect()
        })
    }

    fn cohort_and_shuffled() -> impl Strategy<Value = (Vec<SchoolResultRow>, Vec<SchoolResultRow>)> {
        cohort().prop_flat_map(|rows| {
            let shuffled = Just(rows.clone()).prop_shuffle();
            (Just(rows), shuffled)
        })
    }

    fn rank_by_urn(entries: &[RankEntry]) -> BTreeMap<i64, u32> {
        entries.iter().map(|entry| (entry.urn, entry.rank)).collect()
    }

    proptest! {
        #[test]
        fn every_row_is_ranked_once(rows in cohort()) {
            let ranked = rank_cohort(&rows);
            prop_assert_eq!(ranked.len(), rows.len());
            prop_assert_eq!(rank_by_urn(&ranked).len(), rows.len());
            if let Some(first) = ranked.first() {
                prop_assert_eq!(first.rank, 1);
            }
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].rank <= pair[1].rank);
            }
        }

        #[test]
        fn each_school_keeps_its_rank_whatever_the_input_order(
            (rows, shuffled) in cohort_and_shuffled()
        ) {
            let original = rank_cohort(&rows);
            let reordered = rank_cohort(&shuffled);
            prop_assert_eq!(rank_by_urn(&original), rank_by_urn(&reordered));
        }

        #[test]
        fn reranking_ranked_order_is_a_no_op(rows in cohort()) {
            let ranked = rank_cohort(&rows);
            let by_urn: BTreeMap<i64, &SchoolResultRow> =
                rows.iter().map(|row| (row.urn, row)).collect();
            let in_rank_order: Vec<SchoolResultRow> = ranked
                .iter()
                .map(|entry| by_urn[&entry.urn].clone())
                .collect();

            prop_assert_eq!(rank_cohort(&in_rank_order), ranked);
        }
    }

    #[test]
    fn rank_entries_serialize_as_urn_and_rank() {
        let json = serde_json::to_value(RankEntry { urn: 107_500, rank: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({ "urn": 107_500, "rank": 3 }));
    }
}
