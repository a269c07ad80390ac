use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{InspectionRecord, SchoolResultRow};
use crate::ranking;
use crate::rating;

pub struct ReportInput<'a> {
    pub la_name: &'a str,
    pub data_year: i32,
    pub generated_on: NaiveDate,
    pub results: &'a [SchoolResultRow],
    pub names: &'a HashMap<i64, String>,
    pub inspections: &'a HashMap<i64, InspectionRecord>,
}

fn format_pct(value: Option<f64>) -> String {
    value
        .map(|pct| format!("{pct:.0}%"))
        .unwrap_or_else(|| "-".to_string())
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let ranked = ranking::rank_cohort(input.results);
    let by_urn: HashMap<i64, &SchoolResultRow> =
        input.results.iter().map(|row| (row.urn, row)).collect();

    let mut output = String::new();

    let _ = writeln!(output, "# {} Primary Schools {}", input.la_name, input.data_year);
    let _ = writeln!(
        output,
        "Generated {} from {} schools with KS2 results",
        input.generated_on,
        ranked.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## League Table");

    if ranked.is_empty() {
        let _ = writeln!(output, "No KS2 results recorded for this local authority.");
    } else {
        let _ = writeln!(output, "| Rank | School | RWM expected | RWM higher | Ofsted |");
        let _ = writeln!(output, "|---:|---|---:|---:|---|");
        for entry in ranked.iter() {
            let name = input
                .names
                .get(&entry.urn)
                .map(String::as_str)
                .unwrap_or("Unknown school");
            let row = by_urn.get(&entry.urn);
            let ofsted = match rating::calculate_rating(input.inspections.get(&entry.urn)) {
                Some(composite) if composite.is_calculated => {
                    format!("{} (calculated)", rating::rating_label(composite.rating))
                }
                Some(composite) => rating::rating_label(composite.rating).to_string(),
                None => "Not yet rated".to_string(),
            };
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} |",
                entry.rank,
                name,
                format_pct(row.and_then(|row| row.expected_standard_percentage)),
                format_pct(row.and_then(|row| row.higher_standard_percentage)),
                ofsted
            );
        }
    }

    let summary = rating::summarize_ratings(
        input
            .results
            .iter()
            .map(|row| input.inspections.get(&row.urn)),
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ofsted Ratings");
    for grade in 1..=4u8 {
        let slot = usize::from(grade - 1);
        let _ = writeln!(
            output,
            "- {}: {} official, {} calculated",
            rating::rating_label(grade),
            summary.official[slot],
            summary.calculated[slot]
        );
    }
    let _ = writeln!(output, "- Not yet rated: {}", summary.unrated);

    output
}
