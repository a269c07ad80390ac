use chrono::NaiveDate;
use serde::Serialize;

/// One Ofsted inspection event for a school.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionRecord {
    pub urn: i64,
    pub inspection_date: Option<NaiveDate>,
    /// Only populated for inspections before the September 2024 cutover.
    pub overall_outcome: Option<i32>,
    pub quality_of_education: Option<i32>,
    pub leadership_and_management: Option<i32>,
    pub behaviour_and_attitudes: Option<i32>,
    pub personal_development: Option<i32>,
}

/// KS2 attainment for one school in one academic year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolResultRow {
    pub urn: i64,
    pub expected_standard_percentage: Option<f64>,
    pub higher_standard_percentage: Option<f64>,
    pub grammar_punctuation_spelling_expected: Option<f64>,
    pub grammar_punctuation_spelling_higher: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingSource {
    Official,
    Calculated,
}

impl RatingSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RatingSource::Official => "official",
            RatingSource::Calculated => "calculated",
        }
    }

    /// Label shown next to the badge on school pages.
    pub fn display_label(self) -> &'static str {
        match self {
            RatingSource::Official => "Official Ofsted Rating",
            RatingSource::Calculated => "Schoolchecker.io Rating",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRating {
    pub rating: u8,
    pub is_calculated: bool,
    pub source: RatingSource,
    pub categories_used: usize,
    pub total_categories: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    pub urn: i64,
    pub rank: u32,
}

/// "Ranked N of M" for a single school.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortPosition {
    pub urn: i64,
    pub rank: u32,
    pub total: usize,
}

/// A row of the persisted national league table.
#[derive(Debug, Clone, PartialEq)]
pub struct SchoolRanking {
    pub urn: i64,
    pub data_year: i32,
    pub rank: u32,
    pub total_schools: usize,
    pub percentile: f64,
    pub expected_percentage: Option<f64>,
    pub higher_percentage: Option<f64>,
    pub gps_expected_percentage: Option<f64>,
    pub gps_higher_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchoolSummary {
    pub urn: i64,
    pub name: String,
    pub la_code: i32,
    pub la_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatingDistribution {
    /// Indexed by grade - 1.
    pub official: [usize; 4],
    pub calculated: [usize; 4],
    pub unrated: usize,
}
