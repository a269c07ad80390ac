use crate::models::{CompositeRating, InspectionRecord, RatingDistribution, RatingSource};

type Judgement = fn(&InspectionRecord) -> Option<i32>;

/// Historical Ofsted weighting of the post-2024 category judgements.
pub const CATEGORY_WEIGHTS: [(Judgement, f64); 4] = [
    (|inspection: &InspectionRecord| inspection.quality_of_education, 0.40),
    (|inspection: &InspectionRecord| inspection.leadership_and_management, 0.30),
    (|inspection: &InspectionRecord| inspection.behaviour_and_attitudes, 0.20),
    (|inspection: &InspectionRecord| inspection.personal_development, 0.10),
];

pub fn calculate_rating(inspection: Option<&InspectionRecord>) -> Option<CompositeRating> {
    let inspection = inspection?;

    if let Some(outcome) = inspection.overall_outcome.and_then(valid_grade) {
        return Some(CompositeRating {
            rating: outcome,
            is_calculated: false,
            source: RatingSource::Official,
            categories_used: 0,
            total_categories: CATEGORY_WEIGHTS.len(),
        });
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut categories_used = 0usize;

    for (judgement, weight) in CATEGORY_WEIGHTS.iter() {
        if let Some(grade) = judgement(inspection).and_then(valid_grade) {
            // 1 (Outstanding) scores 4 points, 4 (Inadequate) scores 1.
            weighted_sum += f64::from(5 - grade) * weight;
            total_weight += weight;
            categories_used += 1;
        }
    }

    if categories_used == 0 {
        return None;
    }

    Some(CompositeRating {
        rating: rating_for_average(weighted_sum / total_weight),
        is_calculated: true,
        source: RatingSource::Calculated,
        categories_used,
        total_categories: CATEGORY_WEIGHTS.len(),
    })
}

pub fn rating_for_average(average: f64) -> u8 {
    if average >= 3.5 {
        1
    } else if average >= 2.5 {
        2
    } else if average >= 1.5 {
        3
    } else {
        4
    }
}

pub fn rating_label(rating: u8) -> &'static str {
    match rating {
        1 => "Outstanding",
        2 => "Good",
        3 => "Requires improvement",
        4 => "Inadequate",
        _ => "N/A",
    }
}

pub fn summarize_ratings<'a, I>(inspections: I) -> RatingDistribution
where
    I: IntoIterator<Item = Option<&'a InspectionRecord>>,
{
    let mut distribution = RatingDistribution::default();

    for inspection in inspections {
        match calculate_rating(inspection) {
            Some(composite) => {
                let slot = usize::from(composite.rating - 1);
                if composite.is_calculated {
                    distribution.calculated[slot] += 1;
                } else {
                    distribution.official[slot] += 1;
                }
            }
            None => distribution.unrated += 1,
        }
    }

    distribution
}

fn valid_grade(value: i32) -> Option<u8> {
    match value {
        1..=4 => u8::try_from(value).ok(),
        _ => None,
    }
}
