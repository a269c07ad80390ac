use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{InspectionRecord, SchoolRanking, SchoolResultRow, SchoolSummary};

/// Data-access client. Built once at startup and handed to each command.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResultCsvRow {
    pub urn: i64,
    pub name: String,
    pub la_code: i32,
    pub la_name: String,
    pub data_year: i32,
    pub rwm_exp: Option<f64>,
    pub rwm_high: Option<f64>,
    pub gps_exp: Option<f64>,
    pub gps_high: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InspectionCsvRow {
    pub urn: i64,
    pub inspection_date: Option<NaiveDate>,
    pub outcome: Option<i32>,
    pub quality_of_education: Option<i32>,
    pub effectiveness_of_leadership: Option<i32>,
    pub behaviour_and_attitudes: Option<i32>,
    pub personal_development: Option<i32>,
    pub source_key: Option<String>,
}

impl InspectionCsvRow {
    /// Re-imports of the same inspection collapse onto one key.
    pub fn resolved_source_key(&self) -> String {
        match (&self.source_key, self.inspection_date) {
            (Some(key), _) if !key.trim().is_empty() => key.trim().to_string(),
            (_, Some(date)) => format!("{}-{}", self.urn, date),
            (_, None) => format!("{}-undated", self.urn),
        }
    }
}

pub fn read_result_rows<R: Read>(reader: R) -> anyhow::Result<Vec<ResultCsvRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<ResultCsvRow>().enumerate() {
        rows.push(result.with_context(|| format!("invalid results row {}", index + 1))?);
    }
    Ok(rows)
}

pub fn read_inspection_rows<R: Read>(reader: R) -> anyhow::Result<Vec<InspectionCsvRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<InspectionCsvRow>().enumerate() {
        rows.push(result.with_context(|| format!("invalid inspection row {}", index + 1))?);
    }
    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectionImport {
    pub inserted: usize,
    pub duplicates: usize,
    pub unknown_schools: usize,
}

/// Pairs each row with its 1-based CSV row number, setting aside rows whose
/// URN has no `schools` entry.
pub fn split_by_known_school<'a>(
    rows: &'a [InspectionCsvRow],
    known: &HashSet<i64>,
) -> (Vec<(usize, &'a InspectionCsvRow)>, Vec<(usize, i64)>) {
    let mut accepted = Vec::new();
    let mut unknown = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        if known.contains(&row.urn) {
            accepted.push((index + 1, row));
        } else {
            unknown.push((index + 1, row.urn));
        }
    }

    (accepted, unknown)
}

const INSPECTION_COLUMNS: &str = "i.urn, i.inspection_date, i.outcome, i.quality_of_education, \
     i.effectiveness_of_leadership, i.behaviour_and_attitudes, i.personal_development";

const RESULT_COLUMNS: &str = "r.urn, r.rwm_exp, r.rwm_high, r.gps_exp, r.gps_high";

fn inspection_from_row(row: &PgRow) -> InspectionRecord {
    InspectionRecord {
        urn: row.get("urn"),
        inspection_date: row.get("inspection_date"),
        overall_outcome: row.get("outcome"),
        quality_of_education: row.get("quality_of_education"),
        leadership_and_management: row.get("effectiveness_of_leadership"),
        behaviour_and_attitudes: row.get("behaviour_and_attitudes"),
        personal_development: row.get("personal_development"),
    }
}

fn result_from_row(row: &PgRow) -> SchoolResultRow {
    SchoolResultRow {
        urn: row.get("urn"),
        expected_standard_percentage: row.get("rwm_exp"),
        higher_standard_percentage: row.get("rwm_high"),
        grammar_punctuation_spelling_expected: row.get("gps_exp"),
        grammar_punctuation_spelling_higher: row.get("gps_high"),
    }
}

async fn upsert_result(conn: &mut PgConnection, row: &ResultCsvRow) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schoolchecker.schools (urn, name, la_code, la_name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (urn) DO UPDATE
        SET name = EXCLUDED.name, la_code = EXCLUDED.la_code, la_name = EXCLUDED.la_name
        "#,
    )
    .bind(row.urn)
    .bind(&row.name)
    .bind(row.la_code)
    .bind(&row.la_name)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO schoolchecker.primary_results
        (urn, data_year, rwm_exp, rwm_high, gps_exp, gps_high)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (urn, data_year) DO UPDATE
        SET rwm_exp = EXCLUDED.rwm_exp, rwm_high = EXCLUDED.rwm_high,
            gps_exp = EXCLUDED.gps_exp, gps_high = EXCLUDED.gps_high
        "#,
    )
    .bind(row.urn)
    .bind(row.data_year)
    .bind(row.rwm_exp)
    .bind(row.rwm_high)
    .bind(row.gps_exp)
    .bind(row.gps_high)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_inspection(conn: &mut PgConnection, row: &InspectionCsvRow) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO schoolchecker.inspections
        (urn, inspection_date, outcome, quality_of_education, effectiveness_of_leadership,
         behaviour_and_attitudes, personal_development, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(row.urn)
    .bind(row.inspection_date)
    .bind(row.outcome)
    .bind(row.quality_of_education)
    .bind(row.effectiveness_of_leadership)
    .bind(row.behaviour_and_attitudes)
    .bind(row.personal_development)
    .bind(row.resolved_source_key())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Store {
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;
        info!(max_connections = config.max_connections, "connected to Postgres");
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    pub async fn seed(&self) -> anyhow::Result<()> {
        let results = vec![
            (107_500, "Ashfield Primary School", 383, "Leeds", 2024, Some(84.0), Some(21.0), Some(88.0), Some(40.0)),
            (107_501, "Beckett Park Primary", 383, "Leeds", 2024, Some(84.0), Some(21.0), Some(88.0), Some(40.0)),
            (107_502, "Calverley Parkside Primary", 383, "Leeds", 2024, Some(71.0), Some(12.0), Some(79.0), Some(31.0)),
            (107_503, "Drighlington Primary", 383, "Leeds", 2024, Some(66.0), Some(9.0), None, None),
            (105_310, "Didsbury Road Primary", 352, "Manchester", 2024, Some(79.0), Some(18.0), Some(83.0), Some(36.0)),
        ];
        let mut tx = self.pool.begin().await?;

        for (urn, name, la_code, la_name, data_year, rwm_exp, rwm_high, gps_exp, gps_high) in results {
            upsert_result(
                &mut tx,
                &ResultCsvRow {
                    urn,
                    name: name.to_string(),
                    la_code,
                    la_name: la_name.to_string(),
                    data_year,
                    rwm_exp,
                    rwm_high,
                    gps_exp,
                    gps_high,
                },
            )
            .await?;
        }

        let inspections = vec![
            (107_500, NaiveDate::from_ymd_opt(2023, 3, 14), Some(1), None, None, None, None),
            (107_501, NaiveDate::from_ymd_opt(2025, 1, 22), None, Some(2), Some(1), Some(1), Some(2)),
            (107_502, NaiveDate::from_ymd_opt(2024, 11, 5), None, Some(3), Some(2), Some(2), Some(2)),
            (105_310, NaiveDate::from_ymd_opt(2022, 6, 8), Some(2), Some(2), Some(2), Some(2), Some(2)),
        ];

        for (urn, date, outcome, qoe, leadership, behaviour, personal) in inspections {
            let date = date.context("invalid date")?;
            insert_inspection(
                &mut tx,
                &InspectionCsvRow {
                    urn,
                    inspection_date: Some(date),
                    outcome,
                    quality_of_education: qoe,
                    effectiveness_of_leadership: leadership,
                    behaviour_and_attitudes: behaviour,
                    personal_development: personal,
                    source_key: Some(format!("seed-{urn}")),
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Imports the whole file or nothing.
    pub async fn import_results_csv(&self, csv_path: &Path) -> anyhow::Result<usize> {
        let file = std::fs::File::open(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let rows = read_result_rows(file)?;
        let mut tx = self.pool.begin().await?;

        for (index, row) in rows.iter().enumerate() {
            upsert_result(&mut tx, row)
                .await
                .with_context(|| format!("failed to store results row {} (URN {})", index + 1, row.urn))?;
        }

        tx.commit().await?;
        info!(rows = rows.len(), path = %csv_path.display(), "imported primary results");
        Ok(rows.len())
    }

    /// Imports the whole file or nothing. Rows for schools that are not yet
    /// known are skipped, since inspections carry no school details.
    pub async fn import_inspections_csv(&self, csv_path: &Path) -> anyhow::Result<InspectionImport> {
        let file = std::fs::File::open(csv_path)
            .with_context(|| format!("failed to open {}", csv_path.display()))?;
        let rows = read_inspection_rows(file)?;
        let mut tx = self.pool.begin().await?;

        let urns: Vec<i64> = rows.iter().map(|row| row.urn).collect();
        let known: HashSet<i64> = sqlx::query("SELECT urn FROM schoolchecker.schools WHERE urn = ANY($1)")
            .bind(urns.as_slice())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.get::<i64, _>("urn"))
            .collect();

        let (accepted, unknown) = split_by_known_school(&rows, &known);
        for (row_number, urn) in unknown.iter() {
            warn!(row = *row_number, urn = *urn, "skipping inspection for unknown school");
        }

        let mut summary = InspectionImport {
            unknown_schools: unknown.len(),
            ..InspectionImport::default()
        };
        for (row_number, row) in accepted {
            let inserted = insert_inspection(&mut tx, row)
                .await
                .with_context(|| format!("failed to store inspection row {row_number} (URN {})", row.urn))?;
            if inserted {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        tx.commit().await?;
        info!(
            rows = rows.len(),
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            unknown_schools = summary.unknown_schools,
            path = %csv_path.display(),
            "imported inspections"
        );
        Ok(summary)
    }

    pub async fn school(&self, urn: i64) -> anyhow::Result<Option<SchoolSummary>> {
        let row = sqlx::query(
            "SELECT urn, name, la_code, la_name FROM schoolchecker.schools WHERE urn = $1",
        )
        .bind(urn)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SchoolSummary {
            urn: row.get("urn"),
            name: row.get("name"),
            la_code: row.get("la_code"),
            la_name: row.get("la_name"),
        }))
    }

    pub async fn latest_inspection(&self, urn: i64) -> anyhow::Result<Option<InspectionRecord>> {
        let query = format!(
            "SELECT {INSPECTION_COLUMNS} FROM schoolchecker.inspections i \
             WHERE i.urn = $1 \
             ORDER BY i.inspection_date DESC NULLS LAST \
             LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(urn)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(inspection_from_row))
    }

    /// Latest inspection per school in a local authority, keyed by URN.
    pub async fn latest_inspections_for_la(
        &self,
        la_code: i32,
    ) -> anyhow::Result<HashMap<i64, InspectionRecord>> {
        let query = format!(
            "SELECT DISTINCT ON (i.urn) {INSPECTION_COLUMNS} \
             FROM schoolchecker.inspections i \
             JOIN schoolchecker.schools s ON s.urn = i.urn \
             WHERE s.la_code = $1 \
             ORDER BY i.urn, i.inspection_date DESC NULLS LAST"
        );
        let rows = sqlx::query(&query)
            .bind(la_code)
            .fetch_all(&self.pool)
            .await?;

        debug!(la_code, inspections = rows.len(), "fetched latest inspections");
        Ok(rows
            .iter()
            .map(inspection_from_row)
            .map(|inspection| (inspection.urn, inspection))
            .collect())
    }

    pub async fn fetch_cohort(
        &self,
        la_code: i32,
        data_year: i32,
    ) -> anyhow::Result<Vec<SchoolResultRow>> {
        let query = format!(
            "SELECT {RESULT_COLUMNS} \
             FROM schoolchecker.primary_results r \
             JOIN schoolchecker.schools s ON s.urn = r.urn \
             WHERE s.la_code = $1 AND r.data_year = $2"
        );
        let rows = sqlx::query(&query)
            .bind(la_code)
            .bind(data_year)
            .fetch_all(&self.pool)
            .await?;

        debug!(la_code, data_year, schools = rows.len(), "fetched cohort");
        Ok(rows.iter().map(result_from_row).collect())
    }

    pub async fn fetch_national(&self, data_year: i32) -> anyhow::Result<Vec<SchoolResultRow>> {
        let query = format!(
            "SELECT {RESULT_COLUMNS} \
             FROM schoolchecker.primary_results r \
             WHERE r.data_year = $1 AND (r.rwm_exp IS NOT NULL OR r.gps_exp IS NOT NULL)"
        );
        let rows = sqlx::query(&query)
            .bind(data_year)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(result_from_row).collect())
    }

    pub async fn school_names(&self, urns: &[i64]) -> anyhow::Result<HashMap<i64, String>> {
        let rows = sqlx::query("SELECT urn, name FROM schoolchecker.schools WHERE urn = ANY($1)")
            .bind(urns)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("urn"), row.get::<String, _>("name")))
            .collect())
    }

    pub async fn upsert_rankings(&self, rankings: &[SchoolRanking]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;

        for ranking in rankings {
            let rank = i32::try_from(ranking.rank).context("rank overflows integer column")?;
            let total = i32::try_from(ranking.total_schools)
                .context("cohort size overflows integer column")?;

            sqlx::query(
                r#"
                INSERT INTO schoolchecker.school_rankings
                (urn, data_year, rwm_rank, total_schools, percentile,
                 rwm_expected_percentage, rwm_higher_percentage,
                 gps_expected_percentage, gps_higher_percentage)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (urn, data_year) DO UPDATE
                SET rwm_rank = EXCLUDED.rwm_rank,
                    total_schools = EXCLUDED.total_schools,
                    percentile = EXCLUDED.percentile,
                    rwm_expected_percentage = EXCLUDED.rwm_expected_percentage,
                    rwm_higher_percentage = EXCLUDED.rwm_higher_percentage,
                    gps_expected_percentage = EXCLUDED.gps_expected_percentage,
                    gps_higher_percentage = EXCLUDED.gps_higher_percentage
                "#,
            )
            .bind(ranking.urn)
            .bind(ranking.data_year)
            .bind(rank)
            .bind(total)
            .bind(ranking.percentile)
            .bind(ranking.expected_percentage)
            .bind(ranking.higher_percentage)
            .bind(ranking.gps_expected_percentage)
            .bind(ranking.gps_higher_percentage)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rankings.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_result_cells_become_none() {
        let data = "urn,name,la_code,la_name,data_year,rwm_exp,rwm_high,gps_exp,gps_high\n\
                    107500,Ashfield Primary School,383,Leeds,2024,84,21,,\n";
        let rows = read_result_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rwm_exp, Some(84.0));
        assert_eq!(rows[0].gps_exp, None);
        assert_eq!(rows[0].gps_high, None);
    }

    #[test]
    fn malformed_result_row_reports_position() {
        let data = "urn,name,la_code,la_name,data_year,rwm_exp,rwm_high,gps_exp,gps_high\n\
                    107500,Ashfield,383,Leeds,2024,84,21,88,40\n\
                    oops,Beckett,383,Leeds,2024,84,21,88,40\n";
        let err = read_result_rows(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn inspection_rows_parse_dates_and_optional_grades() {
        let data = "urn,inspection_date,outcome,quality_of_education,effectiveness_of_leadership,behaviour_and_attitudes,personal_development,source_key\n\
                    107501,2025-01-22,,2,1,1,2,\n";
        let rows = read_inspection_rows(data.as_bytes()).unwrap();
        assert_eq!(rows[0].inspection_date, NaiveDate::from_ymd_opt(2025, 1, 22));
        assert_eq!(rows[0].outcome, None);
        assert_eq!(rows[0].quality_of_education, Some(2));
        assert_eq!(rows[0].resolved_source_key(), "107501-2025-01-22");
    }

    #[test]
    fn explicit_source_key_wins() {
        let row = InspectionCsvRow {
            urn: 1,
            inspection_date: None,
            outcome: Some(2),
            quality_of_education: None,
            effectiveness_of_leadership: None,
            behaviour_and_attitudes: None,
            personal_development: None,
            source_key: Some(" ofsted-42 ".to_string()),
        };
        assert_eq!(row.resolved_source_key(), "ofsted-42");

        let undated = InspectionCsvRow {
            source_key: None,
            ..row
        };
        assert_eq!(undated.resolved_source_key(), "1-undated");
    }

    #[test]
    fn inspections_for_unknown_schools_are_set_aside_with_row_numbers() {
        let data = "urn,inspection_date,outcome,quality_of_education,effectiveness_of_leadership,behaviour_and_attitudes,personal_development,source_key\n\
                    107503,2024-05-01,2,,,,,\n\
                    999999,2024-06-12,3,,,,,\n\
                    107500,2023-03-14,1,,,,,\n";
        let rows = read_inspection_rows(data.as_bytes()).unwrap();
        let known: HashSet<i64> = [107_500, 107_503].into_iter().collect();

        let (accepted, unknown) = split_by_known_school(&rows, &known);

        let accepted_rows: Vec<(usize, i64)> =
            accepted.iter().map(|(number, row)| (*number, row.urn)).collect();
        assert_eq!(accepted_rows, vec![(1, 107_503), (3, 107_500)]);
        assert_eq!(unknown, vec![(2, 999_999)]);
    }

    #[test]
    fn schools_table_only_declares_stored_columns() {
        let schema = include_str!("../migrations/0001_schoolchecker_schema.sql");
        let schools = schema
            .split("CREATE TABLE")
            .find(|table| table.contains("schoolchecker.schools ("))
            .expect("schools table");
        for column in ["urn", "name", "la_code", "la_name"] {
            assert!(schools.contains(column), "missing {column}");
        }
        assert!(!schools.contains("phase"));
    }
}
