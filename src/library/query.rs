//! Expiration criteria and the typed filter list built from them.
//!
//! A query is a conjunction of `{field, operator, value}` filters validated
//! against the fields each category actually has. The same filter list renders
//! to parameterized SQL for direct store access, to a JSON-RPC filter object,
//! and evaluates in memory for re-checking RPC results.

#![allow(missing_docs)]

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::errors::{MfcError, Result};
use crate::library::{MediaCategory, Rating};

/// Margin applied to rating bounds so exact boundary values classify correctly.
pub const RATING_EPSILON: f64 = 0.000_001;
/// Highest score on the library's rating scale.
pub const RATING_SCALE_MAX: f64 = 10.0;
/// Timestamp format used by the metadata store.
pub const STORE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ──────────────────── criteria ────────────────────

/// Read-only per-pass snapshot of what makes a video expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationCriteria {
    /// Always true: only watched videos are ever candidates.
    pub require_played: bool,
    pub min_days_since_last_played: Option<f64>,
    pub min_days_since_added: Option<f64>,
    pub max_rating: Option<f64>,
    pub ignore_unrated: bool,
    pub require_not_in_progress: bool,
    pub excluded_path_prefixes: Vec<String>,
}

impl Default for ExpirationCriteria {
    fn default() -> Self {
        Self {
            require_played: true,
            min_days_since_last_played: None,
            min_days_since_added: None,
            max_rating: None,
            ignore_unrated: true,
            require_not_in_progress: false,
            excluded_path_prefixes: Vec::new(),
        }
    }
}

impl ExpirationCriteria {
    /// Rating filters for `max_rating`, empty when rating is not a criterion.
    #[must_use]
    pub fn rating_filters(&self) -> Vec<Filter> {
        let Some(max) = self.max_rating else {
            return Vec::new();
        };
        let include_unset = !self.ignore_unrated;
        let low = if self.ignore_unrated {
            RATING_EPSILON
        } else {
            0.0
        };
        let mut filters = vec![Filter {
            field: Field::Rating,
            operator: Operator::Between,
            value: FilterValue::Range {
                low,
                high: max - RATING_EPSILON,
            },
            include_unset,
        }];
        if max < RATING_SCALE_MAX {
            filters.push(Filter {
                field: Field::Rating,
                operator: Operator::IsNot,
                value: FilterValue::Number(RATING_SCALE_MAX),
                include_unset,
            });
        }
        filters
    }

    /// Whether a rating counts as "low" under these criteria.
    #[must_use]
    pub fn rating_matches(&self, rating: Rating) -> bool {
        self.rating_filters()
            .iter()
            .all(|filter| filter.matches_rating(rating))
    }
}

// ──────────────────── filters ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    PlayCount,
    LastPlayed,
    DateAdded,
    Rating,
    InProgress,
    Path,
}

impl Field {
    /// Field name understood by the host's filter syntax.
    #[must_use]
    pub const fn rpc_name(self) -> &'static str {
        match self {
            Self::PlayCount => "playcount",
            Self::LastPlayed => "lastplayed",
            Self::DateAdded => "dateadded",
            Self::Rating => "rating",
            Self::InProgress => "inprogress",
            Self::Path => "path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    GreaterThan,
    OlderThan,
    Between,
    IsNot,
    IsFalse,
    DoesNotStartWith,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterValue {
    Integer(i64),
    /// Age threshold: `days` for the host syntax, `cutoff` for exact comparison.
    Age { days: f64, cutoff: NaiveDateTime },
    Range { low: f64, high: f64 },
    Number(f64),
    Text(String),
    Empty,
}

/// One `{field, operator, value}` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: Field,
    pub operator: Operator,
    pub value: FilterValue,
    /// Whether a missing value (e.g. unrated) satisfies the condition.
    pub include_unset: bool,
}

impl Filter {
    fn validate(&self, category: MediaCategory) -> Result<()> {
        if !allowed_fields(category).contains(&self.field) {
            return Err(MfcError::MetadataQuery {
                context: "query",
                details: format!(
                    "field {} is not available for {category}",
                    self.field.rpc_name()
                ),
            });
        }
        let shape_ok = matches!(
            (self.field, self.operator, &self.value),
            (Field::PlayCount, Operator::GreaterThan, FilterValue::Integer(_))
                | (
                    Field::LastPlayed | Field::DateAdded,
                    Operator::OlderThan,
                    FilterValue::Age { .. }
                )
                | (Field::Rating, Operator::Between, FilterValue::Range { .. })
                | (Field::Rating, Operator::IsNot, FilterValue::Number(_))
                | (Field::InProgress, Operator::IsFalse, FilterValue::Empty)
                | (Field::Path, Operator::DoesNotStartWith, FilterValue::Text(_))
        );
        if !shape_ok {
            return Err(MfcError::MetadataQuery {
                context: "query",
                details: format!(
                    "malformed filter {:?} {:?} {:?}",
                    self.field, self.operator, self.value
                ),
            });
        }
        Ok(())
    }

    fn matches_rating(&self, rating: Rating) -> bool {
        let Rating::Rated(value) = rating else {
            return self.include_unset;
        };
        match (&self.operator, &self.value) {
            (Operator::Between, FilterValue::Range { low, high }) => {
                *low <= value && value <= *high
            }
            (Operator::IsNot, FilterValue::Number(n)) => (value - n).abs() > f64::EPSILON,
            _ => true,
        }
    }
}

/// Fields each category's metadata carries.
#[must_use]
pub const fn allowed_fields(category: MediaCategory) -> &'static [Field] {
    match category {
        MediaCategory::Movie | MediaCategory::Episode => &[
            Field::PlayCount,
            Field::LastPlayed,
            Field::DateAdded,
            Field::Rating,
            Field::InProgress,
            Field::Path,
        ],
        MediaCategory::MusicVideo => &[
            Field::PlayCount,
            Field::LastPlayed,
            Field::DateAdded,
            Field::InProgress,
            Field::Path,
        ],
    }
}

// ──────────────────── query ────────────────────

/// Facts about one library row, used for in-memory evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RowFacts<'a> {
    pub play_count: i64,
    pub last_played: Option<NaiveDateTime>,
    pub date_added: Option<NaiveDateTime>,
    pub rating: Rating,
    pub in_progress: bool,
    pub directory: &'a str,
}

/// A validated conjunction of filters for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpirationQuery {
    pub category: MediaCategory,
    pub filters: Vec<Filter>,
}

/// SQL `WHERE` clause with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWhere {
    pub clause: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl ExpirationQuery {
    /// Build and validate the filter list relative to `now` (local time).
    pub fn build(
        category: MediaCategory,
        criteria: &ExpirationCriteria,
        now: NaiveDateTime,
    ) -> Result<Self> {
        // Watched-only is a hard baseline regardless of the criteria flag.
        let mut filters = vec![Filter {
            field: Field::PlayCount,
            operator: Operator::GreaterThan,
            value: FilterValue::Integer(0),
            include_unset: false,
        }];

        if let Some(days) = criteria.min_days_since_last_played {
            filters.push(age_filter(Field::LastPlayed, days, now)?);
        }
        if let Some(days) = criteria.min_days_since_added {
            filters.push(age_filter(Field::DateAdded, days, now)?);
        }
        // Categories without a rating are not narrowed by the rating criterion.
        if allowed_fields(category).contains(&Field::Rating) {
            filters.extend(criteria.rating_filters());
        }
        if criteria.require_not_in_progress {
            filters.push(Filter {
                field: Field::InProgress,
                operator: Operator::IsFalse,
                value: FilterValue::Empty,
                include_unset: true,
            });
        }
        for prefix in &criteria.excluded_path_prefixes {
            filters.push(Filter {
                field: Field::Path,
                operator: Operator::DoesNotStartWith,
                value: FilterValue::Text(with_trailing_separator(prefix)),
                include_unset: true,
            });
        }

        for filter in &filters {
            filter.validate(category)?;
        }
        Ok(Self { category, filters })
    }

    /// Render as a SQL condition over the store's `files`/`path`/`bookmark`
    /// tables, with `rating_column` naming the category's rating cell.
    pub fn to_sql(&self, rating_column: Option<&str>) -> Result<SqlWhere> {
        let mut clauses = Vec::with_capacity(self.filters.len());
        let mut params = Vec::new();

        for filter in &self.filters {
            let clause = match (&filter.field, &filter.value) {
                (Field::PlayCount, FilterValue::Integer(n)) => {
                    params.push(SqlParam::Integer(*n));
                    "files.playCount > ?".to_string()
                }
                (Field::LastPlayed, FilterValue::Age { cutoff, .. }) => {
                    params.push(SqlParam::Text(cutoff.format(STORE_TIME_FORMAT).to_string()));
                    "files.lastPlayed < ?".to_string()
                }
                (Field::DateAdded, FilterValue::Age { cutoff, .. }) => {
                    params.push(SqlParam::Text(cutoff.format(STORE_TIME_FORMAT).to_string()));
                    "files.dateAdded < ?".to_string()
                }
                (Field::Rating, value) => {
                    let column = rating_column.ok_or_else(|| MfcError::MetadataQuery {
                        context: "query",
                        details: format!("no rating column for {}", self.category),
                    })?;
                    let condition = match value {
                        FilterValue::Range { low, high } => {
                            params.push(SqlParam::Real(*low));
                            params.push(SqlParam::Real(*high));
                            format!("CAST({column} AS REAL) BETWEEN ? AND ?")
                        }
                        FilterValue::Number(n) => {
                            params.push(SqlParam::Real(*n));
                            format!("CAST({column} AS REAL) <> ?")
                        }
                        _ => unreachable_shape(filter)?,
                    };
                    // Unrated is NULL or blank text, never a numeric zero.
                    if filter.include_unset {
                        format!("({column} IS NULL OR TRIM({column}) = '' OR {condition})")
                    } else {
                        format!("({column} IS NOT NULL AND TRIM({column}) <> '' AND {condition})")
                    }
                }
                (Field::InProgress, FilterValue::Empty) => "NOT EXISTS (SELECT 1 FROM bookmark \
                     WHERE bookmark.idFile = files.idFile AND bookmark.type = 1)"
                    .to_string(),
                (Field::Path, FilterValue::Text(prefix)) => {
                    params.push(SqlParam::Text(format!("{}%", escape_like(prefix))));
                    "path.strPath NOT LIKE ? ESCAPE '\\'".to_string()
                }
                _ => unreachable_shape(filter)?,
            };
            clauses.push(clause);
        }

        Ok(SqlWhere {
            clause: clauses.join(" AND "),
            params,
        })
    }

    /// Render as a host JSON-RPC filter object.
    ///
    /// Path exclusions are left out: the host only offers substring matching,
    /// so prefix exclusion is applied by [`Self::matches`] on the returned rows.
    #[must_use]
    pub fn to_rpc_filter(&self) -> Value {
        let rules: Vec<Value> = self
            .filters
            .iter()
            .filter_map(|filter| {
                let field = filter.field.rpc_name();
                let rule = match &filter.value {
                    FilterValue::Integer(n) => {
                        json!({"field": field, "operator": "greaterthan", "value": n.to_string()})
                    }
                    FilterValue::Age { days, .. } => {
                        // Whole days only; rounding up never widens the match.
                        #[allow(clippy::cast_possible_truncation)]
                        let whole = days.ceil() as i64;
                        json!({"field": field, "operator": "notinthelast", "value": whole.to_string()})
                    }
                    FilterValue::Range { low, high } => json!({
                        "field": field,
                        "operator": "between",
                        "value": [format!("{low:.6}"), format!("{high:.6}")],
                    }),
                    FilterValue::Number(n) => {
                        json!({"field": field, "operator": "isnot", "value": format!("{n:.6}")})
                    }
                    FilterValue::Empty => json!({"field": field, "operator": "false", "value": ""}),
                    FilterValue::Text(_) => return None,
                };
                Some(rule)
            })
            .collect();
        json!({ "and": rules })
    }

    /// Exact in-memory evaluation of every filter.
    #[must_use]
    pub fn matches(&self, row: &RowFacts<'_>) -> bool {
        self.filters.iter().all(|filter| match (&filter.field, &filter.value) {
            (Field::PlayCount, FilterValue::Integer(n)) => row.play_count > *n,
            (Field::LastPlayed, FilterValue::Age { cutoff, .. }) => {
                row.last_played.is_some_and(|t| t < *cutoff)
            }
            (Field::DateAdded, FilterValue::Age { cutoff, .. }) => {
                row.date_added.is_some_and(|t| t < *cutoff)
            }
            (Field::Rating, _) => filter.matches_rating(row.rating),
            (Field::InProgress, _) => !row.in_progress,
            (Field::Path, FilterValue::Text(prefix)) => !row.directory.starts_with(prefix.as_str()),
            _ => false,
        })
    }
}

fn age_filter(field: Field, days: f64, now: NaiveDateTime) -> Result<Filter> {
    if !(days.is_finite() && days >= 0.0) {
        return Err(MfcError::MetadataQuery {
            context: "query",
            details: format!("invalid age threshold {days} days for {}", field.rpc_name()),
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let seconds = (days * 86_400.0).round() as i64;
    let cutoff = now - Duration::seconds(seconds);
    Ok(Filter {
        field,
        operator: Operator::OlderThan,
        value: FilterValue::Age { days, cutoff },
        include_unset: false,
    })
}

fn unreachable_shape<T>(filter: &Filter) -> Result<T> {
    Err(MfcError::MetadataQuery {
        context: "query",
        details: format!("cannot render filter {filter:?}"),
    })
}

/// Directory prefixes in the store always end with a separator, so
/// `/srv/hold` must not exclude `/srv/holdings/`.
fn with_trailing_separator(prefix: &str) -> String {
    if prefix.ends_with('/') || prefix.ends_with('\\') {
        prefix.to_string()
    } else if prefix.contains('\\') && !prefix.contains('/') {
        format!("{prefix}\\")
    } else {
        format!("{prefix}/")
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse a store timestamp; blank or malformed values are absent.
#[must_use]
pub fn parse_store_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, STORE_TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-03-01 12:00:00", STORE_TIME_FORMAT).unwrap()
    }

    fn low_rated(max: f64, ignore_unrated: bool) -> ExpirationCriteria {
        ExpirationCriteria {
            max_rating: Some(max),
            ignore_unrated,
            ..ExpirationCriteria::default()
        }
    }

    #[test]
    fn perfect_score_never_low_rated() {
        for ignore in [true, false] {
            assert!(!low_rated(8.0, ignore).rating_matches(Rating::Rated(10.0)));
            assert!(!low_rated(10.0, ignore).rating_matches(Rating::Rated(10.0)));
        }
    }

    #[test]
    fn zero_rating_matches_only_when_unrated_not_ignored() {
        assert!(low_rated(8.0, false).rating_matches(Rating::Rated(0.0)));
        assert!(!low_rated(8.0, true).rating_matches(Rating::Rated(0.0)));
    }

    #[test]
    fn unrated_follows_ignore_flag() {
        assert!(low_rated(8.0, false).rating_matches(Rating::Unrated));
        assert!(!low_rated(8.0, true).rating_matches(Rating::Unrated));
    }

    #[test]
    fn exact_maximum_is_not_below_maximum() {
        assert!(!low_rated(8.0, true).rating_matches(Rating::Rated(8.0)));
        assert!(low_rated(8.0, true).rating_matches(Rating::Rated(7.99)));
    }

    #[test]
    fn no_rating_criterion_matches_everything() {
        let criteria = ExpirationCriteria::default();
        assert!(criteria.rating_matches(Rating::Rated(10.0)));
        assert!(criteria.rating_matches(Rating::Unrated));
    }

    #[test]
    fn baseline_filter_is_always_played() {
        let q = ExpirationQuery::build(MediaCategory::Movie, &ExpirationCriteria::default(), now())
            .unwrap();
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.filters[0].field, Field::PlayCount);
        let sql = q.to_sql(Some("movie.c05")).unwrap();
        assert_eq!(sql.clause, "files.playCount > ?");
        assert_eq!(sql.params, vec![SqlParam::Integer(0)]);
    }

    #[test]
    fn music_videos_ignore_rating_criterion() {
        let q = ExpirationQuery::build(MediaCategory::MusicVideo, &low_rated(5.0, false), now())
            .unwrap();
        assert!(q.filters.iter().all(|f| f.field != Field::Rating));
        let sql = q.to_sql(None).unwrap();
        assert_eq!(sql.clause, "files.playCount > ?");

        let movies = ExpirationQuery::build(MediaCategory::Movie, &low_rated(5.0, false), now())
            .unwrap();
        assert!(movies.filters.iter().any(|f| f.field == Field::Rating));
    }

    #[test]
    fn rating_filter_on_music_videos_fails_validation() {
        let filter = low_rated(5.0, true).rating_filters().remove(0);
        let err = filter.validate(MediaCategory::MusicVideo).unwrap_err();
        assert_eq!(err.code(), "MFC-2102");
        assert!(err.to_string().contains("rating"));
        assert!(filter.validate(MediaCategory::Episode).is_ok());
    }

    #[test]
    fn full_sql_rendering_is_parameterized() {
        let criteria = ExpirationCriteria {
            min_days_since_last_played: Some(30.0),
            max_rating: Some(8.0),
            ignore_unrated: false,
            require_not_in_progress: true,
            excluded_path_prefixes: vec!["/srv/50%_hold".to_string()],
            ..ExpirationCriteria::default()
        };
        let q = ExpirationQuery::build(MediaCategory::Episode, &criteria, now()).unwrap();
        let sql = q.to_sql(Some("episode.c03")).unwrap();
        assert!(sql.clause.contains("files.lastPlayed < ?"));
        assert!(sql.clause.contains("episode.c03 IS NULL OR TRIM(episode.c03) = ''"));
        assert!(sql.clause.contains("CAST(episode.c03 AS REAL) <> ?"));
        assert!(sql.clause.contains("NOT EXISTS (SELECT 1 FROM bookmark"));
        assert!(sql.params.contains(&SqlParam::Text("2026-01-30 12:00:00".to_string())));
        assert!(sql.params.contains(&SqlParam::Text("/srv/50\\%\\_hold/%".to_string())));
        assert_eq!(sql.clause.matches('?').count(), sql.params.len());
    }

    #[test]
    fn rpc_filter_shape() {
        let criteria = ExpirationCriteria {
            min_days_since_last_played: Some(2.5),
            max_rating: Some(6.0),
            ..ExpirationCriteria::default()
        };
        let q = ExpirationQuery::build(MediaCategory::Movie, &criteria, now()).unwrap();
        let filter = q.to_rpc_filter();
        let rules = filter["and"].as_array().unwrap();
        assert_eq!(rules[0]["field"], "playcount");
        assert_eq!(rules[1]["operator"], "notinthelast");
        assert_eq!(rules[1]["value"], "3");
        assert_eq!(rules[2]["operator"], "between");
        assert_eq!(rules[2]["value"][0], "0.000001");
        assert_eq!(rules[3]["operator"], "isnot");
    }

    #[test]
    fn rpc_filter_leaves_path_exclusion_to_row_check() {
        let criteria = ExpirationCriteria {
            excluded_path_prefixes: vec!["/srv/hold".to_string()],
            ..ExpirationCriteria::default()
        };
        let q = ExpirationQuery::build(MediaCategory::Movie, &criteria, now()).unwrap();
        let filter = q.to_rpc_filter();
        let rules = filter["and"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.iter().all(|r| r["field"] != "path"));

        let row = RowFacts {
            play_count: 1,
            last_played: None,
            date_added: None,
            rating: Rating::Unrated,
            in_progress: false,
            directory: "/media/srv/hold/X/",
        };
        assert!(q.matches(&row));
        assert!(!q.matches(&RowFacts { directory: "/srv/hold/X/", ..row }));
    }

    #[test]
    fn in_memory_evaluation() {
        let criteria = ExpirationCriteria {
            min_days_since_last_played: Some(30.0),
            excluded_path_prefixes: vec!["/srv/hold".to_string()],
            ..ExpirationCriteria::default()
        };
        let q = ExpirationQuery::build(MediaCategory::Movie, &criteria, now()).unwrap();
        let old = now() - Duration::days(40);
        let row = RowFacts {
            play_count: 1,
            last_played: Some(old),
            date_added: None,
            rating: Rating::Unrated,
            in_progress: false,
            directory: "/media/movies/X/",
        };
        assert!(q.matches(&row));
        assert!(!q.matches(&RowFacts { play_count: 0, ..row.clone() }));
        assert!(!q.matches(&RowFacts {
            last_played: Some(now() - Duration::days(10)),
            ..row.clone()
        }));
        assert!(!q.matches(&RowFacts { last_played: None, ..row.clone() }));
        assert!(!q.matches(&RowFacts { directory: "/srv/hold/X/", ..row.clone() }));
        assert!(q.matches(&RowFacts { directory: "/srv/holdings/X/", ..row }));
    }

    #[test]
    fn negative_age_is_rejected() {
        let criteria = ExpirationCriteria {
            min_days_since_last_played: Some(-1.0),
            ..ExpirationCriteria::default()
        };
        assert!(ExpirationQuery::build(MediaCategory::Movie, &criteria, now()).is_err());
    }

    #[test]
    fn parses_store_times() {
        assert_eq!(parse_store_time(""), None);
        assert_eq!(parse_store_time("garbage"), None);
        assert_eq!(parse_store_time("2026-03-01 12:00:00"), Some(now()));
    }

    proptest! {
        #[test]
        fn perfect_score_is_never_low(max in 0.5f64..=10.0, ignore in any::<bool>()) {
            prop_assert!(!low_rated(max, ignore).rating_matches(Rating::Rated(RATING_SCALE_MAX)));
        }

        #[test]
        fn matched_ratings_are_strictly_below_max(
            max in 0.5f64..=10.0,
            value in 0.0f64..=10.0,
            ignore in any::<bool>(),
        ) {
            if low_rated(max, ignore).rating_matches(Rating::Rated(value)) {
                prop_assert!(value < max);
            }
        }

        #[test]
        fn clear_interior_ratings_match(max in 1.0f64..=10.0, frac in 0.01f64..0.99) {
            let value = max * frac;
            prop_assert!(low_rated(max, true).rating_matches(Rating::Rated(value)));
        }
    }
}
