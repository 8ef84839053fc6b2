//! Track suggestion parameters
//!
//! Parameters are merged per field with priority: explicit call-time values,
//! then the last persisted user parameters, then built-in defaults.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_GENRES: [&str; 5] = ["Rock", "Pop", "Hip Hop", "R&b", "Metal"];
pub const DEFAULT_START_YEAR: i32 = 1950;
pub const DEFAULT_POPULARITY: u32 = 50;
pub const DEFAULT_MAX_SONG_LENGTH: u32 = 3;
pub const DEFAULT_SONGS_BETWEEN_REPEATS: u32 = 5;
pub const DEFAULT_MAX_OFFSET: u32 = 10;

const MIN_YEAR: i64 = 1900;

/// Partial parameter set; absent fields fall through to the next tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_range: Option<(i32, i32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_explicit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_song_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub songs_between_repeats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_offset: Option<u32>,
}

impl SuggestionParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fully resolved parameters sent to the suggestion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSuggestionParams {
    pub genres: Vec<String>,
    pub year_range: (i32, i32),
    pub popularity: u32,
    pub allow_explicit: bool,
    pub max_song_length: u32,
    pub songs_between_repeats: u32,
    pub max_offset: u32,
}

impl MergedSuggestionParams {
    pub fn defaults(current_year: i32) -> Self {
        Self {
            genres: DEFAULT_GENRES.iter().map(|g| g.to_string()).collect(),
            year_range: (DEFAULT_START_YEAR, current_year),
            popularity: DEFAULT_POPULARITY,
            allow_explicit: false,
            max_song_length: DEFAULT_MAX_SONG_LENGTH,
            songs_between_repeats: DEFAULT_SONGS_BETWEEN_REPEATS,
            max_offset: DEFAULT_MAX_OFFSET,
        }
    }

    /// Merge explicit > persisted > defaults, field by field
    pub fn merge(
        explicit: Option<&SuggestionParams>,
        persisted: Option<&SuggestionParams>,
        current_year: i32,
    ) -> Self {
        let defaults = Self::defaults(current_year);

        Self {
            genres: pick(explicit, persisted, |p| p.genres.clone()).unwrap_or(defaults.genres),
            year_range: pick(explicit, persisted, |p| p.year_range).unwrap_or(defaults.year_range),
            popularity: pick(explicit, persisted, |p| p.popularity).unwrap_or(defaults.popularity),
            allow_explicit: pick(explicit, persisted, |p| p.allow_explicit)
                .unwrap_or(defaults.allow_explicit),
            max_song_length: pick(explicit, persisted, |p| p.max_song_length)
                .unwrap_or(defaults.max_song_length),
            songs_between_repeats: pick(explicit, persisted, |p| p.songs_between_repeats)
                .unwrap_or(defaults.songs_between_repeats),
            max_offset: pick(explicit, persisted, |p| p.max_offset).unwrap_or(defaults.max_offset),
        }
    }
}

fn pick<T>(
    explicit: Option<&SuggestionParams>,
    persisted: Option<&SuggestionParams>,
    field: impl Fn(&SuggestionParams) -> Option<T>,
) -> Option<T> {
    explicit.and_then(&field).or_else(|| persisted.and_then(&field))
}

pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// One rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Validate a raw request body into parameters
///
/// Every field is optional, but a present field must be valid. Genres are
/// trimmed and lowercased. All errors are collected, not just the first.
pub fn validate_params(body: &Value, current_year: i32) -> Result<SuggestionParams, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut params = SuggestionParams::default();

    let obj = match body {
        Value::Object(map) => map,
        Value::Null => return Ok(params),
        _ => {
            return Err(vec![FieldError::new("", "Request body must be a JSON object")]);
        }
    };

    if let Some(value) = obj.get("genres").filter(|v| !v.is_null()) {
        match value.as_array() {
            None => errors.push(FieldError::new("genres", "Genres must be an array of strings")),
            Some(items) if items.is_empty() => {
                errors.push(FieldError::new("genres", "At least one genre is required"))
            }
            Some(items) => {
                let mut genres = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str().map(str::trim) {
                        Some(g) if !g.is_empty() => genres.push(g.to_lowercase()),
                        Some(_) => errors.push(FieldError::new(
                            &format!("genres.{}", i),
                            "Genre names cannot be empty",
                        )),
                        None => errors.push(FieldError::new(
                            &format!("genres.{}", i),
                            "Genre names must be strings",
                        )),
                    }
                }
                params.genres = Some(genres);
            }
        }
    }

    if let Some(value) = obj.get("yearRange").filter(|v| !v.is_null()) {
        params.year_range = validate_year_range(value, current_year, &mut errors);
    }

    if let Some(value) = obj.get("popularity").filter(|v| !v.is_null()) {
        params.popularity = validate_int(
            value,
            "popularity",
            (0, "Popularity must be at least 0"),
            (100, "Popularity cannot exceed 100"),
            "Popularity must be an integer",
            &mut errors,
        );
    }

    match obj.get("allowExplicit") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(b)) => params.allow_explicit = Some(*b),
        Some(_) => errors.push(FieldError::new("allowExplicit", "allowExplicit must be a boolean")),
    }

    if let Some(value) = obj.get("maxSongLength").filter(|v| !v.is_null()) {
        params.max_song_length = validate_int(
            value,
            "maxSongLength",
            (3, "Maximum song length must be at least 3 minutes"),
            (20, "Maximum song length cannot exceed 20 minutes"),
            "Song length must be an integer",
            &mut errors,
        );
    }

    if let Some(value) = obj.get("songsBetweenRepeats").filter(|v| !v.is_null()) {
        params.songs_between_repeats = validate_int(
            value,
            "songsBetweenRepeats",
            (2, "Songs between repeats must be at least 2"),
            (50, "Songs between repeats cannot exceed 50"),
            "Songs between repeats must be an integer",
            &mut errors,
        );
    }

    if let Some(value) = obj.get("maxOffset").filter(|v| !v.is_null()) {
        params.max_offset = validate_int(
            value,
            "maxOffset",
            (1, "Max offset must be at least 1"),
            (100, "Max offset cannot exceed 100"),
            "Max offset must be an integer",
            &mut errors,
        );
    }

    if errors.is_empty() {
        Ok(params)
    } else {
        Err(errors)
    }
}

fn validate_year_range(value: &Value, current_year: i32, errors: &mut Vec<FieldError>) -> Option<(i32, i32)> {
    let Some([start, end]) = value.as_array().map(Vec::as_slice).and_then(|s| <&[Value; 2]>::try_from(s).ok()) else {
        errors.push(FieldError::new("yearRange", "Year range must be [start, end]"));
        return None;
    };

    let start = match start.as_i64() {
        None => {
            errors.push(FieldError::new("yearRange.0", "Start year must be an integer"));
            None
        }
        Some(y) if y < MIN_YEAR => {
            errors.push(FieldError::new("yearRange.0", "Start year must be at least 1900"));
            None
        }
        Some(y) => Some(y),
    };
    let end = match end.as_i64() {
        None => {
            errors.push(FieldError::new("yearRange.1", "End year must be an integer"));
            None
        }
        Some(y) if y > i64::from(current_year) => {
            errors.push(FieldError::new("yearRange.1", "End year cannot be in the future"));
            None
        }
        Some(y) => Some(y),
    };

    let (start, end) = (start?, end?);
    if start > end {
        errors.push(FieldError::new(
            "yearRange",
            "Start year must be less than or equal to end year",
        ));
        return None;
    }
    Some((start as i32, end as i32))
}

fn validate_int(
    value: &Value,
    field: &str,
    (min, min_message): (i64, &str),
    (max, max_message): (i64, &str),
    type_message: &str,
    errors: &mut Vec<FieldError>,
) -> Option<u32> {
    match value.as_i64() {
        None => {
            errors.push(FieldError::new(field, type_message));
            None
        }
        Some(n) if n < min => {
            errors.push(FieldError::new(field, min_message));
            None
        }
        Some(n) if n > max => {
            errors.push(FieldError::new(field, max_message));
            None
        }
        Some(n) => Some(n as u32),
    }
}
