//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). Structured
//! values are stored as JSON text.

use crate::error::{Error, Result};
use crate::refresh::SuggestionParams;
use jukebox_common::events::LastSuggestedTrack;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub const SUGGESTION_PARAMS_KEY: &str = "track_suggestion_params";
pub const LAST_SUGGESTED_TRACK_KEY: &str = "last_suggested_track";

/// Last user suggestion parameters saved through the API
pub async fn load_suggestion_params(db: &Pool<Sqlite>) -> Result<Option<SuggestionParams>> {
    get_json_setting(db, SUGGESTION_PARAMS_KEY).await
}

pub async fn save_suggestion_params(db: &Pool<Sqlite>, params: &SuggestionParams) -> Result<()> {
    set_json_setting(db, SUGGESTION_PARAMS_KEY, params).await
}

pub async fn load_last_suggested_track(db: &Pool<Sqlite>) -> Result<Option<LastSuggestedTrack>> {
    get_json_setting(db, LAST_SUGGESTED_TRACK_KEY).await
}

pub async fn save_last_suggested_track(db: &Pool<Sqlite>, track: &LastSuggestedTrack) -> Result<()> {
    set_json_setting(db, LAST_SUGGESTED_TRACK_KEY, track).await
}

/// Generic setting getter
///
/// Returns None if the setting doesn't exist.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

async fn get_json_setting<T: DeserializeOwned>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let Some(raw) = get_setting::<String>(db, key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::Config(format!("Failed to parse setting '{}': {}", key, e)))
}

async fn set_json_setting<T: Serialize>(db: &Pool<Sqlite>, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to encode setting '{}': {}", key, e)))?;
    set_setting(db, key, raw).await
}
