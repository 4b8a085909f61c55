//! Store: embedded relational persistence with forward-only schema,
//! holding streams, tracks, recognitions, and plays, and enforcing the
//! dedup-uniqueness contract on plays.
//!
//! Grounded on the teacher's trait-for-testability idiom (`sonos/traits.rs`)
//! generalized to a `Store` capability with one production implementation
//! over SQLite via `sqlx`.

pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use models::{PlayInsertResult, RecognitionInput, TrackAttrs};

/// Embedded relational store capability.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upserts a stream by name, returning its stable id.
    async fn ensure_stream(&self, name: &str, url: &str, enabled: bool) -> Result<i64, StoreError>;

    /// Inserts or updates a track keyed by `(provider, provider_track_id)`.
    async fn upsert_track(
        &self,
        provider: &str,
        provider_track_id: &str,
        attrs: TrackAttrs,
    ) -> Result<i64, StoreError>;

    /// Records one recognition attempt.
    async fn insert_recognition(&self, input: RecognitionInput) -> Result<i64, StoreError>;

    /// Idempotently inserts a confirmed play. Returns `inserted: false`
    /// without error if the `(track, stream, dedup_bucket)` uniqueness
    /// constraint already has a matching row.
    async fn insert_play_idempotent(
        &self,
        stream_id: i64,
        track_id: i64,
        recognized_at: DateTime<Utc>,
        confidence: f64,
        dedup_seconds: i64,
    ) -> Result<PlayInsertResult, StoreError>;
}

/// Computes `floor(epoch_seconds(recognized_at) / dedup_seconds)`.
pub fn dedup_bucket(recognized_at: DateTime<Utc>, dedup_seconds: i64) -> i64 {
    recognized_at.timestamp().div_euclid(dedup_seconds.max(1))
}

/// Production `Store` backed by a SQLite file, opened in WAL mode.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `path`, enables WAL mode,
    /// and applies forward-only migrations. Aborts (returns an error) if
    /// migrations fail, per the "schema version matches or aborts" contract.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        sqlx::migrate!("src/store/migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens an in-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_stream(&self, name: &str, url: &str, enabled: bool) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO streams (name, url, enabled) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET url = excluded.url, enabled = excluded.enabled
             RETURNING id",
        )
        .bind(name)
        .bind(url)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn upsert_track(
        &self,
        provider: &str,
        provider_track_id: &str,
        attrs: TrackAttrs,
    ) -> Result<i64, StoreError> {
        let metadata = attrs.metadata.map(|v| v.to_string());
        let row = sqlx::query(
            "INSERT INTO tracks (provider, provider_track_id, title, artist, album, isrc, artwork_url, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(provider, provider_track_id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                isrc = excluded.isrc,
                artwork_url = excluded.artwork_url,
                metadata = excluded.metadata
             RETURNING id",
        )
        .bind(provider)
        .bind(provider_track_id)
        .bind(&attrs.title)
        .bind(&attrs.artist)
        .bind(&attrs.album)
        .bind(&attrs.isrc)
        .bind(&attrs.artwork_url)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn insert_recognition(&self, input: RecognitionInput) -> Result<i64, StoreError> {
        let raw_response = input.raw_response.map(|v| v.to_string());
        let row = sqlx::query(
            "INSERT INTO recognitions
                (stream_id, provider, window_start, window_end, recognized_at, track_id, confidence, latency_ms, raw_response, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(input.stream_id)
        .bind(&input.provider)
        .bind(input.window_start.to_rfc3339())
        .bind(input.window_end.to_rfc3339())
        .bind(input.recognized_at.to_rfc3339())
        .bind(input.track_id)
        .bind(input.confidence)
        .bind(input.latency_ms)
        .bind(raw_response)
        .bind(&input.error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn insert_play_idempotent(
        &self,
        stream_id: i64,
        track_id: i64,
        recognized_at: DateTime<Utc>,
        confidence: f64,
        dedup_seconds: i64,
    ) -> Result<PlayInsertResult, StoreError> {
        let bucket = dedup_bucket(recognized_at, dedup_seconds);

        let existing = sqlx::query(
            "SELECT id FROM plays WHERE track_id = ? AND stream_id = ? AND dedup_bucket = ?",
        )
        .bind(track_id)
        .bind(stream_id)
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(PlayInsertResult {
                inserted: false,
                play_id: row.try_get::<i64, _>("id")?,
            });
        }

        let row = sqlx::query(
            "INSERT INTO plays (stream_id, track_id, recognized_at, confidence, dedup_bucket)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(track_id, stream_id, dedup_bucket) DO NOTHING
             RETURNING id",
        )
        .bind(stream_id)
        .bind(track_id)
        .bind(recognized_at.to_rfc3339())
        .bind(confidence)
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(PlayInsertResult {
                inserted: true,
                play_id: row.try_get::<i64, _>("id")?,
            }),
            None => {
                // Lost the race to a concurrent insert into the same bucket.
                let row = sqlx::query(
                    "SELECT id FROM plays WHERE track_id = ? AND stream_id = ? AND dedup_bucket = ?",
                )
                .bind(track_id)
                .bind(stream_id)
                .bind(bucket)
                .fetch_one(&self.pool)
                .await?;
                Ok(PlayInsertResult {
                    inserted: false,
                    play_id: row.try_get::<i64, _>("id")?,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::TrackAttrs;

    fn attrs() -> TrackAttrs {
        TrackAttrs {
            title: "Song".into(),
            artist: "Artist".into(),
            album: None,
            isrc: None,
            artwork_url: None,
            metadata: None,
        }
    }

    #[test]
    fn dedup_bucket_computation_matches_spec() {
        assert_eq!(dedup_bucket(DateTime::from_timestamp(240, 0).unwrap(), 300), 0);
        assert_eq!(dedup_bucket(DateTime::from_timestamp(360, 0).unwrap(), 300), 1);
        assert_eq!(dedup_bucket(DateTime::from_timestamp(300, 0).unwrap(), 300), 1);
    }

    #[tokio::test]
    async fn ensure_stream_is_idempotent_by_name() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.ensure_stream("kitchen", "rtsp://a", true).await.unwrap();
        let second = store.ensure_stream("kitchen", "rtsp://b", false).await.unwrap();
        assert_eq!(first, second);
    }

    // Invariant 1: dedup idempotence.
    #[tokio::test]
    async fn insert_play_idempotent_absorbs_duplicates() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let stream_id = store.ensure_stream("kitchen", "rtsp://a", true).await.unwrap();
        let track_id = store.upsert_track("audd", "abc", attrs()).await.unwrap();

        let recognized_at = DateTime::from_timestamp(240, 0).unwrap();
        let first = store
            .insert_play_idempotent(stream_id, track_id, recognized_at, 0.9, 300)
            .await
            .unwrap();
        assert!(first.inserted);

        let second = store
            .insert_play_idempotent(stream_id, track_id, recognized_at, 0.95, 300)
            .await
            .unwrap();
        assert!(!second.inserted);
        assert_eq!(second.play_id, first.play_id);
    }

    // S4 — dedup across adjacent confirmations.
    #[tokio::test]
    async fn adjacent_buckets_both_produce_plays_but_colliding_bucket_is_absorbed() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let stream_id = store.ensure_stream("kitchen", "rtsp://a", true).await.unwrap();
        let track_id = store.upsert_track("audd", "abc", attrs()).await.unwrap();

        let first = store
            .insert_play_idempotent(stream_id, track_id, DateTime::from_timestamp(240, 0).unwrap(), 0.8, 300)
            .await
            .unwrap();
        assert!(first.inserted);

        let second = store
            .insert_play_idempotent(stream_id, track_id, DateTime::from_timestamp(360, 0).unwrap(), 0.8, 300)
            .await
            .unwrap();
        assert!(second.inserted);
        assert_ne!(first.play_id, second.play_id);

        let third = store
            .insert_play_idempotent(stream_id, track_id, DateTime::from_timestamp(300, 0).unwrap(), 0.8, 300)
            .await
            .unwrap();
        assert!(!third.inserted);
        assert_eq!(third.play_id, second.play_id);
    }

    #[tokio::test]
    async fn upsert_track_updates_on_conflict() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id1 = store.upsert_track("audd", "abc", attrs()).await.unwrap();
        let mut updated = attrs();
        updated.title = "New Title".into();
        let id2 = store.upsert_track("audd", "abc", updated).await.unwrap();
        assert_eq!(id1, id2);
    }
}
