use crate::connection::{connect, run_migrations};
use crate::error::DbError;
use api_client::CandleSource;
use chrono::{DateTime, Duration, Utc};
use core_types::{Candle, CandleInterval, Quotation};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Durable per-(instrument, interval) candle series with update watermarks.
///
/// Every `update` is all-or-nothing: the candles and the watermark are
/// written in one transaction, after all source windows were fetched.
#[derive(Debug, Clone)]
pub struct CandleStore {
    pool: SqlitePool,
    history_depth: Duration,
}

impl CandleStore {
    pub const DEFAULT_HISTORY_DEPTH_DAYS: i64 = 30;

    /// Opens (or creates) the store at `path` and applies the schema.
    pub async fn open(path: &str) -> Result<Self, DbError> {
        let pool = connect(path).await?;
        run_migrations(&pool).await?;
        tracing::debug!(path, "Candle store opened.");
        Ok(Self::new(pool))
    }

    /// Wraps an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            history_depth: Duration::days(Self::DEFAULT_HISTORY_DEPTH_DAYS),
        }
    }

    /// How far back the first update of a series reaches.
    pub fn with_history_depth(mut self, depth: Duration) -> Self {
        self.history_depth = depth;
        self
    }

    /// Complete candles of one series with `time` in `[from, to)`, ascending.
    pub async fn load(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DbError> {
        let rows = self.complete_rows(instrument_uid, interval, from, to).await?;

        rows.iter()
            .map(|row| candle_from_row(row, instrument_uid, interval))
            .collect()
    }

    /// Like [`CandleStore::load`], but a corrupt row ends the series instead
    /// of failing it: the candles before it are returned together with the
    /// corruption error.
    pub async fn load_consistent(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(Vec<Candle>, Option<DbError>), DbError> {
        let rows = self.complete_rows(instrument_uid, interval, from, to).await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            match candle_from_row(row, instrument_uid, interval) {
                Ok(candle) => candles.push(candle),
                Err(e @ DbError::StoreCorruption { .. }) => {
                    tracing::warn!(instrument_uid, %interval, error = %e, "Series truncated at a corrupt row.");
                    return Ok((candles, Some(e)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok((candles, None))
    }

    async fn complete_rows(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SqliteRow>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT time, open, close, high, low, volume, is_complete
            FROM candles
            WHERE instrument_uid = ? AND interval = ? AND is_complete = 1
              AND time >= ? AND time < ?
            ORDER BY time ASC
            "#,
        )
        .bind(instrument_uid)
        .bind(interval.as_str())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Time of the last successful update of a series.
    pub async fn watermark(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let time: Option<i64> =
            sqlx::query_scalar::<_, i64>("SELECT time FROM updates WHERE instrument_id = ? AND interval = ?")
                .bind(instrument_uid)
                .bind(interval.as_str())
                .fetch_optional(&self.pool)
                .await?;

        time.map(|secs| {
            DateTime::from_timestamp(secs, 0).ok_or_else(|| DbError::StoreCorruption {
                instrument_uid: instrument_uid.to_string(),
                time: secs,
                reason: "watermark out of range".to_string(),
            })
        })
        .transpose()
    }

    async fn earliest_incomplete(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let time: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(time) FROM candles WHERE instrument_uid = ? AND interval = ? AND is_complete = 0",
        )
        .bind(instrument_uid)
        .bind(interval.as_str())
        .fetch_one(&self.pool)
        .await?;

        time.map(|secs| {
            DateTime::from_timestamp(secs, 0).ok_or_else(|| DbError::StoreCorruption {
                instrument_uid: instrument_uid.to_string(),
                time: secs,
                reason: "candle time out of range".to_string(),
            })
        })
        .transpose()
    }

    /// Fetches the series from its watermark (or `now - history_depth`) up to
    /// `now`, upserts the candles and advances the watermark to `now`.
    ///
    /// Returns the number of candles written. On error nothing is written.
    pub async fn update<S: CandleSource + ?Sized>(
        &self,
        instrument_uid: &str,
        interval: CandleInterval,
        now: DateTime<Utc>,
        source: &S,
    ) -> Result<usize, DbError> {
        // Start at the bar containing the watermark so a bar that was still
        // open at the last update is refreshed, or earlier if an older bar
        // is still stored incomplete.
        let from = match self.watermark(instrument_uid, interval).await? {
            Some(watermark) => {
                let resume = interval.align(watermark);
                match self.earliest_incomplete(instrument_uid, interval).await? {
                    Some(incomplete) => incomplete.min(resume),
                    None => resume,
                }
            }
            None => interval.align(now - self.history_depth),
        };

        let mut candles = Vec::new();
        let mut window_start = from;
        while window_start < now {
            let window_end = (window_start + interval.max_request_span()).min(now);
            let batch = source
                .fetch_candles(instrument_uid, interval, window_start, window_end)
                .await?;
            tracing::debug!(
                instrument_uid,
                %interval,
                from = %window_start,
                to = %window_end,
                candles = batch.len(),
                "Fetched candle window."
            );
            candles.extend(batch);
            window_start = window_end;
        }

        for candle in &candles {
            if candle.instrument_uid != instrument_uid || candle.interval != interval {
                return Err(DbError::InvalidCandle(format!(
                    "expected {instrument_uid}/{interval}, got {}/{}",
                    candle.instrument_uid, candle.interval
                )));
            }
            candle
                .validate()
                .map_err(|e| DbError::InvalidCandle(e.to_string()))?;
        }

        let mut tx = self.pool.begin().await?;

        for candle in &candles {
            sqlx::query(
                r#"
                INSERT INTO candles (instrument_uid, interval, time, open, close, high, low, volume, is_complete)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (instrument_uid, interval, time) DO UPDATE SET
                    open = excluded.open,
                    close = excluded.close,
                    high = excluded.high,
                    low = excluded.low,
                    volume = excluded.volume,
                    is_complete = excluded.is_complete
                WHERE excluded.is_complete = 1 OR candles.is_complete = 0
                "#,
            )
            .bind(instrument_uid)
            .bind(interval.as_str())
            .bind(candle.time.timestamp())
            .bind(candle.open.to_decimal().to_string())
            .bind(candle.close.to_decimal().to_string())
            .bind(candle.high.to_decimal().to_string())
            .bind(candle.low.to_decimal().to_string())
            .bind(candle.volume)
            .bind(candle.is_complete)
            .execute(&mut *tx) // Note: must use the transaction object `tx` here
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO updates (instrument_id, interval, time) VALUES (?, ?, ?)
            ON CONFLICT (instrument_id, interval) DO UPDATE SET time = excluded.time
            "#,
        )
        .bind(instrument_uid)
        .bind(interval.as_str())
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(instrument_uid, %interval, candles = candles.len(), watermark = %now, "Candle series updated.");
        Ok(candles.len())
    }
}

fn candle_from_row(
    row: &SqliteRow,
    instrument_uid: &str,
    interval: CandleInterval,
) -> Result<Candle, DbError> {
    let time: i64 = row.try_get("time")?;
    let corrupt = |reason: String| DbError::StoreCorruption {
        instrument_uid: instrument_uid.to_string(),
        time,
        reason,
    };
    let price = |column: &str| -> Result<Quotation, DbError> {
        let text: String = row.try_get(column)?;
        let value = Decimal::from_str(&text).map_err(|e| corrupt(format!("{column}: {e}")))?;
        Quotation::try_from(value).map_err(|e| corrupt(format!("{column}: {e}")))
    };

    let candle = Candle {
        instrument_uid: instrument_uid.to_string(),
        interval,
        time: DateTime::from_timestamp(time, 0).ok_or_else(|| corrupt("time out of range".to_string()))?,
        open: price("open")?,
        close: price("close")?,
        high: price("high")?,
        low: price("low")?,
        volume: row.try_get("volume")?,
        is_complete: row.try_get("is_complete")?,
    };
    candle.validate().map_err(|e| corrupt(e.to_string()))?;
    Ok(candle)
}
