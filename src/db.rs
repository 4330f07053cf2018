use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::fmt::Hyphenated;
use uuid::Uuid;

use crate::models::{
    DataStats, GeneratedInsight, Insight, RawRecord, RecentInsight, SourceType, SourceTypeCount,
};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url '{database_url}'"))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open SQLite database")
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    Ok(())
}

/// Persists one externally sourced payload. Any source type string is
/// accepted; classification decides later whether it is recognized.
pub async fn insert_raw_record(
    pool: &SqlitePool,
    source_type: &str,
    content: &Value,
) -> anyhow::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO raw_records (source_type, content, created_at, processed)
        VALUES (?, ?, ?, 0)
        "#,
    )
    .bind(source_type)
    .bind(content.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    debug!(id, source_type, "stored raw record");
    Ok(id)
}

fn raw_record_from_row(row: &sqlx::sqlite::SqliteRow) -> RawRecord {
    RawRecord {
        id: row.get("id"),
        source_type: row.get("source_type"),
        content: row.get("content"),
        created_at: row.get("created_at"),
        processed: row.get("processed"),
    }
}

pub async fn fetch_unprocessed(pool: &SqlitePool) -> anyhow::Result<Vec<RawRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_type, content, created_at, processed
        FROM raw_records
        WHERE processed = 0
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(raw_record_from_row).collect())
}

pub async fn fetch_raw_record(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<RawRecord>> {
    let row = sqlx::query(
        "SELECT id, source_type, content, created_at, processed FROM raw_records WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(raw_record_from_row))
}

/// Marks the record processed and stores its insight in one transaction.
///
/// The processed flag is flipped with a compare-and-swap; when another writer
/// already flipped it nothing is written and `false` is returned.
pub async fn record_insight(
    pool: &SqlitePool,
    raw_record_id: i64,
    insight: &GeneratedInsight,
    run_id: Uuid,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query("UPDATE raw_records SET processed = 1 WHERE id = ? AND processed = 0")
        .bind(raw_record_id)
        .execute(&mut *tx)
        .await?;

    if claimed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO insights
        (raw_record_id, text, confidence, category_label, generated_at, run_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(raw_record_id)
    .bind(&insight.text)
    .bind(insight.confidence)
    .bind(&insight.category_label)
    .bind(Utc::now())
    .bind(run_id.hyphenated())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

pub async fn fetch_insights_for(
    pool: &SqlitePool,
    raw_record_id: i64,
) -> anyhow::Result<Vec<Insight>> {
    let rows = sqlx::query(
        r#"
        SELECT id, raw_record_id, text, confidence, category_label, generated_at, run_id
        FROM insights
        WHERE raw_record_id = ?
        ORDER BY id
        "#,
    )
    .bind(raw_record_id)
    .fetch_all(pool)
    .await?;

    let mut insights = Vec::new();
    for row in rows {
        insights.push(Insight {
            id: row.get("id"),
            raw_record_id: row.get("raw_record_id"),
            text: row.get("text"),
            confidence: row.get("confidence"),
            category_label: row.get("category_label"),
            generated_at: row.get("generated_at"),
            run_id: row.get::<Hyphenated, _>("run_id").into_uuid(),
        });
    }

    Ok(insights)
}

pub async fn data_stats(pool: &SqlitePool) -> anyhow::Result<DataStats> {
    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_records")
        .fetch_one(pool)
        .await?;
    let processed_records: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM raw_records WHERE processed = 1")
            .fetch_one(pool)
            .await?;
    let total_insights: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insights")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT source_type, COUNT(*) AS record_count
        FROM raw_records
        GROUP BY source_type
        ORDER BY record_count DESC, source_type
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_source_type = rows
        .into_iter()
        .map(|row| SourceTypeCount {
            source_type: row.get("source_type"),
            count: row.get("record_count"),
        })
        .collect();

    Ok(DataStats {
        total_records,
        processed_records,
        total_insights,
        by_source_type,
    })
}

pub async fn recent_insights(pool: &SqlitePool, limit: u32) -> anyhow::Result<Vec<RecentInsight>> {
    let rows = sqlx::query(
        r#"
        SELECT i.text, i.confidence, i.category_label, i.generated_at, r.source_type
        FROM insights i
        JOIN raw_records r ON r.id = i.raw_record_id
        ORDER BY i.generated_at DESC, i.id DESC
        LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut insights = Vec::new();
    for row in rows {
        insights.push(RecentInsight {
            text: row.get("text"),
            confidence: row.get("confidence"),
            category_label: row.get("category_label"),
            generated_at: row.get("generated_at"),
            source_type: row.get("source_type"),
        });
    }

    Ok(insights)
}

pub async fn seed(pool: &SqlitePool) -> anyhow::Result<usize> {
    let records = vec![
        (
            SourceType::Financial,
            json!({
                "symbol": "AAPL",
                "period": "30 days",
                "current_price": 154.8,
                "data": {
                    "price_change_percent": 3.2,
                    "price_trend": "bullish",
                    "volatility": 0.15,
                    "volume": 18250000,
                    "sentiment": 0.78
                }
            }),
        ),
        (
            SourceType::Scientific,
            json!({
                "query": "artificial intelligence",
                "papers_found": 64,
                "trending_topics": ["Neuro-symbolic AI", "AGI safety", "Multimodal learning"],
                "innovation_score": 0.86,
                "recent_breakthroughs": ["Efficient attention mechanisms"]
            }),
        ),
        (
            SourceType::Social,
            json!({
                "topic": "AI ethics",
                "sentiment_analysis": {"positive": 0.68, "negative": 0.18, "neutral": 0.14},
                "key_phrases": ["ethical AI", "transparency"],
                "engagement_metrics": {"mentions": 1430, "reach": 420000, "engagement_rate": 0.051}
            }),
        ),
        (
            SourceType::Iot,
            json!({
                "sensor_type": "environmental",
                "readings": {
                    "temperature": 22.4,
                    "humidity": 61.0,
                    "air_quality": 91.5,
                    "noise_level": 52.0
                },
                "anomalies_detected": 1
            }),
        ),
    ];

    let mut inserted = 0usize;
    for (source_type, content) in records {
        insert_raw_record(pool, source_type.as_str(), &content).await?;
        inserted += 1;
    }

    info!(inserted, "seeded raw records");
    Ok(inserted)
}

/// Imports raw records from a CSV file with `source_type` and `content`
/// columns, where `content` holds a JSON document.
pub async fn import_csv(pool: &SqlitePool, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        source_type: String,
        content: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut parsed = Vec::new();
    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = result.with_context(|| format!("invalid CSV row at line {line}"))?;
        let content: Value = serde_json::from_str(&row.content)
            .with_context(|| format!("content at line {line} is not valid JSON"))?;
        parsed.push((row.source_type, content));
    }

    let mut inserted = 0usize;
    for (source_type, content) in parsed {
        insert_raw_record(pool, source_type.trim(), &content).await?;
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // every connection to sqlite::memory: is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_db(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_insight() -> GeneratedInsight {
        GeneratedInsight {
            text: "P3 IOT: 0 anomalies".to_string(),
            confidence: 0.83,
            category_label: "ENVIRONNEMENTAL".to_string(),
        }
    }

    #[tokio::test]
    async fn inserted_records_start_unprocessed() {
        let pool = test_pool().await;
        let id = insert_raw_record(&pool, "iot", &json!({"sensor_type": "env"}))
            .await
            .unwrap();

        let record = fetch_raw_record(&pool, id).await.unwrap().unwrap();
        assert!(!record.processed);
        assert_eq!(record.source_type, "iot");

        let pending = fetch_unprocessed(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[tokio::test]
    async fn record_insight_claims_a_row_only_once() {
        let pool = test_pool().await;
        let id = insert_raw_record(&pool, "iot", &json!({})).await.unwrap();
        let run_id = Uuid::new_v4();

        assert!(record_insight(&pool, id, &sample_insight(), run_id).await.unwrap());
        assert!(!record_insight(&pool, id, &sample_insight(), run_id).await.unwrap());

        let insights = fetch_insights_for(&pool, id).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].run_id, run_id);
        assert!(fetch_raw_record(&pool, id).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn stats_count_records_by_source_type() {
        let pool = test_pool().await;
        seed(&pool).await.unwrap();
        insert_raw_record(&pool, "financial", &json!({})).await.unwrap();

        let stats = data_stats(&pool).await.unwrap();
        assert_eq!(stats.total_records, 5);
        assert_eq!(stats.processed_records, 0);
        assert_eq!(stats.total_insights, 0);
        assert_eq!(stats.pending_records(), 5);
        assert_eq!(stats.by_source_type[0].source_type, "financial");
        assert_eq!(stats.by_source_type[0].count, 2);
    }

    #[tokio::test]
    async fn import_reads_json_content_column() {
        let pool = test_pool().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_type,content").unwrap();
        writeln!(file, r#"iot,"{{""sensor_type"":""env"",""anomalies_detected"":0,""readings"":{{}}}}""#).unwrap();
        writeln!(file, r#"weather,"{{}}""#).unwrap();
        file.flush().unwrap();

        let inserted = import_csv(&pool, file.path()).await.unwrap();
        assert_eq!(inserted, 2);

        let pending = fetch_unprocessed(&pool).await.unwrap();
        let content: Value = serde_json::from_str(&pending[0].content).unwrap();
        assert_eq!(content["sensor_type"], "env");
        assert_eq!(pending[1].source_type, "weather");
    }

    #[tokio::test]
    async fn import_rejects_invalid_json_without_partial_writes() {
        let pool = test_pool().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_type,content").unwrap();
        writeln!(file, r#"iot,"{{}}""#).unwrap();
        writeln!(file, "iot,not-json").unwrap();
        file.flush().unwrap();

        let err = import_csv(&pool, file.path()).await.unwrap_err();
        assert!(err.to_string().contains("line 3"));
        assert!(fetch_unprocessed(&pool).await.unwrap().is_empty());
    }
}
