use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::insight;
use crate::models::{PassReport, SourceType};
use crate::source::{DataSource, FetchParams};

/// Runs one insight generation pass over every record that is still
/// unprocessed when the pass starts.
pub async fn run_insight_pass(pool: &SqlitePool) -> anyhow::Result<PassReport> {
    let mut rng = StdRng::from_entropy();
    run_insight_pass_with(pool, &mut rng).await
}

/// Per-row templating failures are logged and counted; storage errors end the
/// pass and leave rows committed so far in place.
pub async fn run_insight_pass_with<R: Rng + ?Sized>(
    pool: &SqlitePool,
    rng: &mut R,
) -> anyhow::Result<PassReport> {
    let run_id = Uuid::new_v4();
    let pending = db::fetch_unprocessed(pool).await?;
    info!(%run_id, pending = pending.len(), "starting insight pass");

    let mut report = PassReport {
        run_id,
        insights_generated: 0,
        skipped_unrecognized: 0,
        failed: 0,
        already_processed: 0,
    };

    for record in pending {
        let outcome = insight::generate_from_stored(&record.source_type, &record.content, &mut *rng);
        let generated = match outcome {
            Ok(Some(generated)) => generated,
            Ok(None) => {
                debug!(
                    id = record.id,
                    source_type = %record.source_type,
                    "unrecognized source type, leaving unprocessed"
                );
                report.skipped_unrecognized += 1;
                continue;
            }
            Err(err) => {
                warn!(id = record.id, error = %err, "skipping record");
                report.failed += 1;
                continue;
            }
        };

        if db::record_insight(pool, record.id, &generated, run_id).await? {
            report.insights_generated += 1;
            debug!(id = record.id, confidence = generated.confidence, "insight stored");
        } else {
            report.already_processed += 1;
        }
    }

    info!(
        %run_id,
        generated = report.insights_generated,
        skipped = report.skipped_unrecognized,
        failed = report.failed,
        "insight pass finished"
    );
    Ok(report)
}

/// Fetches one payload per requested source type and stores it as a raw
/// record. Returns the new record ids.
pub async fn ingest<S: DataSource + ?Sized>(
    pool: &SqlitePool,
    source: &S,
    source_types: &[SourceType],
    params: &FetchParams,
) -> anyhow::Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(source_types.len());
    for &source_type in source_types {
        let payload = source.fetch(source_type, params)?;
        let id = db::insert_raw_record(pool, source_type.as_str(), &payload).await?;
        info!(id, %source_type, "ingested payload");
        ids.push(id);
    }
    Ok(ids)
}
