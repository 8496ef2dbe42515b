//! Media item query operations.
//!
//! Status changes are conditional updates: each one names the states it may
//! leave and the plan it belongs to, and reports whether a row actually
//! changed. Losing a race is therefore visible as `Ok(false)` rather than as
//! an overwrite.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mediagate_common::{
    Error, MediaItemId, PlanId, ProcessingMetrics, ProcessingPath, QualityLabel, Result, CallerId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{begin_immediate, conversion_plans, format_timestamp, parse_column, parse_timestamp};
use crate::models::{ConversionPlan, MediaItem, NewMediaItem};

const SELECT_COLUMNS: &str = "id, owner_id, media_type, original_filename, mime_type,
    original_size_bytes, source_path, fingerprint, width, height, processing_status,
    processing_path, compression_ratio_percent, processing_time_ms, processed_path,
    thumbnail_path, failure_reason, current_plan_id, deadline_at, revision, created_at,
    updated_at";

/// How an item enters its plan.
#[derive(Debug, Clone, Copy)]
pub enum PlanEntry<'a> {
    /// Enter `processing` or `server_processing`, with an optional callback deadline.
    Start { deadline_at: Option<DateTime<Utc>> },
    /// Passthrough: go straight to `processed`.
    Complete {
        processed_path: &'a str,
        metrics: ProcessingMetrics,
    },
}

/// Result of a successful processing run.
#[derive(Debug, Clone)]
pub struct SuccessRecord<'a> {
    pub route: ProcessingPath,
    pub processed_path: &'a str,
    pub thumbnail_path: Option<&'a str>,
    pub metrics: Option<ProcessingMetrics>,
    pub variants: &'a [(QualityLabel, String)],
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<MediaItem> {
    let ratio: Option<f64> = row.get(12)?;
    let time_ms: Option<i64> = row.get(13)?;
    let metrics = match (ratio, time_ms) {
        (Some(compression_ratio_percent), Some(ms)) => Some(ProcessingMetrics {
            compression_ratio_percent,
            processing_time_ms: ms.max(0) as u64,
        }),
        _ => None,
    };

    Ok(MediaItem {
        id: parse_column(0, &row.get::<_, String>(0)?)?,
        owner_id: CallerId::new(row.get::<_, String>(1)?),
        media_type: parse_column(2, &row.get::<_, String>(2)?)?,
        original_filename: row.get(3)?,
        mime_type: row.get(4)?,
        original_size_bytes: row.get::<_, i64>(5)?.max(0) as u64,
        source_path: row.get(6)?,
        fingerprint: row.get(7)?,
        width: row.get(8)?,
        height: row.get(9)?,
        processing_status: parse_column(10, &row.get::<_, String>(10)?)?,
        processing_path: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_column(11, &s))
            .transpose()?,
        metrics,
        quality_variants: BTreeMap::new(),
        processed_path: row.get(14)?,
        thumbnail_path: row.get(15)?,
        failure_reason: row.get(16)?,
        current_plan_id: row
            .get::<_, Option<String>>(17)?
            .map(|s| parse_column(17, &s))
            .transpose()?,
        deadline_at: row
            .get::<_, Option<String>>(18)?
            .map(|s| parse_timestamp(18, &s))
            .transpose()?,
        revision: row.get(19)?,
        created_at: parse_timestamp(20, &row.get::<_, String>(20)?)?,
        updated_at: parse_timestamp(21, &row.get::<_, String>(21)?)?,
    })
}

/// Create a media item in `pending`.
pub fn create_media_item(conn: &Connection, new: &NewMediaItem) -> Result<MediaItem> {
    let now = format_timestamp(Utc::now());

    conn.execute(
        "INSERT INTO media_items (id, owner_id, media_type, original_filename, mime_type,
            original_size_bytes, source_path, fingerprint, width, height, processing_status,
            created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        params![
            new.id.to_string(),
            new.owner_id.as_str(),
            new.media_type.to_string(),
            new.original_filename,
            new.mime_type,
            new.original_size_bytes as i64,
            new.source_path,
            new.fingerprint,
            new.width,
            new.height,
            now,
            now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    get_media_item(conn, new.id)?.ok_or_else(|| Error::not_found("media item", new.id))
}

/// Get a media item by ID, including its quality variants.
pub fn get_media_item(conn: &Connection, id: MediaItemId) -> Result<Option<MediaItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM media_items WHERE id = ?"),
            [id.to_string()],
            row_to_item,
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    match item {
        Some(mut item) => {
            item.quality_variants = list_variants(conn, id)?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

/// List the items owned by a caller, newest first.
pub fn list_media_items_for_owner(
    conn: &Connection,
    owner: &CallerId,
    limit: usize,
) -> Result<Vec<MediaItem>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM media_items WHERE owner_id = ?
             ORDER BY created_at DESC LIMIT ?"
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let mut items = stmt
        .query_map(params![owner.as_str(), limit as i64], row_to_item)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    for item in &mut items {
        item.quality_variants = list_variants(conn, item.id)?;
    }

    Ok(items)
}

/// Produced renditions of an item keyed by label.
pub fn list_variants(
    conn: &Connection,
    item_id: MediaItemId,
) -> Result<BTreeMap<QualityLabel, String>> {
    let mut stmt = conn
        .prepare("SELECT label, storage_path FROM quality_variants WHERE item_id = ?")
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([item_id.to_string()], |row| {
            let label: QualityLabel = parse_column(0, &row.get::<_, String>(0)?)?;
            Ok((label, row.get::<_, String>(1)?))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}

/// Apply an issued plan to a `pending` item and store the plan.
///
/// Returns `Ok(false)` without storing anything when the item is no longer
/// pending.
pub fn apply_plan(conn: &Connection, plan: &ConversionPlan, entry: PlanEntry<'_>) -> Result<bool> {
    let tx = begin_immediate(conn)?;
    let now = format_timestamp(Utc::now());

    let affected = match entry {
        PlanEntry::Start { deadline_at } => tx.execute(
            "UPDATE media_items
             SET processing_status = ?, current_plan_id = ?, deadline_at = ?,
                 revision = revision + 1, updated_at = ?
             WHERE id = ? AND processing_status = 'pending'",
            params![
                plan.entry_status().to_string(),
                plan.id.to_string(),
                deadline_at.map(format_timestamp),
                now,
                plan.item_id.to_string(),
            ],
        ),
        PlanEntry::Complete {
            processed_path,
            metrics,
        } => tx.execute(
            "UPDATE media_items
             SET processing_status = 'processed', processing_path = ?, current_plan_id = ?,
                 processed_path = ?, compression_ratio_percent = ?, processing_time_ms = ?,
                 revision = revision + 1, updated_at = ?
             WHERE id = ? AND processing_status = 'pending'",
            params![
                plan.route.to_string(),
                plan.id.to_string(),
                processed_path,
                metrics.compression_ratio_percent,
                metrics.processing_time_ms as i64,
                now,
                plan.item_id.to_string(),
            ],
        ),
    }
    .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Ok(false);
    }

    conversion_plans::insert_plan(&tx, plan)?;
    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}

/// Move an in-flight item to `processed`.
///
/// Only applies while the item is `processing`/`server_processing` under the
/// given plan. Variant labels already present are left untouched.
pub fn record_success(
    conn: &Connection,
    item_id: MediaItemId,
    plan_id: PlanId,
    record: &SuccessRecord<'_>,
) -> Result<bool> {
    let tx = begin_immediate(conn)?;
    let now = format_timestamp(Utc::now());

    let affected = tx
        .execute(
            "UPDATE media_items
             SET processing_status = 'processed', processing_path = ?, processed_path = ?,
                 thumbnail_path = COALESCE(?, thumbnail_path),
                 compression_ratio_percent = ?, processing_time_ms = ?, deadline_at = NULL,
                 revision = revision + 1, updated_at = ?
             WHERE id = ? AND current_plan_id = ?
               AND processing_status IN ('processing', 'server_processing')",
            params![
                record.route.to_string(),
                record.processed_path,
                record.thumbnail_path,
                record.metrics.map(|m| m.compression_ratio_percent),
                record.metrics.map(|m| m.processing_time_ms as i64),
                now,
                item_id.to_string(),
                plan_id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Ok(false);
    }

    for (label, path) in record.variants {
        tx.execute(
            "INSERT OR IGNORE INTO quality_variants (item_id, label, storage_path, created_at)
             VALUES (?, ?, ?, ?)",
            params![item_id.to_string(), label.to_string(), path, now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}

/// Move an in-flight item to `failed` with a human-readable reason.
pub fn record_failure(
    conn: &Connection,
    item_id: MediaItemId,
    plan_id: PlanId,
    reason: &str,
) -> Result<bool> {
    let affected = conn
        .execute(
            "UPDATE media_items
             SET processing_status = 'failed', failure_reason = ?, deadline_at = NULL,
                 revision = revision + 1, updated_at = ?
             WHERE id = ? AND current_plan_id = ?
               AND processing_status IN ('processing', 'server_processing')",
            params![
                reason,
                format_timestamp(Utc::now()),
                item_id.to_string(),
                plan_id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// Remote items whose callback deadline has passed.
pub fn list_overdue_remote(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<(MediaItemId, PlanId)>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, current_plan_id FROM media_items
             WHERE processing_status = 'server_processing'
               AND current_plan_id IS NOT NULL
               AND deadline_at IS NOT NULL AND deadline_at < ?",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let overdue = stmt
        .query_map([format_timestamp(now)], |row| {
            let id: MediaItemId = parse_column(0, &row.get::<_, String>(0)?)?;
            let plan_id: PlanId = parse_column(1, &row.get::<_, String>(1)?)?;
            Ok((id, plan_id))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(overdue)
}

/// Fail items left in local `processing` by a previous run.
///
/// Local jobs live only in memory, so after a restart nothing will ever
/// report their outcome.
pub fn fail_interrupted_local(conn: &Connection, reason: &str) -> Result<usize> {
    conn.execute(
        "UPDATE media_items
         SET processing_status = 'failed', failure_reason = ?,
             revision = revision + 1, updated_at = ?
         WHERE processing_status = 'processing'",
        params![reason, format_timestamp(Utc::now())],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Delete an item together with its plans and variants.
pub fn delete_media_item(conn: &Connection, id: MediaItemId) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM media_items WHERE id = ?", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(affected > 0)
}
