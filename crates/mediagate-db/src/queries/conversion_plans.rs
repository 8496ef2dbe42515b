//! Conversion plan query operations.

use mediagate_common::{Error, MediaItemId, PlanId, QualityLabel, Result};
use rusqlite::{params, Connection, Row};

use super::{format_timestamp, parse_column, parse_timestamp};
use crate::models::ConversionPlan;

const SELECT_COLUMNS: &str =
    "id, item_id, target_format, requested_variants, route, execution_site, issued_at";

fn row_to_plan(row: &Row<'_>) -> rusqlite::Result<ConversionPlan> {
    let variants_json: String = row.get(3)?;
    let requested_variants: Vec<QualityLabel> =
        serde_json::from_str(&variants_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ConversionPlan {
        id: parse_column(0, &row.get::<_, String>(0)?)?,
        item_id: parse_column(1, &row.get::<_, String>(1)?)?,
        target_format: parse_column(2, &row.get::<_, String>(2)?)?,
        requested_variants,
        route: parse_column(4, &row.get::<_, String>(4)?)?,
        execution_site: parse_column(5, &row.get::<_, String>(5)?)?,
        issued_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
    })
}

/// Insert an issued plan.
pub fn insert_plan(conn: &Connection, plan: &ConversionPlan) -> Result<()> {
    let variants = serde_json::to_string(&plan.requested_variants)
        .map_err(|e| Error::internal(e.to_string()))?;

    conn.execute(
        "INSERT INTO conversion_plans
            (id, item_id, target_format, requested_variants, route, execution_site, issued_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            plan.id.to_string(),
            plan.item_id.to_string(),
            plan.target_format.to_string(),
            variants,
            plan.route.to_string(),
            plan.execution_site.to_string(),
            format_timestamp(plan.issued_at),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Get a plan by ID.
pub fn get_plan(conn: &Connection, id: PlanId) -> Result<Option<ConversionPlan>> {
    match conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM conversion_plans WHERE id = ?"),
        [id.to_string()],
        row_to_plan,
    ) {
        Ok(plan) => Ok(Some(plan)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}
