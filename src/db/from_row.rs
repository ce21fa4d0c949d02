//! Row mapping trait and helpers.
//!
//! Entities are always read through named column lists and `FromRow`
//! implementations, never positional arrays baked into call sites.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PURCHASE_COLS: &str = "source, product_id, order_id, token, original_order_id, status, \
     expiry_date, end_date, update_date, paddle_user_id, random_id, receipt_url, update_url, \
     cancel_url";

pub const PURCHASE_USER_COLS: &str = "purchase_id, user_id, update_date";

pub const PURCHASE_EXTRA_COLS: &str = "purchase_id, create_date";

// ============ FromRow Implementations ============

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Purchase {
            source: parse_enum(row, 0, "source")?,
            product_id: parse_enum(row, 1, "product_id")?,
            order_id: row.get(2)?,
            token: row.get(3)?,
            original_order_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            expiry_date: row.get(6)?,
            end_date: row.get(7)?,
            update_date: row.get(8)?,
            paddle_user_id: row.get(9)?,
            random_id: row.get(10)?,
            receipt_url: row.get(11)?,
            update_url: row.get(12)?,
            cancel_url: row.get(13)?,
        })
    }
}

impl FromRow for PurchaseUser {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PurchaseUser {
            purchase_id: row.get(0)?,
            user_id: row.get(1)?,
            update_date: row.get(2)?,
        })
    }
}

impl FromRow for PurchaseExtra {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PurchaseExtra {
            purchase_id: row.get(0)?,
            create_date: row.get(1)?,
        })
    }
}
