use std::time::Duration;

use rand::Rng;
use rusqlite::{params, Connection, ErrorCode};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;
use crate::util::now_ms;

use super::from_row::{query_all, query_one, PURCHASE_COLS, PURCHASE_EXTRA_COLS, PURCHASE_USER_COLS};

/// Page cap for the incremental "updated since" queries; callers paginate
/// by re-issuing with the last seen update date.
pub const UPDATED_PAGE_LIMIT: i64 = 800;

const CONFLICT_MAX_ATTEMPTS: u32 = 5;
const CONFLICT_BACKOFF_MIN_MS: u64 = 100;
const CONFLICT_BACKOFF_MAX_MS: u64 = 500;

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derive the canonical purchase id. This is the sole identity derivation
/// point: PlayStore purchases key on the opaque token, everything else on
/// the vendor's stable original order id.
pub fn purchase_id(
    source: IapSource,
    token: Option<&str>,
    original_order_id: Option<&str>,
) -> Result<String> {
    let key = match source {
        IapSource::PlayStore => token.filter(|v| !v.is_empty()).ok_or_else(|| {
            AppError::BadRequest("Missing token for PlayStore purchase id".to_string())
        })?,
        IapSource::AppStore | IapSource::Paddle | IapSource::Manual => original_order_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "Missing originalOrderId for {} purchase id",
                    source
                ))
            })?,
    };
    Ok(format!("{}_{}", source.as_str(), key))
}

fn is_conflict(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Database(rusqlite::Error::SqliteFailure(f, _))
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Run a transactional operation, retrying on store conflicts with
/// randomized backoff. Concurrent webhook + client-verify races on the same
/// purchase id are expected; anything that is not a conflict propagates
/// immediately. Exhausting the attempts surfaces the underlying error.
pub fn retry_on_conflict<T, F>(log_key: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_conflict(&err) => {
                if attempt >= CONFLICT_MAX_ATTEMPTS {
                    return Err(AppError::Conflict(err.to_string()));
                }
                let wait = rand::thread_rng()
                    .gen_range(CONFLICT_BACKOFF_MIN_MS..=CONFLICT_BACKOFF_MAX_MS);
                tracing::warn!(
                    "({}) Transaction conflict on attempt {}, retrying in {}ms",
                    log_key,
                    attempt,
                    wait
                );
                std::thread::sleep(Duration::from_millis(wait));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn upsert_purchase_row(conn: &Connection, id: &str, purchase: &Purchase) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO purchases (id, source, product_id, order_id, token, \
         original_order_id, status, expiry_date, end_date, update_date, paddle_user_id, \
         random_id, receipt_url, update_url, cancel_url) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            id,
            purchase.source.as_str(),
            purchase.product_id.as_str(),
            purchase.order_id,
            purchase.token,
            purchase.original_order_id,
            purchase.status.as_str(),
            purchase.expiry_date,
            purchase.end_date,
            purchase.update_date,
            purchase.paddle_user_id,
            purchase.random_id,
            purchase.receipt_url,
            purchase.update_url,
            purchase.cancel_url,
        ],
    )?;
    Ok(())
}

fn insert_extra_if_absent(conn: &Connection, id: &str, create_date: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO purchase_extras (purchase_id, create_date) VALUES (?1, ?2)",
        params![id, create_date],
    )?;
    Ok(())
}

fn attach_user(conn: &Connection, id: &str, user_id: &str, update_date: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO purchase_users (purchase_id, user_id, update_date) \
         VALUES (?1, ?2, ?3)",
        params![id, user_id, update_date],
    )?;
    Ok(())
}

pub fn get_purchase(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_purchase_extra(conn: &Connection, id: &str) -> Result<Option<PurchaseExtra>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchase_extras WHERE purchase_id = ?1",
            PURCHASE_EXTRA_COLS
        ),
        &[&id],
    )
}

/// Create Purchase + PurchaseExtra + one PurchaseUser row in one
/// transaction, on first successful verify.
///
/// Not valid for Paddle: Paddle has no atomic first verify, its purchases
/// arrive through `update_partial_purchase`.
pub fn add_purchase(
    conn: &Connection,
    log_key: &str,
    source: IapSource,
    user_id: &str,
    token: Option<&str>,
    parsed: &ParsedPurchase,
) -> Result<Purchase> {
    if source == IapSource::Paddle {
        return Err(AppError::BadRequest(
            "addPurchase is not valid for Paddle".to_string(),
        ));
    }

    let effective_token = token.or(parsed.token.as_deref());
    let id = purchase_id(source, effective_token, Some(&parsed.original_order_id))?;

    retry_on_conflict(log_key, || {
        let tx = conn.unchecked_transaction()?;
        let now = now_ms();

        let purchase = Purchase {
            source,
            product_id: parsed.product_id,
            order_id: parsed.order_id.clone(),
            token: effective_token.map(String::from),
            original_order_id: parsed.original_order_id.clone(),
            status: parsed.status,
            expiry_date: parsed.expiry_date,
            end_date: parsed.end_date,
            update_date: now,
            paddle_user_id: None,
            random_id: None,
            receipt_url: None,
            update_url: None,
            cancel_url: None,
        };

        upsert_purchase_row(&tx, &id, &purchase)?;
        insert_extra_if_absent(&tx, &id, now)?;
        attach_user(&tx, &id, user_id, now)?;

        tx.commit()?;
        Ok(purchase)
    })
}

/// Transactional read-modify-write on re-verification or notification.
///
/// An incoming null token keeps the previously stored one: App Store server
/// notifications carry no receipt, and the stored receipt is what the
/// reverify sweep later presents to Apple.
pub fn update_purchase(
    conn: &Connection,
    log_key: &str,
    source: IapSource,
    token: Option<&str>,
    parsed: &ParsedPurchase,
) -> Result<Purchase> {
    let effective_token = token.or(parsed.token.as_deref());
    let id = purchase_id(source, effective_token, Some(&parsed.original_order_id))?;

    retry_on_conflict(log_key, || {
        let tx = conn.unchecked_transaction()?;
        let now = now_ms();

        let existing = get_purchase(&tx, &id)?;
        if existing.is_none() {
            tracing::warn!("({}) No prior purchase for update: {}", log_key, id);
        }

        let kept = existing.as_ref();
        let purchase = Purchase {
            source,
            product_id: parsed.product_id,
            order_id: parsed.order_id.clone(),
            token: effective_token
                .map(String::from)
                .or_else(|| kept.and_then(|p| p.token.clone())),
            original_order_id: parsed.original_order_id.clone(),
            status: parsed.status,
            expiry_date: parsed.expiry_date,
            end_date: parsed.end_date,
            update_date: now,
            paddle_user_id: kept.and_then(|p| p.paddle_user_id.clone()),
            random_id: kept.and_then(|p| p.random_id.clone()),
            receipt_url: kept.and_then(|p| p.receipt_url.clone()),
            update_url: kept.and_then(|p| p.update_url.clone()),
            cancel_url: kept.and_then(|p| p.cancel_url.clone()),
        };

        upsert_purchase_row(&tx, &id, &purchase)?;
        insert_extra_if_absent(&tx, &id, now)?;

        tx.commit()?;
        Ok(purchase)
    })
}

/// Paddle-specific merge: shallow-merge a sparse webhook patch over the
/// stored purchase (or synthesized defaults), inside one transaction with
/// bounded retry. Fields absent from the patch keep their stored values.
pub fn update_partial_purchase(
    conn: &Connection,
    log_key: &str,
    user_id: Option<&str>,
    original_order_id: &str,
    patch: &PartialPurchase,
) -> Result<Purchase> {
    let id = purchase_id(IapSource::Paddle, None, Some(original_order_id))?;

    retry_on_conflict(log_key, || {
        let tx = conn.unchecked_transaction()?;
        let now = now_ms();

        let existing = get_purchase(&tx, &id)?;
        let purchase = match existing {
            Some(prior) => Purchase {
                source: IapSource::Paddle,
                product_id: patch.product_id.unwrap_or(prior.product_id),
                order_id: patch.order_id.clone().unwrap_or(prior.order_id),
                token: patch.token.clone().or(prior.token),
                original_order_id: original_order_id.to_string(),
                status: patch.status.unwrap_or(prior.status),
                expiry_date: patch.expiry_date.unwrap_or(prior.expiry_date),
                end_date: patch.end_date.unwrap_or(prior.end_date),
                update_date: now,
                paddle_user_id: patch.paddle_user_id.clone().or(prior.paddle_user_id),
                random_id: patch.random_id.clone().or(prior.random_id),
                receipt_url: patch.receipt_url.clone().or(prior.receipt_url),
                update_url: patch.update_url.clone().or(prior.update_url),
                cancel_url: patch.cancel_url.clone().or(prior.cancel_url),
            },
            None => {
                let product_id = patch.product_id.ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "No stored purchase {} and no productId in patch",
                        id
                    ))
                })?;
                Purchase {
                    source: IapSource::Paddle,
                    product_id,
                    order_id: patch.order_id.clone().unwrap_or_default(),
                    token: patch.token.clone(),
                    original_order_id: original_order_id.to_string(),
                    status: patch.status.unwrap_or(PurchaseStatus::Unknown),
                    expiry_date: patch.expiry_date.unwrap_or(0),
                    end_date: patch.end_date.unwrap_or(0),
                    update_date: now,
                    paddle_user_id: patch.paddle_user_id.clone(),
                    random_id: patch.random_id.clone(),
                    receipt_url: patch.receipt_url.clone(),
                    update_url: patch.update_url.clone(),
                    cancel_url: patch.cancel_url.clone(),
                }
            }
        };

        upsert_purchase_row(&tx, &id, &purchase)?;
        insert_extra_if_absent(&tx, &id, now)?;

        // A webhook-discovered purchase finds its user either directly or
        // through the pre-registered correlation id.
        let resolved_user = match user_id {
            Some(u) => Some(u.to_string()),
            None => match &purchase.random_id {
                Some(random_id) => get_paddle_pre_user(&tx, random_id)?,
                None => None,
            },
        };
        if let Some(user) = resolved_user {
            attach_user(&tx, &id, &user, now)?;
        }

        tx.commit()?;
        Ok(purchase)
    })
}

/// PlayStore supersede: a plan change issues a new token whose payload
/// names the old one (`linkedPurchaseToken`). Atomically delete the old
/// purchase, recreate it under the new identity, re-point every associated
/// user row, and carry the first-seen time forward.
///
/// Idempotent: a repeat with the same arguments finds the old row already
/// gone and converges on the same end state.
pub fn invalidate_purchase(
    conn: &Connection,
    log_key: &str,
    source: IapSource,
    token: &str,
    linked_token: &str,
    parsed: &ParsedPurchase,
) -> Result<Purchase> {
    if source != IapSource::PlayStore {
        return Err(AppError::BadRequest(
            "invalidatePurchase is only valid for PlayStore".to_string(),
        ));
    }

    let old_id = purchase_id(source, Some(linked_token), None)?;
    let new_id = purchase_id(source, Some(token), None)?;

    retry_on_conflict(log_key, || {
        let tx = conn.unchecked_transaction()?;
        let now = now_ms();

        // True first-seen time survives replacement: prefer the superseded
        // row's extra, then an extra already written under the new id.
        let old_extra = get_purchase_extra(&tx, &old_id)?;
        let new_extra = get_purchase_extra(&tx, &new_id)?;
        let create_date = old_extra
            .map(|e| e.create_date)
            .or(new_extra.map(|e| e.create_date))
            .unwrap_or(now);

        tx.execute("DELETE FROM purchases WHERE id = ?1", params![old_id])?;
        tx.execute(
            "DELETE FROM purchase_extras WHERE purchase_id = ?1",
            params![old_id],
        )?;

        let purchase = Purchase {
            source,
            product_id: parsed.product_id,
            order_id: parsed.order_id.clone(),
            token: Some(token.to_string()),
            original_order_id: parsed.original_order_id.clone(),
            status: parsed.status,
            expiry_date: parsed.expiry_date,
            end_date: parsed.end_date,
            update_date: now,
            paddle_user_id: None,
            random_id: None,
            receipt_url: None,
            update_url: None,
            cancel_url: None,
        };
        upsert_purchase_row(&tx, &new_id, &purchase)?;
        tx.execute(
            "INSERT OR REPLACE INTO purchase_extras (purchase_id, create_date) VALUES (?1, ?2)",
            params![new_id, create_date],
        )?;

        tx.execute(
            "INSERT OR IGNORE INTO purchase_users (purchase_id, user_id, update_date) \
             SELECT ?1, user_id, ?2 FROM purchase_users WHERE purchase_id = ?3",
            params![new_id, now, old_id],
        )?;
        tx.execute(
            "DELETE FROM purchase_users WHERE purchase_id = ?1",
            params![old_id],
        )?;

        tx.commit()?;
        Ok(purchase)
    })
}

/// All purchases associated with a user, joined through PurchaseUser in one
/// read-only transaction.
pub fn get_purchases(conn: &Connection, user_id: &str) -> Result<Vec<Purchase>> {
    let cols: String = PURCHASE_COLS
        .split(", ")
        .map(|c| format!("p.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases p \
             JOIN purchase_users pu ON pu.purchase_id = p.id \
             WHERE pu.user_id = ?1",
            cols
        ),
        &[&user_id],
    )
}

pub fn get_updated_purchases(conn: &Connection, since: i64) -> Result<Vec<Purchase>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE update_date > ?1 \
             ORDER BY update_date ASC LIMIT {}",
            PURCHASE_COLS, UPDATED_PAGE_LIMIT
        ),
        &[&since],
    )
}

pub fn get_updated_purchase_users(conn: &Connection, since: i64) -> Result<Vec<PurchaseUser>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchase_users WHERE update_date > ?1 \
             ORDER BY update_date ASC LIMIT {}",
            PURCHASE_USER_COLS, UPDATED_PAGE_LIMIT
        ),
        &[&since],
    )
}

pub fn get_purchase_extras(conn: &Connection, ids: &[String]) -> Result<Vec<PurchaseExtra>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=ids.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM purchase_extras WHERE purchase_id IN ({})",
        PURCHASE_EXTRA_COLS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok(PurchaseExtra {
                purchase_id: row.get(0)?,
                create_date: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_purchase_users(conn: &Connection, id: &str) -> Result<Vec<PurchaseUser>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchase_users WHERE purchase_id = ?1",
            PURCHASE_USER_COLS
        ),
        &[&id],
    )
}

// ============ Logs ============

pub fn save_verify_log(
    conn: &Connection,
    log_key: &str,
    source: IapSource,
    user_id: Option<&str>,
    product_id: ProductId,
    token: Option<&str>,
    payload: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO verify_logs (id, log_key, source, user_id, product_id, token, payload, \
         create_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            gen_id(),
            log_key,
            source.as_str(),
            user_id,
            product_id.as_str(),
            token,
            payload.to_string(),
            now_ms(),
        ],
    )?;
    Ok(())
}

pub fn save_notify_log(
    conn: &Connection,
    log_key: &str,
    source: IapSource,
    token: Option<&str>,
    original_order_id: Option<&str>,
    payload: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO notify_logs (id, log_key, source, token, original_order_id, payload, \
         create_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            gen_id(),
            log_key,
            source.as_str(),
            token,
            original_order_id,
            payload.to_string(),
            now_ms(),
        ],
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn save_acknowledge_log(
    conn: &Connection,
    log_key: &str,
    user_id: Option<&str>,
    product_id: ProductId,
    token: &str,
    acknowledgement_state: Option<i64>,
    payment_state: Option<i64>,
    ack_result: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO acknowledge_logs (id, log_key, user_id, product_id, token, \
         acknowledgement_state, payment_state, ack_result, create_date) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            gen_id(),
            log_key,
            user_id,
            product_id.as_str(),
            token,
            acknowledgement_state,
            payment_state,
            ack_result,
            now_ms(),
        ],
    )?;
    Ok(())
}

// ============ Paddle pre-registration ============

pub fn add_paddle_pre(conn: &Connection, user_id: &str, random_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO paddle_pres (random_id, user_id, create_date) \
         VALUES (?1, ?2, ?3)",
        params![random_id, user_id, now_ms()],
    )?;
    Ok(())
}

pub fn get_paddle_pre_user(conn: &Connection, random_id: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT user_id FROM paddle_pres WHERE random_id = ?1",
        params![random_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

// ============ User data erasure ============

/// App-scoped erasure of a user's logs and purchase associations.
///
/// Purchase rows themselves are only deleted when every associated user is
/// the requester and the product belongs to the requester's app; anything
/// shared, or belonging to another app, is left untouched.
pub fn delete_all(conn: &Connection, log_key: &str, user_id: &str, app_id: AppId) -> Result<()> {
    let app_products: Vec<&'static str> = [ProductId::LumenboardSupporter, ProductId::QuillpadSupporter]
        .iter()
        .filter(|p| p.app_id() == app_id)
        .map(|p| p.as_str())
        .collect();
    if app_products.is_empty() {
        return Ok(());
    }
    let placeholders = (2..2 + app_products.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    retry_on_conflict(log_key, || {
        let tx = conn.unchecked_transaction()?;

        let mut log_params: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        for p in &app_products {
            log_params.push(p);
        }
        tx.execute(
            &format!(
                "DELETE FROM verify_logs WHERE user_id = ?1 AND product_id IN ({})",
                placeholders
            ),
            log_params.as_slice(),
        )?;
        tx.execute(
            &format!(
                "DELETE FROM acknowledge_logs WHERE user_id = ?1 AND product_id IN ({})",
                placeholders
            ),
            log_params.as_slice(),
        )?;

        let purchases = get_purchases(&tx, user_id)?;
        for purchase in purchases {
            if purchase.product_id.app_id() != app_id {
                continue;
            }
            let id = purchase_id(
                purchase.source,
                purchase.token.as_deref(),
                Some(&purchase.original_order_id),
            )?;

            let users = get_purchase_users(&tx, &id)?;
            let only_requester = users.iter().all(|u| u.user_id == user_id);

            tx.execute(
                "DELETE FROM purchase_users WHERE purchase_id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            if only_requester {
                tx.execute("DELETE FROM purchases WHERE id = ?1", params![id])?;
                tx.execute(
                    "DELETE FROM purchase_extras WHERE purchase_id = ?1",
                    params![id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    })
}
