use rusqlite::Connection;

/// Initialize the database schema. All date columns are epoch milliseconds.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Purchases: one row per (vendor, identity key).
        -- id = purchase id derived in queries::purchase_id; the sole stable
        -- join key across writes.
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL CHECK (source IN ('AppStore', 'PlayStore', 'Paddle', 'Manual')),
            product_id TEXT NOT NULL,
            order_id TEXT NOT NULL,
            token TEXT,
            original_order_id TEXT NOT NULL,
            status TEXT NOT NULL,
            expiry_date INTEGER NOT NULL,
            end_date INTEGER NOT NULL,
            update_date INTEGER NOT NULL,

            -- Paddle-only extras
            paddle_user_id TEXT,
            random_id TEXT,
            receipt_url TEXT,
            update_url TEXT,
            cancel_url TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_update ON purchases(update_date);

        -- Purchase <-> user associations (shared household, re-installs)
        CREATE TABLE IF NOT EXISTS purchase_users (
            purchase_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            update_date INTEGER NOT NULL,
            PRIMARY KEY (purchase_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_purchase_users_user ON purchase_users(user_id);
        CREATE INDEX IF NOT EXISTS idx_purchase_users_update ON purchase_users(update_date);

        -- First-seen times; written once per purchase id, carried forward
        -- across purchase replacement, never regenerated.
        CREATE TABLE IF NOT EXISTS purchase_extras (
            purchase_id TEXT PRIMARY KEY,
            create_date INTEGER NOT NULL
        );

        -- Raw vendor verification responses, for offline investigation
        CREATE TABLE IF NOT EXISTS verify_logs (
            id TEXT PRIMARY KEY,
            log_key TEXT NOT NULL,
            source TEXT NOT NULL,
            user_id TEXT,
            product_id TEXT NOT NULL,
            token TEXT,
            payload TEXT NOT NULL,
            create_date INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_verify_logs_user ON verify_logs(user_id);

        -- Raw vendor server notifications
        CREATE TABLE IF NOT EXISTS notify_logs (
            id TEXT PRIMARY KEY,
            log_key TEXT NOT NULL,
            source TEXT NOT NULL,
            token TEXT,
            original_order_id TEXT,
            payload TEXT NOT NULL,
            create_date INTEGER NOT NULL
        );

        -- Play Store acknowledgement attempts
        CREATE TABLE IF NOT EXISTS acknowledge_logs (
            id TEXT PRIMARY KEY,
            log_key TEXT NOT NULL,
            user_id TEXT,
            product_id TEXT NOT NULL,
            token TEXT NOT NULL,
            acknowledgement_state INTEGER,
            payment_state INTEGER,
            ack_result TEXT NOT NULL,
            create_date INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_acknowledge_logs_user ON acknowledge_logs(user_id);

        -- Pre-registered correlation ids: lets a Paddle purchase discovered
        -- only by webhook find its user through the checkout passthrough.
        CREATE TABLE IF NOT EXISTS paddle_pres (
            random_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            create_date INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
