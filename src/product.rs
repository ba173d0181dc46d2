use anyhow::Context;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::params;
use rust_decimal::Decimal;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub company_id: Uuid,
    /// Free-text alternate codes, sanitized to lower-case ASCII alphanumerics
    /// at storage time so search compares like with like.
    pub alt_codes: String,
    pub price: Decimal,
    pub stock: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Product {
    pub fn new(name: String, code: String, company_id: Uuid, alt_codes: String) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name,
            code,
            company_id,
            alt_codes,
            price: Decimal::ZERO,
            stock: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Projection used by the finalize reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductKey {
    pub id: Uuid,
    pub code: String,
    pub company_id: Uuid,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Import identity lookup: (code, company) is the upsert key, not the
    /// storage primary key.
    async fn find_by_key(&self, code: &str, company_id: Uuid) -> anyhow::Result<Option<Product>>;
    async fn create(&self, product: Product) -> anyhow::Result<()>;
    async fn update(&self, product: Product) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<Product>>;
    async fn list_keys(&self) -> anyhow::Result<Vec<ProductKey>>;
    /// Bulk delete by storage id, returns the number of deleted rows.
    async fn remove_many(&self, ids: &[Uuid]) -> anyhow::Result<usize>;
}

pub struct SqliteProductRepository {
    conn: Connection,
}

impl SqliteProductRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            conn.execute(
                "CREATE TABLE IF NOT EXISTS product (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL,
                    company_id BLOB NOT NULL,
                    alt_codes TEXT NOT NULL DEFAULT '',
                    price TEXT NOT NULL,
                    stock INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_product_code_company
                 ON product (code, company_id)",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let price: String = row.get(5)?;
    let price = Decimal::from_str(&price)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, err.into()))?;
    let created_at: i64 = row.get(7)?;
    let updated_at: i64 = row.get(8)?;
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        company_id: row.get(3)?,
        alt_codes: row.get(4)?,
        price,
        stock: row.get(6)?,
        created_at: OffsetDateTime::from_unix_timestamp(created_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        updated_at: OffsetDateTime::from_unix_timestamp(updated_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
    })
}

const PRODUCT_COLUMNS: &str =
    "id, name, code, company_id, alt_codes, price, stock, created_at, updated_at";

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn find_by_key(&self, code: &str, company_id: Uuid) -> anyhow::Result<Option<Product>> {
        let code = code.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM product WHERE code = ?1 AND company_id = ?2"
                ))?;
                let product = stmt
                    .query_map(params![code, company_id], row_to_product)?
                    .next()
                    .transpose()?;
                Ok(product)
            })
            .await
            .context("Unable to find product by code and company")
    }

    async fn create(&self, product: Product) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product
                        (id, name, code, company_id, alt_codes, price, stock, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        product.id,
                        product.name,
                        product.code,
                        product.company_id,
                        product.alt_codes,
                        product.price.to_string(),
                        product.stock,
                        product.created_at.unix_timestamp().max(0),
                        product.updated_at.unix_timestamp().max(0),
                    ],
                )?;
                Ok(())
            })
            .await
            .context("Unable to create product")
    }

    async fn update(&self, product: Product) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                let now = OffsetDateTime::now_utc().unix_timestamp().max(0);
                conn.execute(
                    "UPDATE product
                     SET name = ?2, code = ?3, company_id = ?4, alt_codes = ?5,
                         price = ?6, stock = ?7, updated_at = ?8
                     WHERE id = ?1",
                    params![
                        product.id,
                        product.name,
                        product.code,
                        product.company_id,
                        product.alt_codes,
                        product.price.to_string(),
                        product.stock,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
            .context("Unable to update product")
    }

    async fn list(&self) -> anyhow::Result<Vec<Product>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM product ORDER BY name"
                ))?;
                let products = stmt
                    .query_map([], row_to_product)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(products)
            })
            .await
            .context("Unable to list products")
    }

    async fn list_keys(&self) -> anyhow::Result<Vec<ProductKey>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, code, company_id FROM product")?;
                let keys = stmt
                    .query_map([], |row| {
                        Ok(ProductKey {
                            id: row.get(0)?,
                            code: row.get(1)?,
                            company_id: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await
            .context("Unable to list product keys")
    }

    async fn remove_many(&self, ids: &[Uuid]) -> anyhow::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let chunk_size = 400usize;
        let mut deleted = 0usize;
        for chunk in ids.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let count = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let mut sql = String::from("DELETE FROM product WHERE id IN (");
                    for (idx, _) in chunk.iter().enumerate() {
                        if idx > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                    }
                    sql.push(')');
                    let count = tx.execute(
                        &sql,
                        rusqlite::params_from_iter(chunk.iter()),
                    )?;
                    tx.commit()?;
                    Ok(count)
                })
                .await
                .context("Unable to bulk remove products")?;
            deleted += count;
            tokio::task::yield_now().await;
        }
        Ok(deleted)
    }
}
