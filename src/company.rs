use anyhow::Context;
use async_trait::async_trait;
use rusqlite::params;
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    /// Resolves a company by exact trimmed name, creating it on first use.
    async fn get_or_create(&self, name: &str) -> anyhow::Result<Company>;
    async fn list(&self) -> anyhow::Result<Vec<Company>>;
}

pub struct SqliteCompanyRepository {
    conn: Connection,
}

impl SqliteCompanyRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            let _ = conn.pragma_update(None, "journal_mode", &"WAL");
            let _ = conn.pragma_update(None, "synchronous", &"NORMAL");
            let _ = conn.pragma_update(None, "busy_timeout", &5000i64);
            conn.execute(
                "CREATE TABLE IF NOT EXISTS company (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )",
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CompanyRepository for SqliteCompanyRepository {
    async fn get_or_create(&self, name: &str) -> anyhow::Result<Company> {
        let name = name.trim().to_string();
        self.conn
            .call(move |conn| {
                let existing = conn
                    .prepare("SELECT id, name FROM company WHERE name = ?1")?
                    .query_map(params![name], |row| {
                        Ok(Company {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .next()
                    .transpose()?;
                if let Some(company) = existing {
                    return Ok(company);
                }
                let company = Company {
                    id: Uuid::new_v4(),
                    name,
                };
                conn.execute(
                    "INSERT INTO company (id, name) VALUES (?1, ?2)",
                    params![company.id, company.name],
                )?;
                Ok(company)
            })
            .await
            .context("Unable to get or create company")
    }

    async fn list(&self) -> anyhow::Result<Vec<Company>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM company ORDER BY name")?;
                let companies = stmt
                    .query_map([], |row| {
                        Ok(Company {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(companies)
            })
            .await
            .context("Unable to list companies")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_reuses_existing_name() -> anyhow::Result<()> {
        let repo = SqliteCompanyRepository::init(Connection::open_in_memory().await?).await?;

        let first = repo.get_or_create("  Bosch ").await?;
        let second = repo.get_or_create("Bosch").await?;
        assert_eq!(first, second);
        assert_eq!(first.name, "Bosch");

        let other = repo.get_or_create("Sachs").await?;
        assert_ne!(first.id, other.id);
        assert_eq!(repo.list().await?.len(), 2);
        Ok(())
    }
}
