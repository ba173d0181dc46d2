use crate::control::{ApiError, Response};
use anyhow::Context;
use async_trait::async_trait;
use actix_web::web::{Data, Form, Path};
use actix_web::{get, post, HttpResponse};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_rusqlite::Connection;
use uuid::Uuid;

/// Banner shown on the browse surface. Only the URL is stored; serving the
/// image itself is somebody else's problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Advertisement {
    pub id: Uuid,
    pub name: String,
    pub image_url: String,
}

#[async_trait]
pub trait AdvertisementRepository: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Advertisement>>;
    async fn save(&self, advertisement: Advertisement) -> anyhow::Result<()>;
    async fn remove(&self, id: Uuid) -> anyhow::Result<()>;
}

pub struct SqliteAdvertisementRepository {
    conn: Connection,
}

impl SqliteAdvertisementRepository {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS advertisement (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    image_url TEXT NOT NULL
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
impl AdvertisementRepository for SqliteAdvertisementRepository {
    async fn list(&self) -> anyhow::Result<Vec<Advertisement>> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, image_url FROM advertisement ORDER BY name")?;
                let ads = stmt
                    .query_map([], |row| {
                        Ok(Advertisement {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            image_url: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ads)
            })
            .await
            .context("Unable to list advertisements")
    }

    async fn save(&self, advertisement: Advertisement) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO advertisement (id, name, image_url) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = ?2, image_url = ?3",
                    params![advertisement.id, advertisement.name, advertisement.image_url],
                )?;
                Ok(())
            })
            .await
            .context("Unable to save advertisement")
    }

    async fn remove(&self, id: Uuid) -> anyhow::Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM advertisement WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await
            .context("Unable to remove advertisement")
    }
}

#[get("/api/advertisements")]
pub async fn list(repo: Data<Arc<dyn AdvertisementRepository>>) -> Response {
    let results = repo.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct AdvertisementDto {
    pub name: String,
    pub image_url: String,
}

#[post("/api/advertisements")]
pub async fn create(
    repo: Data<Arc<dyn AdvertisementRepository>>,
    form: Form<AdvertisementDto>,
) -> Response {
    let AdvertisementDto { name, image_url } = form.into_inner();
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("Reklamın adı boşdur"));
    }
    let advertisement = Advertisement {
        id: Uuid::new_v4(),
        name,
        image_url,
    };
    repo.save(advertisement.clone()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "id": advertisement.id,
    })))
}

#[post("/api/advertisements/{id}/delete")]
pub async fn delete(repo: Data<Arc<dyn AdvertisementRepository>>, path: Path<Uuid>) -> Response {
    let id = path.into_inner();
    repo.remove(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}
