use actix_multipart::form::MultipartFormConfig;
use actix_web::web::{Data, FormConfig};
use actix_web::{App, HttpServer};
use anyhow::Context as AnyhowContext;
use avto_catalog::advertisement::{self, AdvertisementRepository, SqliteAdvertisementRepository};
use avto_catalog::company::{CompanyRepository, SqliteCompanyRepository};
use avto_catalog::import;
use avto_catalog::import_job::ImportJobStore;
use avto_catalog::product::{ProductRepository, SqliteProductRepository};
use avto_catalog::search;
use std::env;
use std::sync::Arc;
use tokio_rusqlite::Connection;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let storage_dir = envmnt::get_or("STORAGE_DIR", "storage");
    std::fs::create_dir_all(&storage_dir)
        .with_context(|| format!("Unable to create storage dir {storage_dir}"))?;
    let db_path = format!("{storage_dir}/catalog.db");

    // Each repository needs its own connection due to ownership requirements;
    // WAL mode keeps multiple connections to the same file safe.
    let conn = Connection::open(&db_path).await?;
    let company_repository: Arc<dyn CompanyRepository> =
        Arc::new(SqliteCompanyRepository::init(conn).await?);
    let conn = Connection::open(&db_path).await?;
    let product_repository: Arc<dyn ProductRepository> =
        Arc::new(SqliteProductRepository::init(conn).await?);
    let conn = Connection::open(&db_path).await?;
    let advertisement_repository: Arc<dyn AdvertisementRepository> =
        Arc::new(SqliteAdvertisementRepository::init(conn).await?);

    let import_store = ImportJobStore::new(envmnt::get_or("IMPORTS_DIR", "imports"));

    HttpServer::new(move || {
        App::new()
            .app_data(FormConfig::default().limit(256 * 1024))
            .app_data(MultipartFormConfig::default().total_limit(20 * 1024 * 1024))
            .app_data(Data::new(company_repository.clone()))
            .app_data(Data::new(product_repository.clone()))
            .app_data(Data::new(advertisement_repository.clone()))
            .app_data(Data::new(import_store.clone()))
            .service(import::init)
            .service(import::batch)
            .service(import::finalize)
            .service(search::list_products)
            .service(advertisement::list)
            .service(advertisement::create)
            .service(advertisement::delete)
    })
    .bind(("0.0.0.0", 8080))
    .context("Failed to bind server to 0.0.0.0:8080. Is the port already in use?")?
    .run()
    .await?;
    Ok(())
}
