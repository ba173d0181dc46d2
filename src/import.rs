use crate::company::CompanyRepository;
use crate::control::{ApiError, Response};
use crate::import_job::{ImportJob, ImportJobStore, RowError};
use crate::normalize::{clean_code, collapse_whitespace};
use crate::product::{Product, ProductRepository};
use crate::sheet::{self, NumberError, RawRow};
use actix_multipart::form::{tempfile::TempFile, MultipartForm};
use actix_web::web::{Data, Form};
use actix_web::{post, HttpResponse};
use log_error::LogError;
use std::sync::Arc;
use uuid::Uuid;

const NAME_COL: &str = "adi";
const CODE_COL: &str = "kod";
const COMPANY_COL: &str = "firma";
const PRICE_COL: &str = "qiymet";
const STOCK_COL: &str = "stok";
const ALT_CODES_COL: &str = "kodlar";

const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(MultipartForm, Debug)]
pub struct ImportInitForm {
    excel_file: Option<TempFile>,
}

/// Accepts the uploaded price sheet, decodes it once and creates the durable
/// job record. Batch calls do the actual row work afterwards.
#[post("/import/init")]
pub async fn init(store: Data<ImportJobStore>, form: MultipartForm<ImportInitForm>) -> Response {
    let excel_file = form
        .into_inner()
        .excel_file
        .ok_or_else(|| ApiError::validation("Excel faylı seçin."))?;
    let file_name = excel_file.file_name.clone().unwrap_or_default();
    if !file_name.ends_with(".xlsx") {
        return Err(ApiError::validation("Yalnız .xlsx faylı qəbul edilir."));
    }

    let job_id = Uuid::new_v4();
    store.save_upload(job_id, excel_file.file.path()).await?;
    let sheet = match sheet::read_sheet(&store.upload_path(job_id)) {
        Ok(sheet) => sheet,
        Err(err) => {
            store
                .remove_upload(job_id)
                .await
                .log_error("Unable to clean up upload after parse failure");
            return Err(ApiError::parse(format!("Excel oxunmadı: {err}")));
        }
    };

    let job = ImportJob::new(sheet);
    let total_rows = job.total_rows;
    store.save(job_id, &job).await?;
    log::info!("Import job {job_id} created with {total_rows} rows");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "job_id": job_id,
        "total_rows": total_rows,
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct BatchParams {
    job_id: String,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

/// Processes rows `[start, start + size)` of an existing job and persists the
/// updated aggregate in one write. The caller drives ranges sequentially and
/// requests each range exactly once.
#[post("/import/batch")]
pub async fn batch(
    store: Data<ImportJobStore>,
    companies: Data<Arc<dyn CompanyRepository>>,
    products: Data<Arc<dyn ProductRepository>>,
    params: Form<BatchParams>,
) -> Response {
    let BatchParams {
        job_id,
        start,
        size,
    } = params.into_inner();
    let start = parse_count(start.as_deref(), 0)?;
    let size = parse_count(size.as_deref(), DEFAULT_BATCH_SIZE)?;
    let job_id = parse_job_id(&job_id)?;

    let mut job = store
        .load(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job tapılmadı."))?;

    let batch_errors = match process_batch(
        &mut job,
        start,
        size,
        companies.get_ref().as_ref(),
        products.get_ref().as_ref(),
    )
    .await?
    {
        Some(batch_errors) => batch_errors,
        // Nothing left to process: report current totals, touch nothing.
        None => {
            return Ok(HttpResponse::Ok().json(serde_json::json!({
                "status": "ok",
                "message": "Heç nə yoxdur",
                "processed_rows": job.processed_rows,
                "new_count": job.new_count,
                "update_count": job.update_count,
                "error_count": job.error_count,
            })))
        }
    };

    store.save(job_id, &job).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "processed_rows": job.processed_rows,
        "total_rows": job.total_rows,
        "new_count": job.new_count,
        "update_count": job.update_count,
        "error_count": job.error_count,
        "errors": batch_errors,
        "columns": job.columns_display,
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct FinalizeParams {
    job_id: String,
}

/// Reconciliation pass: deletes every catalog product whose (code, company)
/// key never appeared in the sheet, then tears the job down.
#[post("/import/finalize")]
pub async fn finalize(
    store: Data<ImportJobStore>,
    products: Data<Arc<dyn ProductRepository>>,
    params: Form<FinalizeParams>,
) -> Response {
    let job_id = parse_job_id(&params.job_id)?;
    let job = store
        .load(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job tapılmadı."))?;

    let deleted_count = reconcile(&job, products.get_ref().as_ref()).await?;

    store
        .remove_upload(job_id)
        .await
        .log_error("Unable to remove uploaded file");
    store
        .remove(job_id)
        .await
        .log_error("Unable to remove job state");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "deleted_count": deleted_count,
        "total_errors": job.error_details.len(),
        "error_details": job.error_details,
        "columns": job.columns_display,
    })))
}

fn parse_count(value: Option<&str>, default: usize) -> Result<usize, ApiError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::validation("start/size yanlışdır.")),
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found("Job tapılmadı."))
}

enum RowOutcome {
    Created((String, Uuid)),
    Updated((String, Uuid)),
    Invalid(Vec<RowError>),
}

/// Runs one batch against the job aggregate. Returns `None` when the slice is
/// empty (start beyond the sheet) so the caller can skip persisting; otherwise
/// the batch's own error list. Counters, the accumulated key set and the error
/// log are mutated in place.
pub async fn process_batch(
    job: &mut ImportJob,
    start: usize,
    size: usize,
    companies: &dyn CompanyRepository,
    products: &dyn ProductRepository,
) -> Result<Option<Vec<RowError>>, anyhow::Error> {
    let end = start.saturating_add(size).min(job.rows.len());
    if start >= end {
        return Ok(None);
    }
    let slice: Vec<RawRow> = job.rows[start..end].to_vec();

    let mut batch_errors = Vec::new();
    for (offset, row) in slice.iter().enumerate() {
        let line = start + offset + 2; // header is sheet line 1
        match process_row(row, line, companies, products).await {
            Ok(RowOutcome::Created(key)) => {
                job.new_count += 1;
                job.excel_product_keys.insert(key);
            }
            Ok(RowOutcome::Updated(key)) => {
                job.update_count += 1;
                job.excel_product_keys.insert(key);
            }
            Ok(RowOutcome::Invalid(errors)) => {
                job.error_count += errors.len();
                batch_errors.extend(errors);
            }
            // Store failures skip the row but never abort the batch.
            Err(err) => {
                job.error_count += 1;
                batch_errors.push(RowError {
                    line,
                    message: format!("{err:#}"),
                    field: None,
                    row: row.snapshot(),
                });
            }
        }
    }

    job.processed_rows = job.total_rows.min(start + slice.len());
    job.error_details.extend(batch_errors.iter().cloned());
    Ok(Some(batch_errors))
}

async fn process_row(
    row: &RawRow,
    line: usize,
    companies: &dyn CompanyRepository,
    products: &dyn ProductRepository,
) -> Result<RowOutcome, anyhow::Error> {
    let snapshot = row.snapshot();
    let field_error = |field: &str, message: &str| RowError {
        line,
        message: message.to_string(),
        field: Some(field.to_string()),
        row: snapshot.clone(),
    };

    let mut errors = Vec::new();
    if row.field(NAME_COL).is_blank() {
        errors.push(field_error(NAME_COL, "Məhsulun adı boşdur"));
    }
    if row.field(CODE_COL).is_blank() {
        errors.push(field_error(CODE_COL, "Kod boşdur"));
    }
    if row.field(COMPANY_COL).is_blank() {
        errors.push(field_error(COMPANY_COL, "Firma boşdur"));
    }

    let price = match row.field(PRICE_COL).parse_price() {
        Ok(price) => Some(price),
        Err(NumberError::Blank) => {
            errors.push(field_error(PRICE_COL, "qiymet boşdur"));
            None
        }
        Err(NumberError::Invalid) => {
            errors.push(field_error(PRICE_COL, "qiymet rəqəm olmalıdır"));
            None
        }
    };
    let stock = match row.field(STOCK_COL).parse_stock() {
        Ok(stock) => Some(stock),
        Err(NumberError::Blank) => {
            errors.push(field_error(STOCK_COL, "stok boşdur"));
            None
        }
        Err(NumberError::Invalid) => {
            errors.push(field_error(STOCK_COL, "stok tam ədəd olmalıdır"));
            None
        }
    };

    if !errors.is_empty() {
        return Ok(RowOutcome::Invalid(errors));
    }

    let name = collapse_whitespace(&row.field(NAME_COL).display());
    let code = row.field(CODE_COL).display().trim().to_string();
    let company_name = row.field(COMPANY_COL).display().trim().to_string();
    let company = companies.get_or_create(&company_name).await?;
    let key = (code.clone(), company.id);

    let alt_codes_cell = row.field(ALT_CODES_COL);
    let alt_codes = (!alt_codes_cell.is_blank()).then(|| clean_code(&alt_codes_cell.display()));

    match products.find_by_key(&code, company.id).await? {
        Some(mut product) => {
            product.name = name;
            product.price = price.unwrap_or_default();
            product.stock = stock.unwrap_or_default();
            if let Some(alt_codes) = alt_codes {
                product.alt_codes = alt_codes;
            }
            products.update(product).await?;
            Ok(RowOutcome::Updated(key))
        }
        None => {
            let mut product = Product::new(name, code, company.id, alt_codes.unwrap_or_default());
            product.price = price.unwrap_or_default();
            product.stock = stock.unwrap_or_default();
            products.create(product).await?;
            Ok(RowOutcome::Created(key))
        }
    }
}

/// Deletion-candidate pass over the whole catalog. An empty accumulated key
/// set deletes nothing, guarding degenerate jobs from wiping the store.
pub async fn reconcile(
    job: &ImportJob,
    products: &dyn ProductRepository,
) -> Result<usize, anyhow::Error> {
    if job.excel_product_keys.is_empty() {
        return Ok(0);
    }
    let keys = products.list_keys().await?;
    let to_delete: Vec<Uuid> = keys
        .iter()
        .filter(|key| {
            !job.excel_product_keys
                .contains(&(key.code.clone(), key.company_id))
        })
        .map(|key| key.id)
        .collect();
    if to_delete.is_empty() {
        return Ok(0);
    }
    // Scope is the entire catalog, not just the imported companies. A sheet
    // covering one supplier will delete everyone else's products.
    log::warn!(
        "Reconciliation deletes {} catalog products absent from the imported sheet",
        to_delete.len()
    );
    products.remove_many(&to_delete).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::company::SqliteCompanyRepository;
    use crate::product::SqliteProductRepository;
    use crate::sheet::{CellValue, SheetData};
    use rust_decimal_macros::dec;
    use tokio_rusqlite::Connection;

    async fn repos() -> anyhow::Result<(SqliteCompanyRepository, SqliteProductRepository)> {
        let companies = SqliteCompanyRepository::init(Connection::open_in_memory().await?).await?;
        let products = SqliteProductRepository::init(Connection::open_in_memory().await?).await?;
        Ok((companies, products))
    }

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn full_row(name: &str, code: &str, company: &str, price: &str, stock: &str) -> RawRow {
        RawRow::new(vec![
            (NAME_COL.to_string(), text(name)),
            (CODE_COL.to_string(), text(code)),
            (COMPANY_COL.to_string(), text(company)),
            (PRICE_COL.to_string(), text(price)),
            (STOCK_COL.to_string(), text(stock)),
        ])
    }

    fn job_with(rows: Vec<RawRow>) -> ImportJob {
        ImportJob::new(SheetData {
            columns_display: vec![
                "Adi".to_string(),
                "Kod".to_string(),
                "Firma".to_string(),
                "Qiymet".to_string(),
                "Stok".to_string(),
            ],
            rows,
        })
    }

    #[tokio::test]
    async fn distinct_valid_rows_all_create() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![
            full_row("Ön şüşə", "A-1", "Bosch", "19,5", "3"),
            full_row("Yağ  filtri", "A-2", "Bosch", "4", "10"),
            full_row("Əyləc bəndi", "A-1", "Sachs", "30", "5.0"),
        ]);

        let errors = process_batch(&mut job, 0, 100, &companies, &products)
            .await?
            .expect("slice is not empty");
        assert!(errors.is_empty());
        assert_eq!(job.new_count, 3);
        assert_eq!(job.update_count, 0);
        assert_eq!(job.error_count, 0);
        assert_eq!(job.processed_rows, 3);
        assert_eq!(job.excel_product_keys.len(), 3);

        let bosch = companies.get_or_create("Bosch").await?;
        let p = products
            .find_by_key("A-1", bosch.id)
            .await?
            .expect("created");
        assert_eq!(p.name, "Ön şüşə");
        assert_eq!(p.price, dec!(19.5));
        assert_eq!(p.stock, 3);
        // Internal whitespace collapsed at upsert time.
        let p2 = products
            .find_by_key("A-2", bosch.id)
            .await?
            .expect("created");
        assert_eq!(p2.name, "Yağ filtri");
        Ok(())
    }

    #[tokio::test]
    async fn reimport_updates_instead_of_duplicating() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![full_row("Ön şüşə", "A-1", "Bosch", "19,5", "3")]);
        process_batch(&mut job, 0, 100, &companies, &products).await?;

        let mut second = job_with(vec![full_row("Ön şüşə", "A-1", "Bosch", "25", "4")]);
        process_batch(&mut second, 0, 100, &companies, &products).await?;

        assert_eq!(second.new_count, 0);
        assert_eq!(second.update_count, 1);
        let bosch = companies.get_or_create("Bosch").await?;
        let all = products.list().await?;
        assert_eq!(all.len(), 1);
        let p = products
            .find_by_key("A-1", bosch.id)
            .await?
            .expect("still there");
        assert_eq!(p.price, dec!(25));
        assert_eq!(p.stock, 4);
        Ok(())
    }

    #[tokio::test]
    async fn each_missing_field_counts_separately() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![RawRow::new(vec![
            (PRICE_COL.to_string(), text("5")),
            (STOCK_COL.to_string(), text("1")),
        ])]);

        let errors = process_batch(&mut job, 0, 100, &companies, &products)
            .await?
            .expect("slice is not empty");
        assert_eq!(job.error_count, 3);
        assert_eq!(errors.len(), 3);
        let fields: Vec<_> = errors.iter().filter_map(|e| e.field.as_deref()).collect();
        assert_eq!(fields, vec![NAME_COL, CODE_COL, COMPANY_COL]);
        assert!(errors.iter().all(|e| e.line == 2));
        assert_eq!(job.new_count, 0);
        assert!(job.excel_product_keys.is_empty());
        assert!(products.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn bad_numbers_are_rejected_with_messages() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![full_row("Ad", "K", "F", "baha", "")]);

        let errors = process_batch(&mut job, 0, 100, &companies, &products)
            .await?
            .expect("slice is not empty");
        assert_eq!(job.error_count, 2);
        assert_eq!(errors[0].message, "qiymet rəqəm olmalıdır");
        assert_eq!(errors[1].message, "stok boşdur");
        assert_eq!(errors[0].row.get(NAME_COL).map(String::as_str), Some("Ad"));
        Ok(())
    }

    #[tokio::test]
    async fn zero_price_and_stock_are_valid() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![full_row("Ad", "K", "F", "0", "0")]);

        process_batch(&mut job, 0, 100, &companies, &products).await?;
        assert_eq!(job.error_count, 0);
        assert_eq!(job.new_count, 1);
        let company = companies.get_or_create("F").await?;
        let p = products.find_by_key("K", company.id).await?.expect("created");
        assert_eq!(p.price, dec!(0));
        assert_eq!(p.stock, 0);
        Ok(())
    }

    #[tokio::test]
    async fn alt_codes_stored_sanitized_and_kept_when_blank() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let row = RawRow::new(vec![
            (NAME_COL.to_string(), text("Ad")),
            (CODE_COL.to_string(), text("K")),
            (COMPANY_COL.to_string(), text("F")),
            (PRICE_COL.to_string(), text("1")),
            (STOCK_COL.to_string(), text("1")),
            (ALT_CODES_COL.to_string(), text("AB-12, CD 34")),
        ]);
        let mut job = job_with(vec![row]);
        process_batch(&mut job, 0, 100, &companies, &products).await?;

        let company = companies.get_or_create("F").await?;
        let p = products.find_by_key("K", company.id).await?.expect("created");
        assert_eq!(p.alt_codes, "ab12cd34");

        // A later sheet without the column leaves the stored value alone.
        let mut second = job_with(vec![full_row("Ad", "K", "F", "2", "2")]);
        process_batch(&mut second, 0, 100, &companies, &products).await?;
        let p = products.find_by_key("K", company.id).await?.expect("updated");
        assert_eq!(p.alt_codes, "ab12cd34");
        assert_eq!(p.price, dec!(2));
        Ok(())
    }

    #[tokio::test]
    async fn start_beyond_end_is_a_noop() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![full_row("Ad", "K", "F", "1", "1")]);
        process_batch(&mut job, 0, 100, &companies, &products).await?;
        let before = (job.processed_rows, job.new_count, job.error_count);

        let total_rows = job.total_rows;
        let outcome = process_batch(&mut job, total_rows, 100, &companies, &products).await?;
        assert!(outcome.is_none());
        assert_eq!(
            before,
            (job.processed_rows, job.new_count, job.error_count)
        );
        Ok(())
    }

    #[tokio::test]
    async fn oversized_batch_processes_only_remaining_rows() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let mut job = job_with(vec![
            full_row("A", "1", "F", "1", "1"),
            full_row("B", "2", "F", "1", "1"),
            full_row("C", "3", "F", "1", "1"),
        ]);

        process_batch(&mut job, 2, 100, &companies, &products).await?;
        assert_eq!(job.processed_rows, 3);
        assert_eq!(job.new_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn finalize_with_empty_key_set_deletes_nothing() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let company = companies.get_or_create("F").await?;
        products
            .create(Product::new(
                "A".to_string(),
                "1".to_string(),
                company.id,
                String::new(),
            ))
            .await?;

        let job = job_with(vec![]);
        assert_eq!(reconcile(&job, &products).await?, 0);
        assert_eq!(products.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn finalize_deletes_only_unseen_keys() -> anyhow::Result<()> {
        let (companies, products) = repos().await?;
        let company = companies.get_or_create("F").await?;
        products
            .create(Product::new(
                "A".to_string(),
                "A".to_string(),
                company.id,
                String::new(),
            ))
            .await?;
        products
            .create(Product::new(
                "B".to_string(),
                "B".to_string(),
                company.id,
                String::new(),
            ))
            .await?;

        let mut job = job_with(vec![]);
        job.excel_product_keys.insert(("A".to_string(), company.id));

        assert_eq!(reconcile(&job, &products).await?, 1);
        let keys = products.list_keys().await?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].code, "A");
        Ok(())
    }

    #[test]
    fn count_params_reject_garbage() {
        assert_eq!(parse_count(None, 7).ok(), Some(7));
        assert_eq!(parse_count(Some("12"), 0).ok(), Some(12));
        assert!(parse_count(Some("-1"), 0).is_err());
        assert!(parse_count(Some("abc"), 0).is_err());
        assert!(parse_count(Some(""), 0).is_err());
    }

    #[test]
    fn bad_job_ids_map_to_not_found() {
        assert!(matches!(
            parse_job_id("not-a-uuid"),
            Err(ApiError::NotFound { .. })
        ));
    }
}
