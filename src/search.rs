use crate::company::CompanyRepository;
use crate::control::Response;
use crate::normalize::{clean_code, collapse_whitespace, expand_letter_variants};
use crate::product::{Product, ProductRepository};
use actix_web::web::{Data, Query};
use actix_web::{get, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Product joined with its company name, the unit the filter works on.
#[derive(Clone, Debug)]
pub struct CatalogRow {
    pub product: Product,
    pub company_name: String,
}

/// Fuzzy catalog filter. Four OR-ed strategies: sanitized alternate-code
/// substring, sanitized code substring, per-word letter-variant match over
/// name/company, and the same word test over the joined text blob. Words
/// combine with AND, variants and fields with OR.
pub fn filter_products(rows: Vec<CatalogRow>, query: &str) -> Vec<CatalogRow> {
    let processed = collapse_whitespace(query);
    if processed.is_empty() {
        return rows;
    }
    let clean_search = clean_code(query);
    let word_variants: Vec<HashSet<String>> = processed
        .split(' ')
        .map(|word| {
            expand_letter_variants(word)
                .into_iter()
                .map(|v| v.to_lowercase())
                .collect()
        })
        .collect();

    rows.into_iter()
        .filter(|row| matches_query(row, &clean_search, &word_variants))
        .collect()
}

fn matches_query(
    row: &CatalogRow,
    clean_search: &str,
    word_variants: &[HashSet<String>],
) -> bool {
    if !clean_search.is_empty() {
        // alt_codes is sanitized at storage time, compare directly.
        if row.product.alt_codes.contains(clean_search) {
            return true;
        }
        if clean_code(&row.product.code).contains(clean_search) {
            return true;
        }
    }

    let contains_any = |haystack: &str, variants: &HashSet<String>| {
        variants.iter().any(|v| haystack.contains(v.as_str()))
    };

    let name = row.product.name.to_lowercase();
    let company = row.company_name.to_lowercase();
    if word_variants
        .iter()
        .all(|variants| contains_any(&name, variants) || contains_any(&company, variants))
    {
        return true;
    }

    // Belt and suspenders for words straddling the name/company boundary.
    let blob = format!(
        "{} {} {} {}",
        row.product.name, row.product.code, row.company_name, row.product.alt_codes
    )
    .to_lowercase();
    word_variants
        .iter()
        .all(|variants| contains_any(&blob, variants))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProductDto {
    adi: String,
    firma: String,
    kod: String,
    qiymet: String,
    stok: i64,
}

/// Catalog browse endpoint; `q` narrows the listing with [`filter_products`].
#[get("/api/products")]
pub async fn list_products(
    products: Data<Arc<dyn ProductRepository>>,
    companies: Data<Arc<dyn CompanyRepository>>,
    params: Query<SearchParams>,
) -> Response {
    let company_names: HashMap<Uuid, String> = companies
        .list()
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let rows: Vec<CatalogRow> = products
        .list()
        .await?
        .into_iter()
        .map(|product| CatalogRow {
            company_name: company_names
                .get(&product.company_id)
                .cloned()
                .unwrap_or_default(),
            product,
        })
        .collect();

    let rows = match params.q.as_deref() {
        Some(q) => filter_products(rows, q),
        None => rows,
    };

    let results: Vec<ProductDto> = rows
        .into_iter()
        .map(|row| ProductDto {
            adi: row.product.name,
            firma: row.company_name,
            kod: row.product.code,
            qiymet: row.product.price.to_string(),
            stok: row.product.stock,
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({ "results": results })))
}
