//! Listing endpoint codec: request payloads and response classification.

use serde_json::{Value, json};

use lawledger_shared::{Category, DocumentRecord, Provenance};

/// What a listing request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingScope {
    /// The unfiltered, all-categories listing used by discovery.
    All,
    /// One category, filtered by its subtype codes.
    Category(Category),
}

/// One decoded listing page.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<DocumentRecord>,
    /// Total item count reported by the remote.
    pub total: u64,
}

/// Classification of a raw listing response body.
#[derive(Debug)]
pub enum ListingResponse {
    Page(ListingPage),
    /// Script-obfuscated challenge page instead of JSON.
    AntiBot,
    /// Some other HTML page (error, maintenance).
    HtmlError,
    /// Empty body, invalid JSON, or JSON without a known shape.
    Malformed(String),
}

/// Build the JSON body for a listing request.
pub fn listing_payload(scope: ListingScope, page: u32, page_size: u32) -> Value {
    let (search_range, search_type, codes): (u8, u8, &[u32]) = match scope {
        ListingScope::All => (0, 1, &[] as &[u32]),
        ListingScope::Category(category) => (1, 2, category.subtype_codes()),
    };
    json!({
        "searchRange": search_range,
        "sxrq": [],
        "gbrq": [],
        "searchType": search_type,
        "sxx": [],
        "gbrqYear": [],
        "flfgCodeId": codes,
        "zdjgCodeId": [],
        "searchContent": "",
        "orderByParam": { "order": "-1", "sort": "" },
        "pageNum": page,
        "pageSize": page_size,
    })
}

/// Number of pages needed for `total` items.
pub fn page_count(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size)) as u32
}

/// Whether a body is an HTML page rather than an API answer.
pub fn is_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(16).collect::<String>().to_lowercase();
    ["<html", "<!doctype", "<noscript"]
        .iter()
        .any(|prefix| head.starts_with(prefix))
}

/// HTML whose inline script is the obfuscated anti-automation challenge.
pub fn is_challenge(body: &str) -> bool {
    is_html(body) && body.contains("function(")
}

/// Classify and decode a listing response body.
pub fn classify_listing(body: &str) -> ListingResponse {
    if body.trim().is_empty() {
        return ListingResponse::Malformed("empty response".into());
    }
    if is_html(body) {
        return if is_challenge(body) {
            ListingResponse::AntiBot
        } else {
            ListingResponse::HtmlError
        };
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return ListingResponse::Malformed(format!("invalid JSON: {e}")),
    };

    if let Some(result) = value.get("result").filter(|r| r.is_object()) {
        let items = result
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(record_from_data).collect())
            .unwrap_or_default();
        let total = number(result, &["totalSizes", "total"]).unwrap_or(0).max(0) as u64;
        return ListingResponse::Page(ListingPage { items, total });
    }

    if let Some(rows) = value.get("rows").and_then(Value::as_array) {
        let items = rows.iter().map(record_from_rows).collect();
        let total = number(&value, &["total", "totalSizes"]).unwrap_or(0).max(0) as u64;
        return ListingResponse::Page(ListingPage { items, total });
    }

    ListingResponse::Malformed("response has neither result.data nor rows".into())
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

/// First non-empty string (or number rendered as string) among `keys`.
fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First integer (or integer-looking string) among `keys`.
fn number(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `result.data[]` item. The primary key is `bbbs` when present, else `id`;
/// rows without either keep an empty id for the caller to reject.
fn record_from_data(row: &Value) -> DocumentRecord {
    let bbbs = text(row, &["bbbs"]);
    let id = bbbs.clone().or_else(|| text(row, &["id"])).unwrap_or_default();
    DocumentRecord {
        id,
        title: text(row, &["title"]).unwrap_or_default(),
        url: text(row, &["url"]),
        office: text(row, &["office", "zdjgName"]),
        doc_type: text(row, &["type", "flxz"]),
        subtype: number(row, &["flfgCodeId"]).and_then(|v| u32::try_from(v).ok()),
        status: number(row, &["status", "sxx"]),
        publish: text(row, &["publish", "gbrq"]),
        expiry: text(row, &["expiry", "sxrq"]),
        alt_id: bbbs,
        provenance: Provenance::Old,
        ..Default::default()
    }
}

/// `rows[]` item from the newer API, keyed by `bbbs`.
fn record_from_rows(row: &Value) -> DocumentRecord {
    let bbbs = text(row, &["bbbs"]);
    let id = bbbs.clone().or_else(|| text(row, &["id"])).unwrap_or_default();
    DocumentRecord {
        id,
        title: text(row, &["title"]).unwrap_or_default(),
        url: text(row, &["url"]),
        office: text(row, &["zdjgName", "office"]),
        doc_type: text(row, &["flxz", "type"]),
        subtype: number(row, &["flfgCodeId"]).and_then(|v| u32::try_from(v).ok()),
        status: number(row, &["sxx", "status"]),
        publish: text(row, &["gbrq", "publish"]),
        expiry: text(row, &["sxrq", "expiry"]),
        alt_id: bbbs,
        provenance: Provenance::New,
        ..Default::default()
    }
}
