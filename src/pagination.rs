//! Collecting every page of a query.
//!
//! Falcon query endpoints page their results in one of three ways, all
//! reported under `meta.pagination`:
//!
//! - numeric `offset` + `total`: the next page starts where the previous
//!   one ended,
//! - string `offset` (scroll endpoints such as `QueryDevicesByFilterScroll`):
//!   the returned offset is an opaque token for the next page,
//! - `after` token: passed back as `after=` to get the next page.
//!
//! [`paginate`] follows whichever scheme each page reports and stops at
//! `total`, on an empty page, when no continuation is returned, or after
//! `max_pages`.
//!
//! Endpoints disagree on what a numeric `offset` in the response means
//! (start of this page or start of the next one), so numeric offsets are
//! tracked locally from the request side: the caller's `offset` argument
//! (or 0) plus the number of records received so far.

use serde_json::Value;

use crate::client::FalconClient;
use crate::error::Result;
use crate::request::Request;

/// Runs `request` repeatedly and returns every `resources` entry.
///
/// `max_pages = Some(0)` sends nothing. Operations that do not accept the
/// continuation parameter the response asks for (`offset` or `after`)
/// return the first page only.
///
/// Any page with a status `>= 400` aborts with `FalconError::Api`.
pub async fn paginate(
    client: &FalconClient,
    request: &Request,
    max_pages: Option<usize>,
) -> Result<Vec<Value>> {
    let mut request = request.clone();
    let mut collected: Vec<Value> = Vec::new();
    let mut pages = 0usize;
    let mut offset = request
        .query_value("offset")
        .and_then(numeric_offset)
        .unwrap_or(0);

    loop {
        if max_pages.is_some_and(|max| pages >= max) {
            break;
        }

        let response = client.execute(&request).await?.into_result()?;
        let page = response.resources();
        let page_len = page.len();
        collected.extend_from_slice(page);
        pages += 1;
        offset += page_len as u64;

        tracing::debug!(
            operation = request.operation_id(),
            page = pages,
            records = page_len,
            collected = collected.len(),
            "fetched page"
        );

        if page_len == 0 {
            break;
        }
        let Some(meta) = response.pagination() else {
            break;
        };
        if meta.total.is_some_and(|total| collected.len() as u64 >= total) {
            break;
        }

        let (name, next) = if let Some(after) = meta.after {
            ("after", Value::from(after))
        } else {
            match meta.offset {
                Some(Value::String(token)) if !token.is_empty() => ("offset", Value::from(token)),
                Some(Value::Number(_)) => {
                    if meta.total.is_some_and(|total| offset >= total) {
                        break;
                    }
                    ("offset", Value::from(offset))
                }
                _ => break,
            }
        };

        if !request.accepts_query(client.catalog(), name)? {
            tracing::warn!(
                operation = request.operation_id(),
                parameter = name,
                "operation does not accept the continuation parameter; returning the first page only"
            );
            break;
        }
        request.set_query_value(name, next);
    }

    Ok(collected)
}

/// Reads a numeric offset given as a JSON number or a numeric string
/// (CLI arguments arrive as strings).
fn numeric_offset(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
