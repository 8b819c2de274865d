use std::{collections::HashSet, sync::Arc};

use axum::http::{
    HeaderName, HeaderValue, Method,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info};
use url::Url;

use crate::error::ApiError;

/// Normalized origins that may call the API from a browser.
#[derive(Debug)]
struct OriginAllowList {
    origins: HashSet<String>,
}

impl OriginAllowList {
    fn parse(configured: &[String]) -> Result<Self, ApiError> {
        let mut origins = HashSet::with_capacity(configured.len());
        for entry in configured {
            let origin = normalize_origin(entry).ok_or_else(|| {
                ApiError::internal(format!(
                    "ALLOWED_ORIGINS entry {entry:?} is not an origin such as https://example.com"
                ))
            })?;
            origins.insert(origin);
        }
        Ok(Self { origins })
    }

    fn allows(&self, header: &HeaderValue) -> bool {
        let allowed = header
            .to_str()
            .ok()
            .and_then(normalize_origin)
            .is_some_and(|origin| self.origins.contains(&origin));
        if !allowed {
            debug!("rejecting CORS origin {:?}", header);
        }
        allowed
    }
}

/// Builds the CORS layer from an origin allow-list. Preflight requests from
/// an allowed origin are answered by the layer itself and never reach a
/// handler.
pub fn build_cors_layer(origins: &[String]) -> Result<CorsLayer, ApiError> {
    let allow_list = Arc::new(OriginAllowList::parse(origins)?);
    info!(
        "CORS allows {} origin(s): {:?}",
        allow_list.origins.len(),
        allow_list.origins
    );

    let allow_origin =
        AllowOrigin::predicate(move |origin: &HeaderValue, _| allow_list.allows(origin));

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-requested-with"),
        ])
        .expose_headers([CONTENT_DISPOSITION]))
}

/// Reduces an origin to `scheme://host[:port]`. `Url` lowercases the host and
/// the serialized origin omits the scheme's default port. Values carrying a
/// path, query or fragment are not origins.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }
    Some(parsed.origin().ascii_serialization())
}
