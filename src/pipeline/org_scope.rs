// Organization scoping — requires an `X-Organization-ID` header on
// organization-scoped routes, which must parse as a UUID.

use axum::{body::Body, http::HeaderMap, http::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// The validated `X-Organization-ID` header, stashed in request extensions
/// for handlers downstream of this middleware.
#[derive(Debug, Clone, Copy)]
pub struct OrganizationId(pub Uuid);

const HEADER_NAME: &str = "x-organization-id";

fn extract_organization_id(headers: &HeaderMap) -> Result<Uuid> {
    let header = headers.get(HEADER_NAME).ok_or_else(|| {
        CoreError::validation_field("missing X-Organization-ID header", "organization_id")
    })?;
    let raw = header.to_str().map_err(|_| {
        CoreError::validation_field("X-Organization-ID is not valid UTF-8", "organization_id")
    })?;
    Uuid::parse_str(raw)
        .map_err(|_| CoreError::validation_field("X-Organization-ID must be a UUID", "organization_id"))
}

pub async fn org_scope_middleware(mut request: Request<Body>, next: Next<Body>) -> Result<Response> {
    let org_id = extract_organization_id(request.headers())?;
    request.extensions_mut().insert(OrganizationId(org_id));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(extract_organization_id(&headers).is_err());
    }

    #[test]
    fn rejects_non_uuid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_NAME, HeaderValue::from_static("not-a-uuid"));
        assert!(extract_organization_id(&headers).is_err());
    }

    #[test]
    fn accepts_uuid_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_NAME, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_organization_id(&headers).unwrap(), id);
    }
}
