use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderMap, Method, Uri},
    middleware::Next,
    response::Response,
};
use opentelemetry::{
    global,
    trace::{Span, SpanKind, Status, Tracer},
    KeyValue,
};
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::actor::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use crate::db::models::StaffRole;

/// Portal surface a route belongs to, taken from its first path segments.
fn portal_area(route: &str) -> &'static str {
    let mut segments = route.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("api"), Some("admin")) => "admin",
        (Some("api"), Some("instructor")) => "instructor",
        (Some("api"), Some("finance")) => "finance",
        (Some("api"), Some("management")) => "management",
        (Some("api"), Some("certificates")) => "verification",
        (Some("api"), Some("registrations")) => "intake",
        (Some("certificates"), _) => "artifacts",
        _ => "system",
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// What the spans of one request are labelled with. The actor headers are
/// read as claimed; authorization happens in the handlers.
#[derive(Debug, Clone, PartialEq)]
struct RequestContext {
    method: String,
    path: String,
    route: String,
    area: &'static str,
    actor_role: Option<&'static str>,
    actor_id: Option<String>,
    user_agent: Option<String>,
    client_ip: Option<String>,
    request_id: Uuid,
}

impl RequestContext {
    fn from_request(request: &Request) -> Self {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str());
        Self::new(request.method(), request.uri(), request.headers(), route)
    }

    fn new(method: &Method, uri: &Uri, headers: &HeaderMap, route: Option<&str>) -> Self {
        let route = route.unwrap_or("unmatched").to_string();

        // Unknown role names are kept out of span attributes.
        let actor_role = header_str(headers, ACTOR_ROLE_HEADER).map(|raw| {
            raw.trim()
                .parse::<StaffRole>()
                .map(|role| role.as_str())
                .unwrap_or("invalid")
        });

        Self {
            method: method.to_string(),
            path: uri.path().to_string(),
            area: portal_area(&route),
            route,
            actor_role,
            actor_id: header_str(headers, ACTOR_ID_HEADER).map(|id| id.trim().to_string()),
            user_agent: header_str(headers, "user-agent").map(str::to_string),
            client_ip: header_str(headers, "x-forwarded-for")
                .and_then(|xff| xff.split(',').next())
                .map(|ip| ip.trim().to_string()),
            request_id: Uuid::now_v7(),
        }
    }

    fn span_name(&self) -> String {
        format!("{} {}", self.method, self.route)
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new("http.method", self.method.clone()),
            KeyValue::new("http.target", self.path.clone()),
            KeyValue::new("http.route", self.route.clone()),
            KeyValue::new("http.request_id", self.request_id.to_string()),
            KeyValue::new("portal.area", self.area),
        ];
        if let Some(role) = self.actor_role {
            attributes.push(KeyValue::new("portal.actor.role", role));
        }
        if let Some(id) = &self.actor_id {
            attributes.push(KeyValue::new("portal.actor.id", id.clone()));
        }
        if let Some(ua) = &self.user_agent {
            attributes.push(KeyValue::new("http.user_agent", ua.clone()));
        }
        if let Some(ip) = &self.client_ip {
            attributes.push(KeyValue::new("http.client_ip", ip.clone()));
        }
        attributes
    }
}

/// Per-request OpenTelemetry server span plus an `http_request` tracing span,
/// both labelled with the portal area and the acting staff role.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let context = RequestContext::from_request(&request);
    let start_time = Instant::now();

    let tracer = global::tracer("training-portal");
    let mut span = tracer
        .span_builder(context.span_name())
        .with_kind(SpanKind::Server)
        .with_attributes(context.attributes())
        .start(&tracer);

    let tracing_span = info_span!(
        "http_request",
        method = %context.method,
        route = %context.route,
        area = context.area,
        actor_role = context.actor_role.unwrap_or("anonymous"),
        request_id = %context.request_id,
    );

    let response = next.run(request).instrument(tracing_span.clone()).await;

    let elapsed_ms = start_time.elapsed().as_millis() as u64;
    let status_code = response.status().as_u16();

    span.set_attribute(KeyValue::new("http.status_code", status_code as i64));
    span.set_attribute(KeyValue::new("http.response_time_ms", elapsed_ms as i64));
    if status_code >= 500 {
        span.set_status(Status::Error {
            description: format!("HTTP {}", status_code).into(),
        });
    } else {
        span.set_status(Status::Ok);
    }
    span.end();

    tracing_span.in_scope(|| match status_code {
        500.. => warn!(status = status_code, elapsed_ms, "Request failed"),
        401 | 403 => warn!(status = status_code, elapsed_ms, "Request denied"),
        _ => info!(status = status_code, elapsed_ms, "Request completed"),
    });

    response
}
