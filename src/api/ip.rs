use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

const FALLBACK_IP: &str = "127.0.0.1";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The caller's address as reported by the reverse proxy in front of the server.
pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = header(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| header(headers, "x-real-ip"))
        .or_else(|| header(headers, "cf-connecting-ip"))
        .map(str::to_string)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientIp {
    pub ip: String,
}

pub async fn client_ip(headers: HeaderMap) -> Json<ClientIp> {
    let ip = forwarded_ip(&headers).unwrap_or_else(|| FALLBACK_IP.to_string());
    Json(ClientIp { ip })
}
