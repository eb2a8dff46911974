//! Client device extraction.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use sso_core::auth::device::generate_device;
use sso_core::models::session::Device;

/// The requesting device, fingerprinted from its address and user agent.
///
/// The address is the first hop of `X-Forwarded-For`, then `X-Real-IP`,
/// then the socket peer.
#[derive(Debug, Clone)]
pub struct ClientDevice(pub Device);

impl<S: Send + Sync> FromRequestParts<S> for ClientDevice {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = forwarded_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        Ok(ClientDevice(generate_device(&ip, user_agent)))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(chain) = header("x-forwarded-for")
        && let Some(first) = chain.split(',').map(str::trim).find(|s| !s.is_empty())
    {
        return Some(first.to_string());
    }
    header("x-real-ip").map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Device {
        let (mut parts, ()) = req.into_parts();
        let ClientDevice(device) = ClientDevice::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        device
    }

    #[tokio::test]
    async fn prefers_forwarded_for() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "10.0.0.2")
            .header(USER_AGENT, "curl/8.0")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn falls_back_to_real_ip_then_peer() {
        let req = Request::builder()
            .header("x-real-ip", "10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(extract(req).await.ip, "10.0.0.2");

        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(extract(req).await.ip, "192.0.2.1");
    }

    #[tokio::test]
    async fn same_client_same_device() {
        let build = || {
            Request::builder()
                .header("x-real-ip", "10.0.0.2")
                .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0")
                .body(())
                .unwrap()
        };
        assert_eq!(extract(build()).await.id, extract(build()).await.id);
    }
}
