use std::net::IpAddr;
use std::time::Duration;

use clausewatch_core::error::AppError;
use clausewatch_core::models::HttpResponse;
use clausewatch_core::traits::{Transport, TransportRequest};
use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use url::Url;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// HTTP transport using reqwest.
///
/// Sends browser-like headers with the user-agent chosen by the cascade, and
/// returns every status as a response. Redirects are followed here rather than
/// by reqwest so that each hop passes the same address guard as the first
/// request. The guard blocks private and reserved addresses unless
/// [`allow_private_urls`](Self::allow_private_urls) is set.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    ssrf_protection: bool,
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf;q=0.8,*/*;q=0.7",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .default_headers(browser_headers())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable the address guard, for CLI use on the user's own machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    /// Resolve a `Location` header against the current URL and guard the result.
    async fn next_hop(&self, current: &Url, location: &str) -> Result<Url, AppError> {
        let next = current
            .join(location)
            .map_err(|e| AppError::InvalidUrl(format!("bad redirect '{location}': {e}")))?;
        if self.ssrf_protection {
            validate_url(next.as_str()).await?;
        }
        Ok(next)
    }
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    async fn get(&self, request: TransportRequest<'_>) -> Result<HttpResponse, AppError> {
        let mut url =
            Url::parse(request.url).map_err(|e| AppError::InvalidUrl(format!("{}: {e}", request.url)))?;
        if self.ssrf_protection {
            validate_url(url.as_str()).await?;
        }

        let mut hops = 0;
        let response = loop {
            let response = self
                .client
                .get(url.clone())
                .header(header::USER_AGENT, request.user_agent)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|e| map_send_error(e, request.timeout))?;

            let location = response
                .status()
                .is_redirection()
                .then(|| response.headers().get(header::LOCATION))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let Some(location) = location else {
                break response;
            };
            if hops == MAX_REDIRECTS {
                return Err(AppError::HttpError(format!(
                    "too many redirects from {}",
                    request.url
                )));
            }
            hops += 1;
            let next = self.next_hop(&url, &location).await?;
            tracing::debug!(from = %url, to = %next, hops, "Following redirect");
            url = next;
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let header_str = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_str(header::CONTENT_TYPE);
        let retry_after = header_str(header::RETRY_AFTER);

        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(e, request.timeout))?
            .to_vec();

        tracing::debug!(
            url = %request.url,
            %final_url,
            status,
            bytes = body.len(),
            "HTTP response"
        );

        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            retry_after,
            body,
        })
    }
}

// -- Address guard --

/// Reject non-HTTP schemes and hosts that resolve to a private or reserved
/// address. Every resolved address must be public.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!(
            "URL scheme '{}' is not allowed (only http/https)",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{url} has no host")))?;
    let blocked = |ip: IpAddr| AppError::InvalidUrl(format!("SSRF blocked: {host} is reserved address {ip}"));

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return if is_reserved(ip) { Err(blocked(ip)) } else { Ok(()) };
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let mut resolved = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .peekable();

    if resolved.peek().is_none() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    match resolved.map(|addr| addr.ip()).find(|ip| is_reserved(*ip)) {
        Some(ip) => Err(blocked(ip)),
        None => Ok(()),
    }
}

fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // carrier-grade NAT, 100.64.0.0/10
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6.to_ipv4_mapped().is_some_and(|v4| is_reserved(IpAddr::V4(v4)))
        }
    }
}
