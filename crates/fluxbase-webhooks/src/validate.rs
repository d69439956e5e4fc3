//! SSRF and header validation for webhook configuration.
//!
//! This is the single enforcement site: the repo calls it at create/update
//! and the deliverer calls it again immediately before each request, so a
//! DNS record that changed since configuration cannot redirect deliveries
//! into the private network.

use crate::error::WebhookError;
use std::collections::HashMap;
use std::net::IpAddr;
use url::Url;

/// Hostnames that always resolve somewhere we must not reach.
const BLOCKED_HOSTS: [&str; 7] = [
    "localhost",
    "ip6-localhost",
    "metadata.google.internal",
    "metadata",
    "instance-data",
    "kubernetes.default",
    "kubernetes.default.svc",
];

/// Headers a webhook config may not override: hop-by-hop and
/// framing-affecting names.
const BLOCKED_HEADERS: [&str; 10] = [
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
];

/// Maximum accepted header value length in bytes.
const MAX_HEADER_VALUE_LEN: usize = 8192;

/// Validate a webhook URL, resolving the host and rejecting anything that
/// lands in a private or link-local range.
pub async fn validate_url(raw: &str) -> Result<(), WebhookError> {
    let url = Url::parse(raw).map_err(|e| WebhookError::InvalidUrl(format!("parse error: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(WebhookError::InvalidUrl(format!(
                "scheme {other:?} is not allowed, use http or https"
            )));
        }
    }

    let Some(host) = url.host() else {
        return Err(WebhookError::InvalidUrl("missing host".to_string()));
    };

    // IP literals are checked directly; hostnames are checked against the
    // blocklist, then resolved, and every address must be public.
    match host {
        url::Host::Ipv4(ip) => check_public(IpAddr::V4(ip)),
        url::Host::Ipv6(ip) => check_public(IpAddr::V6(ip)),
        url::Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            if BLOCKED_HOSTS.contains(&domain.as_str()) {
                return Err(WebhookError::InvalidUrl(format!(
                    "internal hostname {domain:?} is not allowed"
                )));
            }

            let port = url.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(|e| {
                    WebhookError::InvalidUrl(format!("host resolution failed: {e}"))
                })?;

            let mut resolved_any = false;
            for addr in addrs {
                resolved_any = true;
                if is_private_ip(addr.ip()) {
                    return Err(WebhookError::InvalidUrl(format!(
                        "host {domain:?} resolves to private address {}",
                        addr.ip()
                    )));
                }
            }
            if !resolved_any {
                return Err(WebhookError::InvalidUrl(format!(
                    "host {domain:?} did not resolve"
                )));
            }
            Ok(())
        }
    }
}

fn check_public(ip: IpAddr) -> Result<(), WebhookError> {
    if is_private_ip(ip) {
        return Err(WebhookError::InvalidUrl(format!(
            "address {ip} is in a private range"
        )));
    }
    Ok(())
}

/// Whether an address falls in a loopback, link-local, or private range.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                // 169.254.0.0/16, including the metadata endpoint
                || v4.is_link_local()
                // RFC1918
                || octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                // fc00::/7 unique-local
                || (segments[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (segments[0] & 0xffc0) == 0xfe80
                || v6.is_unspecified()
        }
    }
}

/// Validate webhook custom headers.
pub fn validate_headers(headers: &HashMap<String, String>) -> Result<(), WebhookError> {
    for (name, value) in headers {
        let name_lower = name.to_ascii_lowercase();
        if BLOCKED_HEADERS.contains(&name_lower.as_str()) {
            return Err(WebhookError::InvalidHeader(format!(
                "header {name:?} is not allowed"
            )));
        }
        if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(WebhookError::InvalidHeader(format!(
                "header {name:?} contains invalid characters"
            )));
        }
        if value.len() > MAX_HEADER_VALUE_LEN {
            return Err(WebhookError::InvalidHeader(format!(
                "header {name:?} value exceeds maximum length of {MAX_HEADER_VALUE_LEN} bytes"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn metadata_endpoint_is_rejected() {
        let err = validate_url("http://169.254.169.254/latest/meta-data/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("private range"), "{err}");
    }

    #[tokio::test]
    async fn localhost_is_rejected() {
        let err = validate_url("http://localhost/x").await.unwrap_err();
        assert!(err.to_string().contains("internal hostname"), "{err}");
    }

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let err = validate_url("ftp://example.com").await.unwrap_err();
        assert!(err.to_string().contains("scheme"), "{err}");
    }

    #[tokio::test]
    async fn cloud_metadata_hostnames_are_rejected() {
        for url in [
            "http://metadata.google.internal",
            "http://metadata/latest",
            "http://instance-data/x",
            "http://kubernetes.default/api",
            "http://kubernetes.default.svc/api",
            "http://ip6-localhost/",
        ] {
            let err = validate_url(url).await.unwrap_err();
            assert!(err.to_string().contains("internal hostname"), "{url}: {err}");
        }
    }

    #[tokio::test]
    async fn private_ip_literals_are_rejected() {
        for url in [
            "http://127.0.0.1/hook",
            "http://10.1.2.3/hook",
            "http://172.16.0.1/hook",
            "http://192.168.1.1/hook",
            "http://[::1]/hook",
            "http://[fc00::1]/hook",
            "http://[fe80::1]/hook",
        ] {
            let err = validate_url(url).await.unwrap_err();
            assert!(err.to_string().contains("private range"), "{url}: {err}");
        }
    }

    #[tokio::test]
    async fn public_ip_literal_is_accepted() {
        validate_url("https://93.184.216.34/hook").await.unwrap();
    }

    #[test]
    fn private_ranges_cover_spec_set() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("172.31.255.255".parse().unwrap()));
        assert!(is_private_ip("192.168.0.1".parse().unwrap()));
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fdab::1".parse().unwrap()));
        assert!(is_private_ip("fe80::dead".parse().unwrap()));

        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
        assert!(!is_private_ip("172.32.0.1".parse().unwrap()));
        assert!(!is_private_ip("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn framing_headers_are_rejected() {
        let err = validate_headers(&headers(&[("Content-Length", "10")])).unwrap_err();
        assert!(err.to_string().contains("not allowed"), "{err}");

        let err = validate_headers(&headers(&[("transfer-ENCODING", "chunked")])).unwrap_err();
        assert!(err.to_string().contains("not allowed"), "{err}");
    }

    #[test]
    fn crlf_injection_is_rejected() {
        let err =
            validate_headers(&headers(&[("X-Evil", "a\r\nX-Injected: y")])).unwrap_err();
        assert!(err.to_string().contains("invalid characters"), "{err}");

        let err = validate_headers(&headers(&[("X-\nBad", "v")])).unwrap_err();
        assert!(err.to_string().contains("invalid characters"), "{err}");
    }

    #[test]
    fn oversized_value_is_rejected() {
        let big = "a".repeat(8193);
        let err = validate_headers(&headers(&[("X-Custom", big.as_str())])).unwrap_err();
        assert!(err.to_string().contains("maximum length"), "{err}");

        let exact = "a".repeat(8192);
        validate_headers(&headers(&[("X-Custom", exact.as_str())])).unwrap();
    }

    #[test]
    fn ordinary_headers_pass() {
        validate_headers(&headers(&[
            ("Authorization", "Bearer token"),
            ("X-Request-Source", "fluxbase"),
        ]))
        .unwrap();
    }
}
