use super::BackendError;
use std::net::IpAddr;

/// A parsed backend endpoint URL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub tls: bool,
    /// The host as written in the URL. IPv6 literals keep their brackets.
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, BackendError> {
        let uri = endpoint
            .parse::<http::Uri>()
            .map_err(|source| BackendError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(BackendError::UnsupportedScheme(endpoint.to_string())),
        };
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(BackendError::MissingHost(endpoint.to_string())),
        };
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self { tls, host, port })
    }

    #[inline]
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn is_ip_literal(&self) -> bool {
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
    }

    /// `host:port`, suitable for a CONNECT authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
