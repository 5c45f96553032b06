use serde::{Deserialize, Serialize};
use crate::errors::PocScanError;

/// A scan endpoint, either a URL or a `host[:port]` pair. Identity is the
/// exact input string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

/// Components of a target used to seed rule variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetParts {
    pub scheme: String,
    /// `hostname[:port]` exactly as written in the target
    pub host: String,
    pub hostname: String,
    pub port: u16,
    /// Path component without a trailing slash (empty for the root)
    pub path: String,
    /// `scheme://host`
    pub root_url: String,
    /// `scheme://host/path`, never ending in `/`
    pub base_url: String,
}

impl Target {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the target into URL components. Targets without a scheme are
    /// assumed to be HTTP, or HTTPS when the port is 443.
    pub fn parts(&self) -> Result<TargetParts, PocScanError> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err(PocScanError::InvalidTarget("empty target".into()));
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((s, r)) => (Some(s.to_lowercase()), r),
            None => (None, raw),
        };

        let authority_end = rest.find(|c| c == '/' || c == '?' || c == '#').unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let path = rest[authority_end..].trim_end_matches('/').to_string();

        let (hostname, explicit_port) = split_host_port(authority)
            .ok_or_else(|| PocScanError::InvalidTarget(format!("cannot parse host in '{}'", raw)))?;
        if hostname.is_empty() {
            return Err(PocScanError::InvalidTarget(format!("missing host in '{}'", raw)));
        }

        let scheme = scheme.unwrap_or_else(|| {
            if explicit_port == Some(443) { "https".to_string() } else { "http".to_string() }
        });
        let port = explicit_port.unwrap_or(if scheme == "https" { 443 } else { 80 });
        let root_url = format!("{}://{}", scheme, authority);
        let base_url = format!("{}{}", root_url, path);

        Ok(TargetParts {
            scheme,
            host: authority.to_string(),
            hostname,
            port,
            path,
            root_url,
            base_url,
        })
    }
}

fn split_host_port(authority: &str) -> Option<(String, Option<u16>)> {
    // Bracketed IPv6 literal
    if let Some(stripped) = authority.strip_prefix('[') {
        let (host, after) = stripped.split_once(']')?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(p.parse::<u16>().ok()?),
            None if after.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse::<u16>().ok()?))),
        None => Some((authority.to_string(), None)),
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Deduplicate targets by exact string, keeping first-seen order and
/// dropping blank entries.
pub fn dedup_targets<I, S>(raw: I) -> Vec<Target>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut targets = Vec::new();
    for entry in raw {
        let trimmed = entry.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            targets.push(Target::new(trimmed));
        }
    }
    targets
}
