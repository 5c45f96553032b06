use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Correlation token embedded in outbound probes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OobToken {
    pub id: String,
    /// Callback domain the token is prefixed onto, when one is configured.
    pub domain: Option<String>,
}

impl OobToken {
    /// 16 lowercase base32 characters from 10 bytes of OS randomness. Safe
    /// as a single DNS label.
    pub fn generate(domain: Option<&str>) -> Self {
        let mut bytes = [0u8; 10];
        OsRng.fill_bytes(&mut bytes);
        let id = data_encoding::BASE32_NOPAD.encode(&bytes).to_lowercase();
        Self { id, domain: domain.map(|d| d.trim_matches('.').to_lowercase()) }
    }

    /// `<token>.<domain>`, or the bare token without a domain.
    pub fn host(&self) -> String {
        match &self.domain {
            Some(domain) if !domain.is_empty() => format!("{}.{}", self.id, domain),
            _ => self.id.clone(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/{}", self.host(), self.id)
    }
}

impl std::fmt::Display for OobToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
