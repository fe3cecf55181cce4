//! Landing-page probing: navigation, DOM heuristics, link checks and scoring.

pub mod detect;
pub mod funnel;
pub mod links;
pub mod score;

pub use self::funnel::FunnelProbe;

/// What a probe run is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub site_id: String,
    pub url: String,
    /// Filesystem-safe key used to name run artifacts.
    pub artifact_key: String,
}

impl ProbeTarget {
    pub fn new(site_id: &str, url: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            url: url.to_string(),
            artifact_key: artifact_key(site_id),
        }
    }
}

fn artifact_key(site_id: &str) -> String {
    let key: String = site_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if key.is_empty() {
        "adhoc".to_string()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_is_path_safe() {
        assert_eq!(ProbeTarget::new("recAbc123", "https://x").artifact_key, "recAbc123");
        assert_eq!(ProbeTarget::new("../etc/pw", "https://x").artifact_key, "___etc_pw");
        assert_eq!(ProbeTarget::new("", "https://x").artifact_key, "adhoc");
    }
}
