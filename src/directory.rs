use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

/// The participant/staff directory collaborator.
///
/// Bookings carry opaque references; only free-text search and reporting
/// need human-readable names, and those are resolved here. A reference the
/// directory cannot resolve is simply searched by its raw value.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn display_name(&self, reference: &str) -> Option<String>;

    /// Batch resolution. The default loops over `display_name`; a remote
    /// directory would override this with one round-trip.
    async fn display_names(&self, references: &[String]) -> HashMap<String, String> {
        let mut names = HashMap::with_capacity(references.len());
        for r in references {
            if let Some(name) = self.display_name(r).await {
                names.insert(r.clone(), name);
            }
        }
        names
    }
}

/// In-process directory backed by a fixed map. The server loads it from a
/// JSON object file (`{"ref": "Display Name", ...}`); tests build it inline.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    names: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let names: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self { names })
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn display_name(&self, reference: &str) -> Option<String> {
        self.names.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_references() {
        let dir = StaticDirectory::from_pairs([("p-01", "Ana Souza"), ("s-01", "Carla Mendes")]);
        assert_eq!(dir.display_name("p-01").await.as_deref(), Some("Ana Souza"));
        assert_eq!(dir.display_name("p-99").await, None);
    }

    #[tokio::test]
    async fn batch_resolution_skips_unknown() {
        let dir = StaticDirectory::from_pairs([("p-01", "Ana Souza")]);
        let names = dir
            .display_names(&["p-01".to_string(), "p-99".to_string()])
            .await;
        assert_eq!(names.len(), 1);
        assert_eq!(names.get("p-01").map(String::as_str), Some("Ana Souza"));
    }
}
