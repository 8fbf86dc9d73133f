//! Read-only joker catalog.
//!
//! Built once at startup from a JSON file and shared by reference; nothing
//! re-reads the backing file after construction, so concurrent readers need
//! no locking. A missing or malformed file degrades to an empty catalog —
//! the run view renders jokers without art or effect text, and only the
//! standalone lookup endpoint reports a miss.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JokerInfo {
    pub name_en: String,
    pub name_zh: Option<String>,
    pub effect_en: Option<String>,
    pub effect_zh: Option<String>,
    pub image: Option<String>,
}

pub struct JokerCatalog {
    entries: Vec<JokerInfo>,
    // Lower-cased name_en -> index into entries
    by_name: HashMap<String, usize>,
}

impl JokerCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<Vec<JokerInfo>>(&text) {
                Ok(entries) => {
                    println!("[Catalog] Loaded {} jokers from {}", entries.len(), path.display());
                    Self::from_entries(entries)
                }
                Err(e) => {
                    eprintln!("[Catalog] Failed to parse {}: {}", path.display(), e);
                    Self::from_entries(Vec::new())
                }
            },
            Err(_) => {
                eprintln!("[Catalog] No catalog file at {}, lookups will be empty", path.display());
                Self::from_entries(Vec::new())
            }
        }
    }

    pub fn from_entries(entries: Vec<JokerInfo>) -> Self {
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, j)| (j.name_en.to_lowercase(), i))
            .collect();
        JokerCatalog { entries, by_name }
    }

    /// Case-insensitive lookup by English name.
    pub fn lookup(&self, name: &str) -> Option<&JokerInfo> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[JokerInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JokerCatalog {
        JokerCatalog::from_entries(vec![
            JokerInfo {
                name_en: "Blueprint".to_string(),
                name_zh: Some("蓝图".to_string()),
                effect_en: Some("Copies the Joker to the right".to_string()),
                effect_zh: None,
                image: Some("blueprint.png".to_string()),
            },
            JokerInfo {
                name_en: "Ride the Bus".to_string(),
                name_zh: None,
                effect_en: None,
                effect_zh: None,
                image: None,
            },
        ])
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let catalog = sample();
        assert!(catalog.lookup("blueprint").is_some());
        assert!(catalog.lookup("BLUEPRINT").is_some());
        assert!(catalog.lookup("  Blueprint  ").is_some());
        assert!(catalog.lookup("ride the bus").is_some());
        assert!(catalog.lookup("Joker").is_none());
    }

    #[test]
    fn test_missing_file_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JokerCatalog::load(dir.path().join("nope.json"));
        assert!(catalog.is_empty());
        assert!(catalog.lookup("Blueprint").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jokers.json");
        std::fs::write(
            &path,
            r#"[{"name_en": "Golden Joker", "name_zh": null, "effect_en": "Earn $4", "effect_zh": null, "image": null}]"#,
        )
        .unwrap();
        let catalog = JokerCatalog::load(&path);
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.lookup("golden joker").unwrap().effect_en.as_deref(),
            Some("Earn $4")
        );
    }
}
