use anyhow::Result;
use std::path::Path;

/// Shop ids the customer starred. Order of insertion is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Favorites {
    ids: Vec<i64>,
}

impl Favorites {
    /// Read the favorites file; a missing or unreadable file means no favorites
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Vec<i64>>(&content) {
            Ok(ids) => {
                let mut favs = Self::default();
                for id in ids {
                    if !favs.contains(id) {
                        favs.ids.push(id);
                    }
                }
                favs
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse favorites");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&self.ids)?)?;
        Ok(())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// Add the shop if absent, remove it if present. Returns the new membership.
    pub fn toggle(&mut self, id: i64) -> bool {
        if let Some(pos) = self.ids.iter().position(|&x| x == id) {
            self.ids.remove(pos);
            false
        } else {
            self.ids.push(id);
            true
        }
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
