use crate::core::config::Config;
use crate::core::io::Storage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Outline,
    WorldGuide,
}

impl Category {
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Outline => "outline",
            Category::WorldGuide => "world",
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Text of every document in `category`, in file-name order with
    /// embedded numbers compared by value.
    async fn list_texts(&self, category: Category) -> Result<Vec<String>>;
    /// Persists `text` as the artifact for `range_label`; returns its location.
    async fn write_text(&self, category: Category, range_label: &str, text: &str)
        -> Result<String>;
}

pub struct FsDocumentStore {
    outline_folder: String,
    world_folder: String,
    storage: Arc<dyn Storage>,
}

impl FsDocumentStore {
    pub fn new(config: &Config, storage: Arc<dyn Storage>) -> Self {
        Self {
            outline_folder: config.outline_folder.clone(),
            world_folder: config.world_folder.clone(),
            storage,
        }
    }

    fn folder(&self, category: Category) -> &str {
        match category {
            Category::Outline => &self.outline_folder,
            Category::WorldGuide => &self.world_folder,
        }
    }

    pub fn artifact_name(category: Category, range_label: &str) -> String {
        format!("{}_{}.txt", category.prefix(), range_label)
    }
}

/// Sort key on the file name: the text before the first number, then that
/// number, so `outline_11-20.txt` comes before `outline_101-110.txt`.
fn name_order(name: &str) -> (String, Option<u64>, String) {
    let digits_at = name.find(|c: char| c.is_ascii_digit());
    match digits_at {
        Some(start) => {
            let digits: String = name[start..].chars().take_while(char::is_ascii_digit).collect();
            (name[..start].to_string(), digits.parse().ok(), name.to_string())
        }
        None => (name.to_string(), None, name.to_string()),
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list_texts(&self, category: Category) -> Result<Vec<String>> {
        let entries = self.storage.list(self.folder(category)).await?;
        let mut txt_entries: Vec<String> = entries
            .into_iter()
            .filter(|e| e.to_lowercase().ends_with(".txt"))
            .collect();

        txt_entries.sort_by_cached_key(|p| {
            let name = Path::new(p)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            name_order(&name)
        });

        let mut texts = Vec::with_capacity(txt_entries.len());
        for path in txt_entries {
            texts.push(self.storage.read_to_string(&path).await?);
        }
        Ok(texts)
    }

    async fn write_text(
        &self,
        category: Category,
        range_label: &str,
        text: &str,
    ) -> Result<String> {
        if category == Category::WorldGuide {
            return Err(anyhow!("world guide documents are read-only"));
        }
        let path = Path::new(self.folder(category)).join(Self::artifact_name(category, range_label));
        let path_str = path.to_string_lossy().to_string();
        self.storage.write(&path_str, text.as_bytes()).await?;
        Ok(path_str)
    }
}
