//! Minimal semantic index over reference texts: paragraph fragments,
//! remote embeddings, and a JSON-file vector store searched by cosine score.

use crate::core::io::Storage;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_references")]
    pub references_folder: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub api_key: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            references_folder: default_references(),
            index_path: default_index_path(),
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            api_key: None,
            concurrency: default_concurrency(),
        }
    }
}

fn default_references() -> String {
    "data/references".to_string()
}
fn default_index_path() -> String {
    "db/index.json".to_string()
}
fn default_top_k() -> usize {
    3
}
fn default_max_top_k() -> usize {
    10
}
fn default_embedding_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}
fn default_embedding_model() -> String {
    "bge-m3".to_string()
}
fn default_concurrency() -> usize {
    2
}

// --- Fragments ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub source: String,
}

/// Splits on blank lines. A text without paragraph breaks is one fragment.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let paragraphs: Vec<String> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if paragraphs.is_empty() && !text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }
    paragraphs
}

/// Reads each file and splits it into fragments tagged with the file name.
/// Unreadable files are skipped with a warning.
pub async fn load_fragments(storage: &dyn Storage, files: &[String]) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for file in files {
        let content = match storage.read_to_string(file).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Skip {}: {:#}", file, e);
                continue;
            }
        };
        let source = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.clone());
        println!("Adding {}...", file);
        fragments.extend(
            split_paragraphs(&content)
                .into_iter()
                .map(|text| Fragment { text, source: source.clone() }),
        );
    }
    fragments
}

// --- Embeddings ---

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` endpoint (also served by Ollama under `/v1`).
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Embedding API error: {}", error_text));
        }

        let mut result: EmbeddingResponse = resp.json().await?;
        if result.data.len() != texts.len() {
            bail!(
                "Embedding API returned {} vectors for {} inputs",
                result.data.len(),
                texts.len()
            );
        }
        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

// --- Index ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub text: String,
    pub source: String,
}

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn add(&mut self, fragments: Vec<Fragment>) -> Result<usize>;
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    vector: Vec<f32>,
    text: String,
    source: String,
}

const EMBED_BATCH: usize = 16;

pub struct LocalVectorIndex {
    path: String,
    max_top_k: usize,
    concurrency: usize,
    records: Vec<IndexRecord>,
    storage: Arc<dyn Storage>,
    embedder: Arc<dyn Embedder>,
}

impl LocalVectorIndex {
    pub async fn open(
        config: &RagConfig,
        storage: Arc<dyn Storage>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let records: Vec<IndexRecord> = if storage.exists(&config.index_path).await? {
            let content = storage.read_to_string(&config.index_path).await?;
            serde_json::from_str(&content)
                .with_context(|| format!("Corrupt index file {}", config.index_path))?
        } else {
            Vec::new()
        };
        info!("Opened index {} ({} fragments)", config.index_path, records.len());

        Ok(Self {
            path: config.index_path.clone(),
            max_top_k: config.max_top_k.max(1),
            concurrency: config.embedding.concurrency.max(1),
            records,
            storage,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every stored fragment and persists the empty index.
    pub async fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let content = serde_json::to_string(&self.records)?;
        self.storage.write(&self.path, content.as_bytes()).await
    }

    pub fn clamp_top_k(&self, top_k: usize) -> usize {
        top_k.clamp(1, self.max_top_k)
    }
}

#[async_trait]
impl SemanticIndex for LocalVectorIndex {
    async fn add(&mut self, fragments: Vec<Fragment>) -> Result<usize> {
        if fragments.is_empty() {
            return Ok(0);
        }

        let pb = ProgressBar::new(fragments.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );

        let batches: Vec<Vec<String>> = fragments
            .chunks(EMBED_BATCH)
            .map(|batch| batch.iter().map(|f| f.text.clone()).collect())
            .collect();

        let embedder = Arc::clone(&self.embedder);
        let results: Vec<Result<Vec<Vec<f32>>>> = futures_util::stream::iter(batches)
            .map(|texts: Vec<String>| {
                let pb = pb.clone();
                let embedder = Arc::clone(&embedder);
                async move {
                    let vectors = embedder.embed(&texts).await?;
                    pb.inc(texts.len() as u64);
                    Ok::<_, anyhow::Error>(vectors)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;
        pb.finish_with_message("Embedding complete");

        let mut vectors = Vec::with_capacity(fragments.len());
        for res in results {
            vectors.extend(res?);
        }

        let dimension = self.records.first().map(|r| r.vector.len());
        let mut added = Vec::with_capacity(fragments.len());
        for (fragment, vector) in fragments.into_iter().zip(vectors) {
            if let Some(dim) = dimension.or_else(|| added.first().map(|r: &IndexRecord| r.vector.len())) {
                if vector.len() != dim {
                    bail!("Embedding dimension {} does not match index dimension {}", vector.len(), dim);
                }
            }
            added.push(IndexRecord { vector, text: fragment.text, source: fragment.source });
        }

        let count = added.len();
        self.records.extend(added);
        self.save().await?;
        Ok(count)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let text = text.trim();
        if text.is_empty() {
            bail!("query text must not be empty");
        }
        let top_k = self.clamp_top_k(top_k);

        let query_vector = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Embedding API returned no vector for the query")?;

        let mut scored: Vec<(f32, &IndexRecord)> = self
            .records
            .iter()
            .map(|r| (cosine(&query_vector, &r.vector), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| SearchHit {
                score: (score * 10_000.0).round() / 10_000.0,
                text: r.text.clone(),
                source: r.source.clone(),
            })
            .collect())
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use std::fs;

    /// Maps keywords to fixed axes so similarity is predictable.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    vec![
                        if t.contains("剑") { 1.0 } else { 0.0 },
                        if t.contains("魔法") { 1.0 } else { 0.0 },
                        0.1,
                    ]
                })
                .collect())
        }
    }

    fn rag_config(root: &Path) -> RagConfig {
        RagConfig {
            index_path: root.join("db/index.json").to_string_lossy().to_string(),
            ..RagConfig::default()
        }
    }

    #[test]
    fn test_split_paragraphs() {
        assert_eq!(
            split_paragraphs("第一段\n\n  第二段  \n\n\n\n第三段"),
            vec!["第一段", "第二段", "第三段"]
        );
        assert_eq!(split_paragraphs("只有一段\n没有空行"), vec!["只有一段\n没有空行"]);
        assert!(split_paragraphs("  \n\n ").is_empty());
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_add_query_and_reopen() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = rag_config(temp_dir.path());
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        let mut index = LocalVectorIndex::open(&config, storage.clone(), Arc::new(KeywordEmbedder)).await?;
        let added = index
            .add(vec![
                Fragment { text: "主角拔出长剑".into(), source: "a.txt".into() },
                Fragment { text: "学院教授魔法".into(), source: "b.txt".into() },
            ])
            .await?;
        assert_eq!(added, 2);

        let reopened = LocalVectorIndex::open(&config, storage, Arc::new(KeywordEmbedder)).await?;
        assert_eq!(reopened.len(), 2);

        let hits = reopened.query("剑术", 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "a.txt");
        assert!(hits[0].score > 0.9);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_clamps_top_k_and_rejects_empty() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = rag_config(temp_dir.path());
        let mut index =
            LocalVectorIndex::open(&config, Arc::new(NativeStorage::new()), Arc::new(KeywordEmbedder)).await?;
        let fragments = (0..12)
            .map(|i| Fragment { text: format!("片段{}", i), source: "c.txt".into() })
            .collect();
        index.add(fragments).await?;

        assert_eq!(index.query("片段", 50).await?.len(), 10);
        assert_eq!(index.query("片段", 0).await?.len(), 1);
        assert!(index.query("   ", 3).await.is_err());

        index.clear().await?;
        assert!(index.is_empty());
        assert!(index.query("片段", 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_fragments_skips_missing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let file = temp_dir.path().join("doc1.txt");
        fs::write(&file, "人工智能\n\n深度学习")?;

        let files = vec![
            file.to_string_lossy().to_string(),
            temp_dir.path().join("missing.txt").to_string_lossy().to_string(),
        ];
        let fragments = load_fragments(&NativeStorage::new(), &files).await;
        assert_eq!(fragments.len(), 2);
        assert!(fragments.iter().all(|f| f.source == "doc1.txt"));
        Ok(())
    }
}
