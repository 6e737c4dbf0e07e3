//! Durable chat log storage.
//!
//! Layout: `<root>/<owner>/<segment_id>.json`, one immutable file per
//! segment. Records are written to a temporary file and renamed into place.

use async_trait::async_trait;
use relayrs_core::{HISTORY_LIMIT, Message, OwnerId, SEGMENT_SIZE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::segment::{ChatLogSegment, partition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Segment {0} not found")]
    NotFound(Uuid),

    #[error("Corrupt segment at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Segment {segment_id} belongs to {found}, not {expected}")]
    Integrity {
        segment_id: Uuid,
        expected: OwnerId,
        found: OwnerId,
    },
}

/// Receives every segment written by [`ChatLogStore::flush`].
#[async_trait]
pub trait SegmentIndexer: Send + Sync {
    async fn index_segment(&self, segment: &ChatLogSegment) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per owner
    pub root: PathBuf,
    /// Messages per segment
    pub segment_size: usize,
    /// Maximum messages returned by `load`
    pub history_limit: usize,
    /// Segments read by `load` when none are named
    pub recent_segments: usize,
}

impl StoreConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            segment_size: SEGMENT_SIZE,
            history_limit: HISTORY_LIMIT,
            recent_segments: 4,
        }
    }
}

pub struct ChatLogStore {
    config: StoreConfig,
    indexer: Option<Arc<dyn SegmentIndexer>>,
}

impl ChatLogStore {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        info!("Chat log store at {}", config.root.display());
        Self {
            config,
            indexer: None,
        }
    }

    /// Index every flushed segment with `indexer`.
    #[must_use]
    pub fn with_indexer(mut self, indexer: Arc<dyn SegmentIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn owner_dir(&self, owner: &OwnerId) -> PathBuf {
        let safe: String = owner
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config.root.join(safe)
    }

    fn segment_path(&self, owner: &OwnerId, segment_id: &Uuid) -> PathBuf {
        self.owner_dir(owner).join(format!("{segment_id}.json"))
    }

    /// Persist `history` as consecutive segments and return their ids in order.
    ///
    /// Indexing runs after each write and never fails the flush.
    pub async fn flush(
        &self,
        owner: &OwnerId,
        history: &[Message],
    ) -> Result<Vec<Uuid>, StoreError> {
        let segments = partition(owner, history, self.config.segment_size);
        if segments.is_empty() {
            debug!("Nothing to flush for {owner}");
            return Ok(Vec::new());
        }

        fs::create_dir_all(self.owner_dir(owner)).await?;

        let mut ids = Vec::with_capacity(segments.len());
        for segment in &segments {
            self.write_segment(segment).await?;
            ids.push(segment.segment_id);

            if let Some(indexer) = &self.indexer {
                if let Err(e) = indexer.index_segment(segment).await {
                    warn!("Failed to index segment {}: {e}", segment.segment_id);
                }
            }
        }

        info!(
            "Flushed {} messages for {owner} into {} segments",
            history.len(),
            ids.len()
        );
        Ok(ids)
    }

    async fn write_segment(&self, segment: &ChatLogSegment) -> Result<(), StoreError> {
        let path = self.segment_path(&segment.owner_id, &segment.segment_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(segment)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote segment {}", path.display());
        Ok(())
    }

    /// Read one segment, verifying it belongs to `owner`.
    pub async fn read_segment(
        &self,
        owner: &OwnerId,
        segment_id: &Uuid,
    ) -> Result<ChatLogSegment, StoreError> {
        let path = self.segment_path(owner, segment_id);
        let segment = match Self::read_path(&path).await {
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*segment_id));
            }
            other => other?,
        };
        Self::check_owner(segment, owner)
    }

    async fn read_path(path: &Path) -> Result<ChatLogSegment, StoreError> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn check_owner(segment: ChatLogSegment, owner: &OwnerId) -> Result<ChatLogSegment, StoreError> {
        if &segment.owner_id == owner {
            Ok(segment)
        } else {
            Err(StoreError::Integrity {
                segment_id: segment.segment_id,
                expected: owner.clone(),
                found: segment.owner_id,
            })
        }
    }

    /// Rebuild history for `owner`.
    ///
    /// With `segment_ids`, exactly those segments are read; otherwise the
    /// most recent `recent_segments` by capture time. Messages come back in
    /// capture order, limited to the last `history_limit`. Missing, corrupt
    /// or foreign segments are skipped with a warning.
    pub async fn load(
        &self,
        owner: &OwnerId,
        segment_ids: Option<&[Uuid]>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut segments = match segment_ids {
            Some(ids) => self.read_named(owner, ids).await,
            None => self.read_recent(owner).await?,
        };

        segments.sort_by_key(ChatLogSegment::order_key);

        let mut messages: Vec<Message> = segments.into_iter().flat_map(|s| s.messages).collect();
        let excess = messages.len().saturating_sub(self.config.history_limit);
        messages.drain(..excess);

        debug!("Loaded {} messages for {owner}", messages.len());
        Ok(messages)
    }

    async fn read_named(&self, owner: &OwnerId, ids: &[Uuid]) -> Vec<ChatLogSegment> {
        let mut segments = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_segment(owner, id).await {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!("Skipping segment {id} for {owner}: {e}"),
            }
        }
        segments
    }

    async fn read_recent(&self, owner: &OwnerId) -> Result<Vec<ChatLogSegment>, StoreError> {
        let dir = self.owner_dir(owner);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_path(&path)
                .await
                .and_then(|segment| Self::check_owner(segment, owner))
            {
                Ok(segment) => segments.push(segment),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }

        segments.sort_by_key(|s| std::cmp::Reverse(s.order_key()));
        segments.truncate(self.config.recent_segments);
        Ok(segments)
    }
}
