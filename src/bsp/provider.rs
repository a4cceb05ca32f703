use super::BoardMetadata;
use crate::error::BspGenerationError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Source of board metadata
#[async_trait]
pub trait BspProvider: Send + Sync {
    async fn metadata(&self, board: &str) -> Result<BoardMetadata, BspGenerationError>;
}

/// Serves metadata from memory; unknown boards fail
#[derive(Debug, Default)]
pub struct StaticBspProvider {
    boards: HashMap<String, BoardMetadata>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl StaticBspProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_board(mut self, metadata: BoardMetadata) -> Self {
        self.boards.insert(metadata.board.clone(), metadata);
        self
    }

    /// How many times `board` was requested
    pub fn calls(&self, board: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(board).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BspProvider for StaticBspProvider {
    async fn metadata(&self, board: &str) -> Result<BoardMetadata, BspGenerationError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(board.to_string()).or_insert(0) += 1;
        }

        self.boards
            .get(board)
            .cloned()
            .ok_or_else(|| BspGenerationError {
                board: board.to_string(),
                reason: "unknown board".to_string(),
            })
    }
}
