use crate::error::{Result, StashError};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits a byte stream into fixed-size blocks.
///
/// Forward-only and non-restartable: every block has exactly `block_size`
/// bytes except the last, whose length is in `[1, block_size]`. An empty
/// stream yields no blocks.
pub struct Splitter<R> {
    reader: R,
    block_size: usize,
    done: bool,
}

impl<R: AsyncRead + Unpin> Splitter<R> {
    pub fn new(reader: R, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(StashError::Config(
                "block size must be positive".to_string(),
            ));
        }
        Ok(Self {
            reader,
            block_size,
            done: false,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read the next block, or `None` once the stream is exhausted.
    pub async fn next_block(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.block_size];
        let mut filled = 0usize;
        while filled < self.block_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }

        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(data: Vec<u8>, block_size: usize) -> Vec<Bytes> {
        let mut splitter = Splitter::new(Cursor::new(data), block_size).unwrap();
        let mut blocks = Vec::new();
        while let Some(block) = splitter.next_block().await.unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let blocks = collect(vec![1u8; 120], 40).await;
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == 40));
    }

    #[tokio::test]
    async fn test_partial_last_block() {
        let data: Vec<u8> = (0u8..=99).collect();
        let blocks = collect(data.clone(), 30).await;
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].len(), 30);
        assert_eq!(blocks[3].len(), 10);

        let total: usize = blocks.iter().map(|b| b.len()).sum();
        assert_eq!(total, data.len());

        let rejoined: Vec<u8> = blocks.iter().flat_map(|b| b.iter().copied()).collect();
        assert_eq!(rejoined, data);
    }

    #[tokio::test]
    async fn test_block_count_is_ceiling() {
        for (len, size, expected) in [(0usize, 10usize, 0usize), (9, 10, 1), (10, 10, 1), (11, 10, 2)] {
            let blocks = collect(vec![0u8; len], size).await;
            assert_eq!(blocks.len(), expected, "len={} size={}", len, size);
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut splitter = Splitter::new(Cursor::new(Vec::<u8>::new()), 16).unwrap();
        assert!(splitter.next_block().await.unwrap().is_none());
        assert!(splitter.next_block().await.unwrap().is_none());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let result = Splitter::new(Cursor::new(vec![1u8, 2, 3]), 0);
        assert!(matches!(result, Err(StashError::Config(_))));
    }
}
