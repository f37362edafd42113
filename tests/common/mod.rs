use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;

use crabdb::index::btree::{BPlusTree, GenericKey};
use crabdb::storage::buffer::BufferPoolManager;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

#[allow(dead_code)]
pub fn init_logger() {
    Lazy::force(&LOGGER);
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_logger();
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

#[allow(dead_code)]
pub type TestKey = GenericKey<8>;

// Create a B+Tree with small node sizes so splits and merges trigger quickly
#[allow(dead_code)]
pub fn create_test_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> Result<(BPlusTree<TestKey>, Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let tree = BPlusTree::new("test_index", buffer_pool.clone(), leaf_max, internal_max)?;
    Ok((tree, buffer_pool, file))
}
