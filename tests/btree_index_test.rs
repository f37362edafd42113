use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use rand::prelude::*;

use crabdb::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crabdb::index::btree::{decode_node, BPlusTree, BTreeNode};
use crabdb::storage::buffer::BufferPoolManager;

mod common;
use common::{create_test_buffer_pool, create_test_tree, TestKey};

fn key(v: i64) -> TestKey {
    TestKey::from_i64(v)
}

fn rid(v: i64) -> Rid {
    Rid::new(1, v as u32)
}

fn decode_page(
    buffer_pool: &Arc<BufferPoolManager>,
    page_id: PageId,
) -> Result<BTreeNode<TestKey>> {
    let page = buffer_pool.fetch_page(page_id)?;
    let node = {
        let guard = page.read();
        decode_node::<TestKey>(&guard)?
    };
    buffer_pool.unpin_page(page_id, false)?;
    Ok(node)
}

fn collect_keys(tree: &BPlusTree<TestKey>) -> Result<Vec<i64>> {
    Ok(tree.iter()?.map(|(k, _)| k.as_i64()).collect())
}

#[test]
fn test_empty_tree() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(10, 4, 4)?;
    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(1))?, None);
    assert_eq!(collect_keys(&tree)?, Vec::<i64>::new());
    tree.remove(&key(1))?; // removing from an empty tree is a no-op
    Ok(())
}

#[test]
fn test_insert_and_point_lookup() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(10, 4, 4)?;

    for v in [5, 1, 9, 3, 7] {
        assert!(tree.insert(&key(v), rid(v))?);
    }
    assert!(!tree.is_empty());

    for v in [1, 3, 5, 7, 9] {
        assert_eq!(tree.get_value(&key(v))?, Some(rid(v)));
    }
    assert_eq!(tree.get_value(&key(2))?, None);
    assert_eq!(tree.get_value(&key(100))?, None);

    Ok(())
}

#[test]
fn test_duplicate_insert_returns_false() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(10, 4, 4)?;

    assert!(tree.insert(&key(42), rid(42))?);
    assert!(!tree.insert(&key(42), rid(99))?);
    // the original value is untouched
    assert_eq!(tree.get_value(&key(42))?, Some(rid(42)));

    Ok(())
}

#[test]
fn test_leaf_split_shape() -> Result<()> {
    // leaf_max_size = 4: the fifth insert splits the root leaf into
    // {1,2} | {3,4,5} with separator 3 in a fresh internal root
    let (tree, pool, _file) = create_test_tree(10, 4, 4)?;

    for v in 1..=5 {
        assert!(tree.insert(&key(v), rid(v))?);
    }

    let root = match decode_page(&pool, tree.root_page_id())? {
        BTreeNode::Internal(node) => node,
        BTreeNode::Leaf(_) => panic!("root should have split into an internal node"),
    };
    assert_eq!(root.size(), 2);
    assert_eq!(root.key_at(1).as_i64(), 3);

    let left = match decode_page(&pool, root.value_at(0))? {
        BTreeNode::Leaf(node) => node,
        BTreeNode::Internal(_) => panic!("children of a height-2 root are leaves"),
    };
    let right = match decode_page(&pool, root.value_at(1))? {
        BTreeNode::Leaf(node) => node,
        BTreeNode::Internal(_) => panic!("children of a height-2 root are leaves"),
    };

    let left_keys: Vec<i64> = left.entries.iter().map(|(k, _)| k.as_i64()).collect();
    let right_keys: Vec<i64> = right.entries.iter().map(|(k, _)| k.as_i64()).collect();
    assert_eq!(left_keys, vec![1, 2]);
    assert_eq!(right_keys, vec![3, 4, 5]);

    // sibling chain: left -> right -> end
    assert_eq!(left.next_page_id, right.page_id);
    assert_eq!(right.next_page_id, INVALID_PAGE_ID);
    assert_eq!(left.parent_page_id, root.page_id);
    assert_eq!(right.parent_page_id, root.page_id);

    assert_eq!(collect_keys(&tree)?, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_delete_coalesces_back_to_single_leaf() -> Result<()> {
    let (tree, pool, _file) = create_test_tree(10, 4, 4)?;

    for v in 1..=5 {
        tree.insert(&key(v), rid(v))?;
    }
    tree.remove(&key(5))?;
    tree.remove(&key(4))?;

    // the two leaves merged and the root collapsed back to a leaf
    let root = match decode_page(&pool, tree.root_page_id())? {
        BTreeNode::Leaf(node) => node,
        BTreeNode::Internal(_) => panic!("tree should have returned to height 1"),
    };
    let keys: Vec<i64> = root.entries.iter().map(|(k, _)| k.as_i64()).collect();
    assert_eq!(keys, vec![1, 2, 3]);
    assert_eq!(root.parent_page_id, INVALID_PAGE_ID);

    assert_eq!(collect_keys(&tree)?, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_redistribution_updates_separator() -> Result<()> {
    // leaf_max 4, min 2. Leaves {1,2} | {3,4,5,6}: removing 2 underflows
    // the left leaf, which borrows 3 from its right sibling (the pair no
    // longer fits in one node, so no merge).
    let (tree, pool, _file) = create_test_tree(10, 4, 4)?;
    for v in 1..=6 {
        tree.insert(&key(v), rid(v))?;
    }

    tree.remove(&key(2))?;

    let root = match decode_page(&pool, tree.root_page_id())? {
        BTreeNode::Internal(node) => node,
        BTreeNode::Leaf(_) => panic!("tree should still be height 2"),
    };
    assert_eq!(root.key_at(1).as_i64(), 4);
    assert_eq!(collect_keys(&tree)?, vec![1, 3, 4, 5, 6]);

    Ok(())
}

#[test]
fn test_multi_level_growth_and_sorted_iteration() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(50, 4, 4)?;

    let mut values: Vec<i64> = (0..200).collect();
    let mut rng = StdRng::seed_from_u64(7);
    values.shuffle(&mut rng);

    for &v in &values {
        assert!(tree.insert(&key(v), rid(v))?, "duplicate on insert of {}", v);
    }

    let expected: Vec<i64> = (0..200).collect();
    assert_eq!(collect_keys(&tree)?, expected);

    for v in (0..200).step_by(17) {
        assert_eq!(tree.get_value(&key(v))?, Some(rid(v)));
    }

    Ok(())
}

#[test]
fn test_iter_from_starts_at_lower_bound() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(20, 4, 4)?;

    for v in (0..40).step_by(2) {
        tree.insert(&key(v), rid(v))?;
    }

    // present key: starts at it
    let from_ten: Vec<i64> = tree.iter_from(&key(10))?.map(|(k, _)| k.as_i64()).collect();
    assert_eq!(from_ten.first(), Some(&10));
    assert_eq!(from_ten.len(), 15);

    // absent key: starts at the next larger one
    let from_eleven: Vec<i64> = tree.iter_from(&key(11))?.map(|(k, _)| k.as_i64()).collect();
    assert_eq!(from_eleven.first(), Some(&12));

    // past the end: empty
    assert_eq!(tree.iter_from(&key(1000))?.count(), 0);

    Ok(())
}

#[test]
fn test_delete_everything_empties_tree() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(50, 4, 4)?;

    let mut values: Vec<i64> = (0..100).collect();
    let mut rng = StdRng::seed_from_u64(21);
    values.shuffle(&mut rng);

    for &v in &values {
        tree.insert(&key(v), rid(v))?;
    }
    values.shuffle(&mut rng);
    for &v in &values {
        tree.remove(&key(v))?;
    }

    assert!(tree.is_empty());
    assert_eq!(collect_keys(&tree)?, Vec::<i64>::new());
    assert_eq!(tree.get_value(&key(50))?, None);

    // the tree is usable again after being emptied
    assert!(tree.insert(&key(1), rid(1))?);
    assert_eq!(collect_keys(&tree)?, vec![1]);

    Ok(())
}

#[test]
fn test_random_workload_matches_model() -> Result<()> {
    let (tree, _pool, _file) = create_test_tree(64, 4, 5)?;
    let mut model: BTreeMap<i64, Rid> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(1234);

    for _ in 0..2000 {
        let v = rng.gen_range(0..300);
        if rng.gen_bool(0.6) {
            let inserted = tree.insert(&key(v), rid(v))?;
            assert_eq!(inserted, !model.contains_key(&v), "insert disagreement at {}", v);
            model.entry(v).or_insert_with(|| rid(v));
        } else {
            tree.remove(&key(v))?;
            model.remove(&v);
        }
    }

    let tree_keys = collect_keys(&tree)?;
    let model_keys: Vec<i64> = model.keys().copied().collect();
    assert_eq!(tree_keys, model_keys);

    for v in 0..300 {
        assert_eq!(tree.get_value(&key(v))?, model.get(&v).copied());
    }

    Ok(())
}

#[test]
fn test_root_survives_reopen_through_header_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(20)?;

    {
        let tree: BPlusTree<TestKey> =
            BPlusTree::new("orders_pk", buffer_pool.clone(), 4, 4)?;
        for v in 1..=10 {
            tree.insert(&key(v), rid(v))?;
        }
    }

    // a fresh handle on the same name resumes at the recorded root
    let reopened: BPlusTree<TestKey> = BPlusTree::new("orders_pk", buffer_pool.clone(), 4, 4)?;
    assert!(!reopened.is_empty());
    assert_eq!(collect_keys(&reopened)?, (1..=10).collect::<Vec<i64>>());
    assert_eq!(reopened.get_value(&key(7))?, Some(rid(7)));

    Ok(())
}

#[test]
fn test_two_indexes_share_the_header_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(20)?;

    let first: BPlusTree<TestKey> = BPlusTree::new("first", buffer_pool.clone(), 4, 4)?;
    let second: BPlusTree<TestKey> = BPlusTree::new("second", buffer_pool.clone(), 4, 4)?;

    first.insert(&key(1), rid(1))?;
    second.insert(&key(2), rid(2))?;

    assert_ne!(first.root_page_id(), second.root_page_id());
    assert_eq!(first.get_value(&key(2))?, None);
    assert_eq!(second.get_value(&key(1))?, None);

    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(128)?;
    let tree: Arc<BPlusTree<TestKey>> =
        Arc::new(BPlusTree::new("concurrent", buffer_pool, 4, 5)?);

    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 100;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_THREAD {
                let v = t * PER_THREAD + i;
                tree.insert(&key(v), rid(v)).expect("insert failed");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let expected: Vec<i64> = (0..THREADS * PER_THREAD).collect();
    assert_eq!(collect_keys(&tree)?, expected);

    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(128)?;
    let tree: Arc<BPlusTree<TestKey>> =
        Arc::new(BPlusTree::new("mixed", buffer_pool, 4, 5)?);

    for v in 0..100 {
        tree.insert(&key(v), rid(v))?;
    }

    let writer = {
        let tree = tree.clone();
        std::thread::spawn(move || {
            for v in 100..200 {
                tree.insert(&key(v), rid(v)).expect("insert failed");
            }
        })
    };

    // the initial 100 keys stay visible throughout
    for _ in 0..50 {
        let v = 42;
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }

    writer.join().unwrap();
    assert_eq!(collect_keys(&tree)?, (0..200).collect::<Vec<i64>>());

    Ok(())
}
