use std::sync::Arc;
use std::time::Duration;

use bright::config::RaftSettings;
use bright::consensus::storage::{LogStore, StateMachineStore};
use bright::consensus::BrightNode;
use bright::error::{BrightError, CommandErrorKind};
use bright::models::{Command, Document, IndexConfig};
use bright::store::IndexStore;
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use serde_json::json;
use tempfile::TempDir;

fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn single_node_settings(port: u16) -> RaftSettings {
    RaftSettings {
        node_id: 1,
        bind_addr: format!("127.0.0.1:{}", port),
        advertise_addr: format!("127.0.0.1:{}", port),
        bootstrap: true,
        peers: vec![],
    }
}

async fn wait_for_leader(node: &BrightNode) {
    for _ in 0..100 {
        if node.is_leader().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("node never became leader");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_node_commands_through_consensus() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(IndexStore::open(temp_dir.path().join("data"))?);

    let node = Arc::new(
        BrightNode::new(
            single_node_settings(17101),
            &temp_dir.path().join("raft"),
            Arc::clone(&store),
        )
        .await?,
    );
    node.bootstrap().await?;
    wait_for_leader(&node).await;

    node.apply(
        Command::CreateIndex {
            id: "books".to_string(),
            primary_key: "isbn".to_string(),
            exclude_attributes: vec![],
        },
        Duration::from_secs(10),
    )
    .await?;

    node.apply(
        Command::AddDocuments {
            index_id: "books".to_string(),
            documents: vec![doc(&[
                ("isbn", json!("9780131103627")),
                ("title", json!("The C Programming Language")),
            ])],
        },
        Duration::from_secs(10),
    )
    .await?;

    // The FSM applied on this node; the store must see the document
    let results = store.search("books", "C Programming", 10, 0, &[])?;
    assert!(results.total >= 1);
    assert_eq!(results.hits[0].document["isbn"], "9780131103627");

    node.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logical_errors_surface_without_breaking_the_log(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(IndexStore::open(temp_dir.path().join("data"))?);

    let node = Arc::new(
        BrightNode::new(
            single_node_settings(17102),
            &temp_dir.path().join("raft"),
            Arc::clone(&store),
        )
        .await?,
    );
    node.bootstrap().await?;
    wait_for_leader(&node).await;

    let create = Command::CreateIndex {
        id: "books".to_string(),
        primary_key: "isbn".to_string(),
        exclude_attributes: vec![],
    };
    node.apply(create.clone(), Duration::from_secs(10)).await?;

    // Second create commits as an entry but fails logically
    let err = node
        .apply(create, Duration::from_secs(10))
        .await
        .unwrap_err();
    match err {
        BrightError::Command { kind, .. } => assert_eq!(kind, CommandErrorKind::AlreadyExists),
        other => panic!("unexpected error: {:?}", other),
    }

    // The node keeps accepting writes afterwards
    node.apply(
        Command::AddDocuments {
            index_id: "books".to_string(),
            documents: vec![doc(&[("isbn", json!("1"))])],
        },
        Duration::from_secs(10),
    )
    .await?;
    assert_eq!(store.doc_count("books")?, 1);

    node.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_create_command_is_atomic() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let store = Arc::new(IndexStore::open(temp_dir.path().join("data"))?);

    let node = Arc::new(
        BrightNode::new(
            single_node_settings(17103),
            &temp_dir.path().join("raft"),
            Arc::clone(&store),
        )
        .await?,
    );
    node.bootstrap().await?;
    wait_for_leader(&node).await;

    node.apply(
        Command::AutoCreateAndAddDocuments {
            index_id: "users".to_string(),
            primary_key: "userId".to_string(),
            documents: vec![
                doc(&[("userId", json!("u1")), ("name", json!("a"))]),
                doc(&[("userId", json!("u2")), ("name", json!("b"))]),
            ],
        },
        Duration::from_secs(10),
    )
    .await?;

    let config = store.get_index("users")?;
    assert_eq!(config.primary_key, "userId");
    assert_eq!(store.doc_count("users")?, 2);

    // Re-applying targets the existing index instead of failing
    node.apply(
        Command::AutoCreateAndAddDocuments {
            index_id: "users".to_string(),
            primary_key: "userId".to_string(),
            documents: vec![doc(&[("userId", json!("u3"))])],
        },
        Duration::from_secs(10),
    )
    .await?;
    assert_eq!(store.doc_count("users")?, 3);

    node.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_snapshot_round_trip_restores_config_map() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = TempDir::new()?;
    let source_store = Arc::new(IndexStore::open(source_dir.path().join("data"))?);
    for id in ["books", "users", "orders"] {
        source_store.create_index(IndexConfig::new(id, "id"))?;
    }

    let source_raft = source_dir.path().join("raft");
    let source_log = LogStore::open(&source_raft)?;
    let mut source_sm =
        StateMachineStore::open(&source_raft, source_log.stable_handle(), Arc::clone(&source_store))?;

    let Snapshot { meta, snapshot } = source_sm.build_snapshot().await?;

    // Install into a fresh node: its config map must match the source's
    let target_dir = TempDir::new()?;
    let target_store = Arc::new(IndexStore::open(target_dir.path().join("data"))?);
    let target_raft = target_dir.path().join("raft");
    let target_log = LogStore::open(&target_raft)?;
    let mut target_sm =
        StateMachineStore::open(&target_raft, target_log.stable_handle(), Arc::clone(&target_store))?;

    target_sm.install_snapshot(&meta, snapshot).await?;
    assert_eq!(target_store.get_all_configs(), source_store.get_all_configs());

    // Re-installing the node's own current snapshot is a no-op on the map
    let Snapshot { meta, snapshot } = target_sm
        .get_current_snapshot()
        .await?
        .expect("installed snapshot is readable");
    target_sm.install_snapshot(&meta, snapshot).await?;
    assert_eq!(target_store.get_all_configs(), source_store.get_all_configs());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_survives_log_loss_across_restart() -> Result<(), Box<dyn std::error::Error>>
{
    let temp_dir = TempDir::new()?;
    let data_dir = temp_dir.path().join("data");
    let raft_dir = temp_dir.path().join("raft");

    {
        let store = Arc::new(IndexStore::open(&data_dir)?);
        let node = Arc::new(
            BrightNode::new(single_node_settings(17105), &raft_dir, Arc::clone(&store)).await?,
        );
        node.bootstrap().await?;
        wait_for_leader(&node).await;

        for i in 0..10 {
            node.apply(
                Command::CreateIndex {
                    id: format!("index-{}", i),
                    primary_key: "id".to_string(),
                    exclude_attributes: vec![],
                },
                Duration::from_secs(10),
            )
            .await?;
        }

        node.trigger_snapshot().await?;

        let snapshots_dir = raft_dir.join("snapshots");
        let mut snapshotted = false;
        for _ in 0..50 {
            let has_file = std::fs::read_dir(&snapshots_dir)
                .map(|entries| entries.filter_map(|e| e.ok()).next().is_some())
                .unwrap_or(false);
            if has_file {
                snapshotted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(snapshotted, "snapshot file never appeared");

        node.shutdown().await?;
        drop(node);
    }

    // Losing the log must not lose committed state: the snapshot plus the
    // on-disk index state carry the node back
    std::fs::remove_file(raft_dir.join("raft-log.db"))?;

    let store = Arc::new(IndexStore::open(&data_dir)?);
    let node = Arc::new(
        BrightNode::new(single_node_settings(17105), &raft_dir, Arc::clone(&store)).await?,
    );
    node.bootstrap().await?;
    wait_for_leader(&node).await;

    let configs = store.list_indexes(20, 0);
    assert_eq!(configs.len(), 10);
    for i in 0..10 {
        assert!(store.index_exists(&format!("index-{}", i)));
    }

    node.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_configs_survive_node_restart() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let data_dir = temp_dir.path().join("data");
    let raft_dir = temp_dir.path().join("raft");

    {
        let store = Arc::new(IndexStore::open(&data_dir)?);
        let node = Arc::new(
            BrightNode::new(single_node_settings(17104), &raft_dir, Arc::clone(&store)).await?,
        );
        node.bootstrap().await?;
        wait_for_leader(&node).await;

        for id in ["alpha", "beta", "gamma"] {
            node.apply(
                Command::CreateIndex {
                    id: id.to_string(),
                    primary_key: "id".to_string(),
                    exclude_attributes: vec![],
                },
                Duration::from_secs(10),
            )
            .await?;
        }

        node.shutdown().await?;
        drop(node);
    }

    // Fresh process: the store reloads configs, the raft node restarts from
    // its persisted log and stable store
    let store = Arc::new(IndexStore::open(&data_dir)?);
    assert_eq!(store.list_indexes(20, 0).len(), 3);

    let node = Arc::new(
        BrightNode::new(single_node_settings(17104), &raft_dir, Arc::clone(&store)).await?,
    );
    node.bootstrap().await?;
    wait_for_leader(&node).await;

    node.apply(
        Command::DeleteIndex {
            id: "beta".to_string(),
        },
        Duration::from_secs(10),
    )
    .await?;
    assert_eq!(store.list_indexes(20, 0).len(), 2);

    node.shutdown().await?;
    Ok(())
}
