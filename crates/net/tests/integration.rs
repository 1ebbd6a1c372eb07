//! Integration test: spin up a block server plus a leader and two
//! followers with real gRPC, then drive the client-visible protocol:
//! versioned uploads, conflict and missing-block rejections, the sync
//! client's retry loop, and crash / catch-up convergence.

use blocksync_block::BlockStore;
use blocksync_common::{block_hash, FileRecord, NodeAddr, WriteOutcome, TOMBSTONE};
use blocksync_meta::restore::{spawn_restore_task, RestoreTaskConfig};
use blocksync_meta::{MetadataNode, Role};
use blocksync_net::{build_block_server, build_meta_server, GrpcBlockClient, GrpcPeerClient};
use blocksync_proto::block::block_store_client::BlockStoreClient;
use blocksync_proto::common as pb;
use blocksync_proto::meta::metadata_store_client::MetadataStoreClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tonic::transport::Channel;

struct TestCluster {
    block_addr: SocketAddr,
    leader_addr: SocketAddr,
    follower_addrs: Vec<NodeAddr>,
}

/// Spawn a full cluster from a config document, wiring nodes the same
/// way the `metad` binary does.
async fn spawn_cluster(base_port: u16) -> TestCluster {
    let yaml = format!(
        r#"
nodes:
  - name: meta1
    addr: "127.0.0.1:{p1}"
  - name: meta2
    addr: "127.0.0.1:{p2}"
  - name: meta3
    addr: "127.0.0.1:{p3}"
leader: meta1
block_store: "127.0.0.1:{p0}"
replication:
  push_timeout_ms: 2000
"#,
        p0 = base_port,
        p1 = base_port + 1,
        p2 = base_port + 2,
        p3 = base_port + 3,
    );
    let config = blocksync_config::load_from_str(&yaml).unwrap();

    // Block server first: the leader dials it on the first write.
    let store = Arc::new(RwLock::new(BlockStore::new()));
    let block_addr = config.block_store;
    let block_router = build_block_server(store);
    tokio::spawn(async move {
        block_router.serve(block_addr).await.unwrap();
    });

    let rpc_timeout = Duration::from_millis(config.replication.rpc_timeout_ms);
    let push_timeout = Duration::from_millis(config.replication.push_timeout_ms);

    let mut leader_addr = None;
    for entry in &config.nodes {
        let peers = Arc::new(GrpcPeerClient::new(rpc_timeout));
        let role = if config.is_leader(&entry.name) {
            leader_addr = Some(entry.addr);
            Role::Leader {
                followers: config.peers_of(&entry.name),
                blocks: Arc::new(GrpcBlockClient::new(config.block_store, rpc_timeout)),
            }
        } else {
            Role::Follower {
                leader: config.leader_addr().unwrap().clone(),
            }
        };
        let node = Arc::new(MetadataNode::new(entry.name.clone(), role, peers, push_timeout));
        let addr = entry.addr;
        let router = build_meta_server(node);
        tokio::spawn(async move {
            router.serve(addr).await.unwrap();
        });
    }

    // Wait for servers to be ready
    tokio::time::sleep(Duration::from_millis(150)).await;

    TestCluster {
        block_addr: config.block_store,
        leader_addr: leader_addr.unwrap(),
        follower_addrs: config.peers_of("meta1"),
    }
}

async fn meta_client(addr: SocketAddr) -> MetadataStoreClient<Channel> {
    MetadataStoreClient::connect(format!("http://{}", addr))
        .await
        .unwrap()
}

async fn block_client(addr: SocketAddr) -> BlockStoreClient<Channel> {
    BlockStoreClient::connect(format!("http://{}", addr))
        .await
        .unwrap()
}

/// Upload a chunk and return its hash.
async fn put_block(client: &mut BlockStoreClient<Channel>, data: &[u8]) -> String {
    let hash = block_hash(data);
    client
        .store_block(blocksync_proto::block::Block {
            hash: hash.clone(),
            data: data.to_vec(),
        })
        .await
        .unwrap();
    hash
}

async fn modify(
    client: &mut MetadataStoreClient<Channel>,
    filename: &str,
    version: u64,
    blocklist: Vec<String>,
) -> WriteOutcome {
    let resp = client
        .modify_file(pb::FileInfo {
            filename: filename.to_string(),
            version,
            blocklist,
        })
        .await
        .unwrap();
    blocksync_net::convert::outcome_from_result(&resp.into_inner())
}

async fn read(client: &mut MetadataStoreClient<Channel>, filename: &str) -> FileRecord {
    let info = client
        .read_file(blocksync_proto::meta::FileRequest {
            filename: filename.to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    FileRecord::new(info.version, info.blocklist)
}

/// The sync client's write loop: terminates only on OK or NOT_LEADER;
/// re-reads on OLD_VERSION, uploads missing chunks on MISSING_BLOCKS.
async fn upload(
    meta: &mut MetadataStoreClient<Channel>,
    blocks: &mut BlockStoreClient<Channel>,
    filename: &str,
    chunks: &[&[u8]],
) -> WriteOutcome {
    let blocklist: Vec<String> = chunks.iter().map(|c| block_hash(c)).collect();
    loop {
        let current = read(meta, filename).await.version;
        match modify(meta, filename, current + 1, blocklist.clone()).await {
            WriteOutcome::Ok(v) => return WriteOutcome::Ok(v),
            WriteOutcome::NotLeader => return WriteOutcome::NotLeader,
            WriteOutcome::OldVersion(_) => continue,
            WriteOutcome::MissingBlocks(missing) => {
                for hash in &missing {
                    let chunk = chunks
                        .iter()
                        .find(|c| &block_hash(c) == hash)
                        .expect("server reported a hash the client never sent");
                    put_block(blocks, chunk).await;
                }
            }
        }
    }
}

#[tokio::test]
async fn test_block_store_roundtrip() {
    let cluster = spawn_cluster(18000).await;
    let mut client = block_client(cluster.block_addr).await;

    client.ping(pb::Empty {}).await.unwrap();

    let data = b"hello blocks".to_vec();
    let hash = block_hash(&data);

    let before = client
        .has_block(blocksync_proto::block::BlockRequest { hash: hash.clone() })
        .await
        .unwrap()
        .into_inner();
    assert!(!before.answer);

    put_block(&mut client, &data).await;

    let after = client
        .has_block(blocksync_proto::block::BlockRequest { hash: hash.clone() })
        .await
        .unwrap()
        .into_inner();
    assert!(after.answer);

    let got = client
        .get_block(blocksync_proto::block::BlockRequest { hash })
        .await
        .unwrap()
        .into_inner();
    assert!(got.found);
    assert_eq!(got.block.unwrap().data, data);

    let miss = client
        .get_block(blocksync_proto::block::BlockRequest {
            hash: "deadbeef".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!miss.found, "unknown hash is a data-level miss, not a fault");
}

#[tokio::test]
async fn test_upload_conflict_and_missing_blocks() {
    let cluster = spawn_cluster(18010).await;
    let mut meta = meta_client(cluster.leader_addr).await;
    let mut blocks = block_client(cluster.block_addr).await;

    let h1 = put_block(&mut blocks, b"chunk-1").await;
    let h2 = put_block(&mut blocks, b"chunk-2").await;
    let h3 = block_hash(b"chunk-3"); // never uploaded

    assert_eq!(
        modify(&mut meta, "a.txt", 1, vec![h1.clone(), h2.clone()]).await,
        WriteOutcome::Ok(1)
    );
    assert_eq!(
        modify(&mut meta, "a.txt", 1, vec![h1.clone(), h2.clone()]).await,
        WriteOutcome::OldVersion(1)
    );
    assert_eq!(
        modify(&mut meta, "a.txt", 2, vec![h1.clone(), h3.clone()]).await,
        WriteOutcome::MissingBlocks(vec![h3])
    );

    let rec = read(&mut meta, "a.txt").await;
    assert_eq!(rec.version, 1);
    assert_eq!(rec.blocks, vec![h1, h2]);

    // Delete tombstones at the supplied version.
    let del = meta
        .delete_file(blocksync_proto::meta::DeleteRequest {
            filename: "a.txt".to_string(),
            version: 2,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        blocksync_net::convert::outcome_from_result(&del),
        WriteOutcome::Ok(2)
    );

    let rec = read(&mut meta, "a.txt").await;
    assert_eq!(rec.version, 2);
    assert_eq!(rec.blocks, vec![TOMBSTONE.to_string()]);
}

#[tokio::test]
async fn test_follower_rejects_writes_and_serves_reads() {
    let cluster = spawn_cluster(18020).await;
    let mut leader = meta_client(cluster.leader_addr).await;
    let mut blocks = block_client(cluster.block_addr).await;
    let mut follower = meta_client(cluster.follower_addrs[0].addr).await;

    let is_leader = follower.is_leader(pb::Empty {}).await.unwrap().into_inner();
    assert!(!is_leader.answer);

    assert_eq!(
        modify(&mut follower, "a.txt", 1, vec![block_hash(b"x")]).await,
        WriteOutcome::NotLeader
    );

    // Commit on the leader; the synchronous push means the follower has
    // the record by the time the write returns.
    let h = put_block(&mut blocks, b"payload").await;
    assert_eq!(
        modify(&mut leader, "a.txt", 1, vec![h.clone()]).await,
        WriteOutcome::Ok(1)
    );

    let rec = read(&mut follower, "a.txt").await;
    assert_eq!(rec.version, 1);
    assert_eq!(rec.blocks, vec![h]);
}

#[tokio::test]
async fn test_get_version_unseen_is_data_miss() {
    let cluster = spawn_cluster(18030).await;
    let mut meta = meta_client(cluster.leader_addr).await;

    let resp = meta
        .get_version(blocksync_proto::meta::FileRequest {
            filename: "never.txt".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!resp.found);

    // A read lazily tracks the file at version 0; GetVersion then finds it.
    read(&mut meta, "never.txt").await;
    let resp = meta
        .get_version(blocksync_proto::meta::FileRequest {
            filename: "never.txt".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(resp.found);
    assert_eq!(resp.version, 0);
}

#[tokio::test]
async fn test_client_retry_loop_terminates_on_ok() {
    let cluster = spawn_cluster(18040).await;
    let mut meta = meta_client(cluster.leader_addr).await;
    let mut blocks = block_client(cluster.block_addr).await;

    // Nothing uploaded yet: the first attempt earns MISSING_BLOCKS for
    // every chunk, the loop uploads exactly those and retries.
    let chunks: Vec<&[u8]> = vec![b"part-one", b"part-two", b"part-three"];
    let outcome = upload(&mut meta, &mut blocks, "big.bin", &chunks).await;
    assert_eq!(outcome, WriteOutcome::Ok(1));

    let rec = read(&mut meta, "big.bin").await;
    let want: Vec<String> = chunks.iter().map(|c| block_hash(c)).collect();
    assert_eq!(rec.blocks, want);

    // A second upload of new content advances the version.
    let chunks2: Vec<&[u8]> = vec![b"part-four"];
    let outcome = upload(&mut meta, &mut blocks, "big.bin", &chunks2).await;
    assert_eq!(outcome, WriteOutcome::Ok(2));
}

#[tokio::test]
async fn test_retry_loop_against_follower_stops_at_not_leader() {
    let cluster = spawn_cluster(18050).await;
    let mut follower = meta_client(cluster.follower_addrs[0].addr).await;
    let mut blocks = block_client(cluster.block_addr).await;

    let chunks: Vec<&[u8]> = vec![b"nope"];
    let outcome = upload(&mut follower, &mut blocks, "a.txt", &chunks).await;
    assert_eq!(outcome, WriteOutcome::NotLeader);
}

#[tokio::test]
async fn test_crash_then_restore_converges_to_leader_state() {
    let cluster = spawn_cluster(18060).await;
    let mut leader = meta_client(cluster.leader_addr).await;
    let mut blocks = block_client(cluster.block_addr).await;
    let crashed_addr = cluster.follower_addrs[0].addr;
    let healthy_addr = cluster.follower_addrs[1].addr;
    let mut crashed = meta_client(crashed_addr).await;
    let mut healthy = meta_client(healthy_addr).await;

    crashed.crash(pb::Empty {}).await.unwrap();
    let flag = crashed.is_crashed(pb::Empty {}).await.unwrap().into_inner();
    assert!(flag.answer);

    // Several committed writes while one follower is out, including an
    // overwrite so the crashed node must converge to the latest state,
    // not an intermediate version.
    let h1 = put_block(&mut blocks, b"v1").await;
    let h2 = put_block(&mut blocks, b"v2").await;
    assert_eq!(modify(&mut leader, "f1", 1, vec![h1.clone()]).await, WriteOutcome::Ok(1));
    assert_eq!(modify(&mut leader, "f1", 2, vec![h2.clone()]).await, WriteOutcome::Ok(2));
    assert_eq!(modify(&mut leader, "f2", 1, vec![h1.clone()]).await, WriteOutcome::Ok(1));

    // The healthy follower tracked everything; the crashed one dropped it.
    assert_eq!(read(&mut healthy, "f1").await.version, 2);
    let stale = crashed
        .get_version(blocksync_proto::meta::FileRequest {
            filename: "f1".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!stale.found, "appends are silently dropped while crashed");

    // Nudge the follower; it pulls the log and latest records.
    crashed.restore(pb::Empty {}).await.unwrap();
    let flag = crashed.is_crashed(pb::Empty {}).await.unwrap().into_inner();
    assert!(!flag.answer);

    for filename in ["f1", "f2"] {
        let on_leader = leader
            .get_current_record(blocksync_proto::meta::FileRequest {
                filename: filename.to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        let on_follower = crashed
            .get_current_record(blocksync_proto::meta::FileRequest {
                filename: filename.to_string(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(on_leader.found && on_follower.found);
        assert_eq!(on_leader.info, on_follower.info, "{} diverged", filename);
    }
}

#[tokio::test]
async fn test_periodic_nudge_heals_without_explicit_restore() {
    let cluster = spawn_cluster(18070).await;
    let mut leader = meta_client(cluster.leader_addr).await;
    let mut blocks = block_client(cluster.block_addr).await;
    let mut follower = meta_client(cluster.follower_addrs[0].addr).await;

    // The leader-side timer, as metad runs it, with a short interval.
    let nudger = Arc::new(GrpcPeerClient::new(Duration::from_secs(2)));
    let handle = spawn_restore_task(
        nudger,
        cluster.follower_addrs.clone(),
        RestoreTaskConfig {
            interval: Duration::from_millis(100),
            call_timeout: Duration::from_secs(2),
        },
    );

    follower.crash(pb::Empty {}).await.unwrap();
    let h = put_block(&mut blocks, b"healed").await;
    assert_eq!(modify(&mut leader, "f", 1, vec![h.clone()]).await, WriteOutcome::Ok(1));

    // Within a few ticks the follower self-heals.
    let mut healed = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let flag = follower.is_crashed(pb::Empty {}).await.unwrap().into_inner();
        if !flag.answer {
            healed = true;
            break;
        }
    }
    handle.abort();
    assert!(healed, "follower never recovered");

    let rec = read(&mut follower, "f").await;
    assert_eq!((rec.version, rec.blocks), (1, vec![h]));
}

#[tokio::test]
async fn test_print_log_and_admin_stats() {
    let cluster = spawn_cluster(18080).await;
    let mut meta = meta_client(cluster.leader_addr).await;

    read(&mut meta, "x.txt").await;
    read(&mut meta, "y.txt").await;
    read(&mut meta, "x.txt").await;

    let dump = meta.print_log(pb::Empty {}).await.unwrap().into_inner();
    assert_eq!(dump.entries, vec!["x.txt", "y.txt", "x.txt"]);

    let length = meta
        .get_log_length(pb::Empty {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(length.length, 3);

    let mut admin = blocksync_proto::admin::admin_client::AdminClient::connect(format!(
        "http://{}",
        cluster.leader_addr
    ))
    .await
    .unwrap();

    let health = admin
        .health(blocksync_proto::admin::HealthRequest {})
        .await
        .unwrap()
        .into_inner();
    assert!(health.healthy);
    assert_eq!(health.node, "meta1");
    assert_eq!(health.role, "leader");

    let stats = admin
        .get_stats(blocksync_proto::admin::StatsRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.log_length, 3);
    assert!(!stats.crashed);
}
