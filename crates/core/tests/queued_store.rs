//! End-to-end tests of a backing store built through the builder.

use backstore_api::*;
use backstore_core::{
    default_builder, default_test_builder,
    factories::{
        mem_backing_fetcher::{
            MemBackingFetcherConfig, MemBackingFetcherModConfig,
        },
        queued_store::{
            PrefetchFailurePolicy, QueuedBackingStoreConfig,
            QueuedBackingStoreModConfig,
        },
        MemBackingFetcher, MemBackingFetcherFactory, MemLocalStore,
        MemLocalStoreFactory, QueuedBackingStore,
    },
};
use backstore_test_utils::{
    enable_tracing,
    id::random_root_id,
    iter_check,
    object::{make_blob, make_tree, proxy_for},
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: DynBackingStore,
    local: Arc<MemLocalStore>,
    fetcher: Arc<MemBackingFetcher>,
}

async fn build(config: QueuedBackingStoreConfig) -> Harness {
    let local = Arc::new(MemLocalStore::new());
    let fetcher = Arc::new(MemBackingFetcher::default());
    let mut builder = default_builder(
        MemLocalStoreFactory::with_store(local.clone()),
        MemBackingFetcherFactory::with_fetcher(fetcher.clone()),
    )
    .with_default_config()
    .unwrap();
    builder
        .config
        .replace_module_config(&QueuedBackingStoreModConfig {
            queued_backing_store: config,
        })
        .unwrap();
    let store = builder.build().await.unwrap();
    Harness {
        store,
        local,
        fetcher,
    }
}

fn queued(store: &DynBackingStore) -> &QueuedBackingStore {
    store
        .as_any()
        .downcast_ref::<QueuedBackingStore>()
        .expect("default builder builds a queued backing store")
}

#[tokio::test(flavor = "multi_thread")]
async fn default_test_builder_builds() {
    let store = default_test_builder()
        .with_default_config()
        .unwrap()
        .build()
        .await
        .unwrap();
    let config = queued(&store).config();
    assert_eq!(32, config.worker_count);
    assert_eq!(128, config.blob_batch_size);
    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_is_rejected() {
    for config in [
        QueuedBackingStoreConfig {
            worker_count: 0,
            ..Default::default()
        },
        QueuedBackingStoreConfig {
            tree_batch_size: 0,
            ..Default::default()
        },
        QueuedBackingStoreConfig {
            log_fetch_path_regex: Some("(unclosed".into()),
            ..Default::default()
        },
    ] {
        let mut builder = default_test_builder().with_default_config().unwrap();
        builder
            .config
            .replace_module_config(&QueuedBackingStoreModConfig {
                queued_backing_store: config,
            })
            .unwrap();
        let err = builder.build().await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidArgument { .. }),
            "{err:?}"
        );
    }
}

#[test]
fn config_uses_camel_case_keys() {
    let mut config = Config::default();
    config
        .set_module_config(&QueuedBackingStoreModConfig::default())
        .unwrap();
    let json = serde_json::to_value(&config).unwrap();
    let module = &json["queuedBackingStore"];
    assert_eq!(32, module["workerCount"]);
    assert_eq!(4, module["prefetchBatchSize"]);
    assert_eq!("bestEffort", module["prefetchFailurePolicy"]);
    assert_eq!(5000, module["shutdownTimeoutMs"]);

    // partial configs fall back to defaults
    let config: Config = serde_json::from_value(serde_json::json!({
        "queuedBackingStore": {
            "workerCount": 3,
            "prefetchFailurePolicy": "failFast",
        }
    }))
    .unwrap();
    let module: QueuedBackingStoreModConfig =
        config.get_module_config().unwrap();
    assert_eq!(3, module.queued_backing_store.worker_count);
    assert_eq!(32, module.queued_backing_store.tree_batch_size);
    assert_eq!(
        PrefetchFailurePolicy::FailFast,
        module.queued_backing_store.prefetch_failure_policy
    );

    // the in-memory fetcher publishes its own defaults alongside
    let mut config = Config::default();
    config
        .set_module_config(&MemBackingFetcherModConfig {
            mem_backing_fetcher: MemBackingFetcherConfig { latency_ms: 7 },
        })
        .unwrap();
    assert_eq!(
        7,
        serde_json::to_value(&config).unwrap()["memBackingFetcher"]
            ["latencyMs"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn checkout_like_fan_in() {
    enable_tracing();
    let h = build(QueuedBackingStoreConfig {
        worker_count: 4,
        ..Default::default()
    })
    .await;

    // a root with one directory of 50 files
    let files: Vec<Blob> = (0..50)
        .map(|i| make_blob(format!("file {i}").as_bytes()))
        .collect();
    let names: Vec<String> = (0..50).map(|i| format!("f{i:02}")).collect();
    let entries: Vec<(&str, ObjectId, TreeEntryKind)> = names
        .iter()
        .zip(files.iter())
        .map(|(n, b)| (n.as_str(), b.id.clone(), TreeEntryKind::File))
        .collect();
    let dir = make_tree(&entries);
    let root_tree =
        make_tree(&[("dir", dir.id.clone(), TreeEntryKind::Directory)]);
    for blob in files.iter() {
        h.fetcher.insert_blob(blob.clone());
    }
    h.fetcher.insert_tree(dir.clone());
    h.fetcher.insert_tree(root_tree.clone());
    let root = random_root_id();
    h.fetcher.insert_root(root.clone(), root_tree.id.clone());

    let got = h
        .store
        .get_root_tree(root, FetchContext::null())
        .await
        .unwrap();
    assert_eq!(root_tree, got);
    let got = h
        .store
        .get_tree(dir.id.clone(), FetchContext::null())
        .await
        .unwrap();
    assert_eq!(dir, got);

    // three readers per file, all racing
    let mut futs = Vec::new();
    for _ in 0..3 {
        for blob in files.iter() {
            futs.push(h.store.get_blob(blob.id.clone(), FetchContext::null()));
        }
    }
    let results = futures::future::join_all(futs).await;
    for (i, res) in results.into_iter().enumerate() {
        assert_eq!(files[i % 50], res.unwrap());
    }

    for blob in files.iter() {
        assert_eq!(1, h.fetcher.fetch_count(&blob.id));
        assert!(h.local.has_blob(&blob.id));
    }
    assert_eq!(
        "dir/f07",
        h.local.get_proxy(&files[7].id).unwrap().unwrap().path
    );

    h.store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_a_slow_import() {
    let h = build(QueuedBackingStoreConfig {
        worker_count: 2,
        shutdown_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    h.fetcher.set_latency(Duration::from_secs(60));

    let blobs: Vec<Blob> = (0..8)
        .map(|i| {
            let blob = make_blob(format!("slow {i}").as_bytes());
            h.fetcher.insert_blob(blob.clone());
            h.local
                .put_proxy(&blob.id, &proxy_for(&format!("s{i}"), &blob.id))
                .unwrap();
            blob
        })
        .collect();
    let futs: Vec<_> = blobs
        .iter()
        .map(|b| h.store.get_blob(b.id.clone(), FetchContext::null()))
        .collect();

    // a worker is stuck in a fetch
    iter_check!({
        if !h.fetcher.calls().is_empty() {
            break;
        }
    });

    tokio::time::timeout(Duration::from_secs(5), h.store.shutdown())
        .await
        .expect("shutdown hung");
    for res in futures::future::join_all(futs).await {
        assert!(res.unwrap_err().is_shutdown());
    }
}
