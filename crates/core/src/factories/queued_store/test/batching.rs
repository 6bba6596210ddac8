use super::utils::*;
use crate::factories::{
    mem_backing_fetcher::FetchCall, queued_store::QueuedBackingStoreConfig,
};
use backstore_api::*;
use backstore_test_utils::{
    id::random_object_id,
    object::{make_tree, random_blob},
};
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread")]
async fn batches_never_mix_kinds_and_keep_order() {
    let tc = setup(QueuedBackingStoreConfig {
        blob_batch_size: 4,
        tree_batch_size: 3,
        ..config(1)
    });
    let blocker = tc.occupy_worker().await;

    let mut blob_ids = Vec::new();
    let mut tree_ids = Vec::new();
    let mut futs = Vec::new();
    for i in 0..6 {
        let blob = tc.remote_blob(&format!("b{i}"));
        let name = format!("e{i}");
        let entry = (name.as_str(), random_object_id(), TreeEntryKind::File);
        let tree = tc.remote_tree(&format!("t{i}"), make_tree(&[entry]));
        blob_ids.push(blob.id.clone());
        tree_ids.push(tree.id.clone());
        let b = tc.store.get_blob(blob.id, FetchContext::null());
        let t = tc.store.get_tree(tree.id, FetchContext::null());
        futs.push(Box::pin(async move {
            b.await?;
            t.await?;
            StoreResult::Ok(())
        }));
    }

    tc.fetcher.resume();
    blocker.await.unwrap();
    for fut in futs {
        fut.await.unwrap();
    }

    // the first call was the blocker
    let calls: Vec<FetchCall> =
        tc.fetcher.calls().into_iter().skip(1).collect();
    let mut seen_blobs = Vec::new();
    let mut seen_trees = Vec::new();
    for call in calls.iter() {
        match call.kind {
            ImportKind::Blob => {
                assert!(call.ids.len() <= 4, "{call:?}");
                seen_blobs.extend(call.ids.iter().cloned());
            }
            ImportKind::Tree => {
                assert!(call.ids.len() <= 3, "{call:?}");
                seen_trees.extend(call.ids.iter().cloned());
            }
            ImportKind::Prefetch => panic!("unexpected prefetch {call:?}"),
        }
    }
    assert_eq!(blob_ids, seen_blobs);
    assert_eq!(tree_ids, seen_trees);

    // with a single worker, everything queued behind the blocker was
    // taken in full batches
    assert_eq!(4, calls.len());
    assert_eq!(ImportKind::Blob, calls[0].kind);
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_workers_overlap_latency() {
    let tc = setup(QueuedBackingStoreConfig {
        blob_batch_size: 10,
        ..config(4)
    });
    tc.fetcher.set_latency(Duration::from_millis(50));

    let blobs: Vec<Blob> =
        (0..40).map(|i| tc.remote_blob(&format!("f{i}"))).collect();

    let start = Instant::now();
    let futs: Vec<_> = blobs
        .iter()
        .map(|b| tc.store.get_blob(b.id.clone(), FetchContext::null()))
        .collect();
    let results = futures::future::join_all(futs).await;
    let elapsed = start.elapsed();

    for (blob, result) in blobs.iter().zip(results) {
        assert_eq!(blob, &result.unwrap());
    }

    // One request per call would take 40 * 50ms / 4 workers = 500ms.
    assert!(
        elapsed < Duration::from_millis(450),
        "took {elapsed:?} for {} calls",
        tc.fetcher.calls().len()
    );
    for call in tc.fetcher.calls() {
        assert!(call.ids.len() <= 10);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn prefetch_warms_the_local_store() {
    let tc = setup(config(2));
    let blobs: Vec<Blob> =
        (0..5).map(|i| tc.remote_blob(&format!("p{i}"))).collect();
    let cached = random_blob();
    tc.local.put_blob(&cached).unwrap();

    let mut ids: Vec<ObjectId> = blobs.iter().map(|b| b.id.clone()).collect();
    ids.push(cached.id.clone());

    tc.store
        .prefetch_blobs(
            ids,
            std::sync::Arc::new(FetchContext::new(FetchCause::Prefetch, None)),
        )
        .await
        .unwrap();

    for blob in blobs.iter() {
        assert!(tc.local.has_blob(&blob.id));
    }
    let calls = tc.fetcher.calls();
    assert!(calls.iter().all(|c| c.kind == ImportKind::Prefetch));
    // the cached blob was never requested
    assert_eq!(0, tc.fetcher.fetch_count(&cached.id));
    assert_eq!(5, calls.iter().map(|c| c.ids.len()).sum::<usize>());
}

#[tokio::test(flavor = "multi_thread")]
async fn prefetch_of_cached_blobs_resolves_immediately() {
    let tc = setup(config(1));
    let blob = random_blob();
    tc.local.put_blob(&blob).unwrap();

    tc.store
        .prefetch_blobs(vec![blob.id], FetchContext::null())
        .await
        .unwrap();
    tc.store
        .prefetch_blobs(vec![], FetchContext::null())
        .await
        .unwrap();
    assert!(tc.fetcher.calls().is_empty());
}
