use super::utils::*;
use crate::factories::queued_store::{
    QueuedBackingStore, QueuedBackingStoreConfig,
};
use backstore_api::*;
use backstore_test_utils::{
    enable_tracing, id::random_object_id, iter_check, object::make_tree,
    object::proxy_for,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_get_blob_fetches_once() {
    enable_tracing();
    let tc = setup(config(4));
    let blob = tc.remote_blob("dir/file");
    tc.fetcher.pause();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let fut = tc.store.get_blob(blob.id.clone(), FetchContext::null());
            tokio::task::spawn(fut)
        })
        .collect();

    iter_check!({
        if tc.fetcher.calls().len() == 1 {
            break;
        }
    });
    tc.fetcher.resume();

    for task in tasks {
        assert_eq!(blob, task.await.unwrap().unwrap());
    }
    assert_eq!(1, tc.fetcher.fetch_count(&blob.id));
    assert_eq!(1, tc.fetcher.calls().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn get_tree_twice_while_in_flight() {
    let tc = setup(config(2));
    let tree = tc.remote_tree(
        "h1",
        make_tree(&[("a", random_object_id(), TreeEntryKind::File)]),
    );
    tc.fetcher.pause();

    let first = tc.store.get_tree(tree.id.clone(), FetchContext::null());
    iter_check!({
        if tc.fetcher.calls().len() == 1 {
            break;
        }
    });
    // a different caller asks again before the first fetch resolves
    let second = tc.store.get_tree(
        tree.id.clone(),
        Arc::new(FetchContext::new(FetchCause::Fs, Some(1234))),
    );
    tc.fetcher.resume();

    assert_eq!(tree, first.await.unwrap());
    assert_eq!(tree, second.await.unwrap());
    assert_eq!(1, tc.fetcher.fetch_count(&tree.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_hits_bypass_the_queue() {
    let tc = setup(config(1));
    let blob = tc.remote_blob("x");
    let ctx = FetchContext::null();

    tc.store.get_blob(blob.id.clone(), ctx.clone()).await.unwrap();
    assert_eq!(1, ctx.fetch_count(ObjectKind::Blob, FetchOrigin::Queue));

    // the worker persisted the blob, the next read is local
    tc.store.get_blob(blob.id.clone(), ctx.clone()).await.unwrap();
    assert_eq!(
        1,
        ctx.fetch_count(ObjectKind::Blob, FetchOrigin::LocalStore)
    );
    assert_eq!(1, tc.fetcher.calls().len());
}

/// A local store that never keeps anything, so that every read goes
/// through the queue.
fn forgetful_local_store(proxy_path: &'static str) -> DynLocalStore {
    let mut local = MockLocalStore::new();
    local.expect_get_blob().returning(|_| Ok(None));
    local
        .expect_get_proxy()
        .returning(move |id| Ok(Some(proxy_for(proxy_path, id))));
    local.expect_put_blob().returning(|_| Ok(()));
    Arc::new(local)
}

#[tokio::test(flavor = "multi_thread")]
async fn get_blob_after_completion_fetches_again() {
    let blob = backstore_test_utils::object::random_blob();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut fetcher = MockBackingFetcher::new();
    fetcher.expect_fetch_blobs().returning({
        let blob = blob.clone();
        let calls = calls.clone();
        move |items| {
            calls.fetch_add(1, Ordering::SeqCst);
            let out: Vec<StoreResult<Blob>> =
                items.iter().map(|_| Ok(blob.clone())).collect();
            Box::pin(async move { Ok(out) })
        }
    });

    let store = QueuedBackingStore::new(
        QueuedBackingStoreConfig {
            worker_count: 1,
            ..Default::default()
        },
        forgetful_local_store("p"),
        Arc::new(fetcher),
    )
    .unwrap();

    store
        .get_blob(blob.id.clone(), FetchContext::null())
        .await
        .unwrap();
    store
        .get_blob(blob.id.clone(), FetchContext::null())
        .await
        .unwrap();

    assert_eq!(2, calls.load(Ordering::SeqCst));
}
