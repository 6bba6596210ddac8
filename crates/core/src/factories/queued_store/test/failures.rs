use super::utils::*;
use crate::factories::queued_store::{
    PrefetchFailurePolicy, QueuedBackingStore, QueuedBackingStoreConfig,
};
use backstore_api::*;
use backstore_test_utils::{
    id::random_object_id,
    object::{proxy_for, random_blob},
};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread")]
async fn one_bad_object_does_not_spoil_the_batch() {
    let tc = setup(config(1));
    let blocker = tc.occupy_worker().await;

    let blobs: Vec<Blob> =
        (0..10).map(|i| tc.remote_blob(&format!("f{i}"))).collect();
    let bad = blobs[3].id.clone();
    tc.fetcher
        .fail_object(bad.clone(), StoreError::not_found(bad.clone(), "gone"));

    let futs: Vec<_> = blobs
        .iter()
        .map(|b| tc.store.get_blob(b.id.clone(), FetchContext::null()))
        .collect();
    // a second waiter of the bad object sees the same failure
    let bad_again = tc.store.get_blob(bad.clone(), FetchContext::null());

    tc.fetcher.resume();
    blocker.await.unwrap();

    for (i, (blob, fut)) in blobs.iter().zip(futs).enumerate() {
        let res = fut.await;
        if i == 3 {
            assert!(res.unwrap_err().is_not_found());
        } else {
            assert_eq!(blob, &res.unwrap());
        }
    }
    assert!(bad_again.await.unwrap_err().is_not_found());

    // all ten went out in a single call
    assert_eq!(10, tc.fetcher.calls()[1].ids.len());
    assert!(!tc.local.has_blob(&bad));
    assert!(tc.local.has_blob(&blobs[4].id));
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_failure_fails_the_whole_batch() {
    let tc = setup(config(1));
    let blocker = tc.occupy_worker().await;

    let a = tc.remote_blob("a");
    let b = tc.remote_blob("b");
    let fa = tc.store.get_blob(a.id.clone(), FetchContext::null());
    let fb = tc.store.get_blob(b.id.clone(), FetchContext::null());

    tc.fetcher
        .set_transport_failure(Some(StoreError::remote("connection reset")));
    tc.fetcher.resume();

    assert!(blocker.await.is_err());
    let ea = fa.await.unwrap_err();
    let eb = fb.await.unwrap_err();
    assert!(matches!(ea, StoreError::Remote { .. }));
    assert_eq!(ea.to_string(), eb.to_string());

    // not retried by the pipeline, but a later request fetches again
    tc.fetcher.set_transport_failure(None);
    assert_eq!(
        a,
        tc.store.get_blob(a.id.clone(), FetchContext::null()).await.unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_fetcher_does_not_kill_the_worker() {
    let tc = setup(config(1));
    let blob = tc.remote_blob("boom");

    tc.fetcher.set_panic(true);
    let err = tc
        .store
        .get_blob(blob.id.clone(), FetchContext::null())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Remote { .. }), "{err:?}");

    // the only worker is still alive
    tc.fetcher.set_panic(false);
    assert_eq!(
        blob,
        tc.store
            .get_blob(blob.id.clone(), FetchContext::null())
            .await
            .unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_fetch_result_fails_every_item() {
    let mut fetcher = MockBackingFetcher::new();
    fetcher
        .expect_fetch_trees()
        .returning(|_| Box::pin(async move { Ok(Vec::new()) }));

    let mut local = MockLocalStore::new();
    local.expect_get_tree().returning(|_| Ok(None));
    local
        .expect_get_proxy()
        .returning(|id| Ok(Some(proxy_for("t", id))));

    let store = QueuedBackingStore::new(
        QueuedBackingStoreConfig {
            worker_count: 1,
            ..Default::default()
        },
        Arc::new(local),
        Arc::new(fetcher),
    )
    .unwrap();

    let err = store
        .get_tree(random_object_id(), FetchContext::null())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Remote { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_proxy_fails_without_enqueueing() {
    let tc = setup(config(1));
    let unknown = random_object_id();

    let err = tc
        .store
        .get_blob(unknown.clone(), FetchContext::null())
        .await
        .unwrap_err();
    assert!(
        matches!(&err, StoreError::MissingProxy { id } if *id == unknown),
        "{err:?}"
    );
    let err = tc
        .store
        .get_tree(unknown, FetchContext::null())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingProxy { .. }));

    assert!(tc.fetcher.calls().is_empty());
    assert_eq!(0, tc.store.pending_import_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_remote_object_is_not_found() {
    let tc = setup(config(1));
    let id = random_object_id();
    tc.local.put_proxy(&id, &proxy_for("nowhere", &id)).unwrap();

    let err = tc
        .store
        .get_blob(id, FetchContext::null())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

fn prefetch_case(policy: PrefetchFailurePolicy) -> (TestCase, Vec<ObjectId>) {
    let tc = setup(QueuedBackingStoreConfig {
        prefetch_failure_policy: policy,
        ..config(2)
    });
    let good = tc.remote_blob("good");
    let bad = tc.remote_blob("bad");
    tc.fetcher
        .fail_object(bad.id.clone(), StoreError::remote("corrupt"));
    (tc, vec![good.id, bad.id])
}

#[tokio::test(flavor = "multi_thread")]
async fn prefetch_failure_policies() {
    let (tc, ids) = prefetch_case(PrefetchFailurePolicy::BestEffort);
    tc.store
        .prefetch_blobs(ids.clone(), FetchContext::null())
        .await
        .unwrap();
    assert!(tc.local.has_blob(&ids[0]));

    let (tc, ids) = prefetch_case(PrefetchFailurePolicy::WaitAll);
    assert!(tc
        .store
        .prefetch_blobs(ids.clone(), FetchContext::null())
        .await
        .is_err());
    // the good member was still imported
    assert!(tc.local.has_blob(&ids[0]));

    let (tc, ids) = prefetch_case(PrefetchFailurePolicy::FailFast);
    assert!(tc
        .store
        .prefetch_blobs(ids, FetchContext::null())
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn best_effort_prefetch_skips_objects_without_proxy() {
    let tc = setup(config(1));
    let known = tc.remote_blob("known");
    let unknown = random_blob();

    tc.store
        .prefetch_blobs(
            vec![known.id.clone(), unknown.id.clone()],
            FetchContext::null(),
        )
        .await
        .unwrap();
    assert!(tc.local.has_blob(&known.id));
    assert_eq!(0, tc.fetcher.fetch_count(&unknown.id));

    let tc = setup(QueuedBackingStoreConfig {
        prefetch_failure_policy: PrefetchFailurePolicy::WaitAll,
        ..config(1)
    });
    let err = tc
        .store
        .prefetch_blobs(vec![unknown.id], FetchContext::null())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingProxy { .. }));
}
