//! Signed permanodes and claims, end to end: sign client-side, verify and
//! index server-side, replay the current-value view.

use std::sync::Arc;

use hoard_client::{Uploader, UploaderConfig};
use hoard_integration_tests::{SignerEnv, TestServer};
use hoard_schema::{new_del_attribute_claim, new_set_attribute_claim};
use hoard_store::SeekFetcher;

async fn signed_uploader(server: &TestServer, signer: &SignerEnv) -> Arc<Uploader> {
    Arc::new(
        Uploader::new(server.client(), UploaderConfig::default())
            .unwrap()
            .with_signer(signer.signer_ref.clone(), signer.key_fetcher.clone()),
    )
}

/// Signing output ends with the camliSig splice, and the server verifies
/// the uploaded permanode's signature shape.
#[tokio::test]
async fn test_permanode_signing_shape() {
    let server = TestServer::spawn().await;
    let signer = SignerEnv::new(&server).await;
    let uploader = signed_uploader(&server, &signer).await;

    let pr = uploader.upload_new_permanode().await.unwrap();

    let raw = server.storage.fetch(&pr.blob_ref).await.unwrap().unwrap();
    let text = std::str::from_utf8(&raw).unwrap();
    assert!(text.ends_with("\"}\n"));
    assert!(text.contains(",\"camliSig\":\""));

    let verified = hoard_jsonsign::VerifyRequest::new(text, &*server.storage)
        .verify()
        .await
        .unwrap();
    assert_eq!(verified.signer, signer.signer_ref);

    // The server indexed the permanode row with its signer.
    let row = server
        .indexer
        .store()
        .get_permanode(&pr.blob_ref)
        .unwrap()
        .unwrap();
    assert_eq!(row.signer.as_deref(), Some(signer.signer_ref.to_string().as_str()));
}

/// S4: a set-attribute then del-attribute on `tag` leaves the
/// current-value view empty while both rows stay in the table.
#[tokio::test]
async fn test_tag_set_then_del() {
    let server = TestServer::spawn().await;
    let signer = SignerEnv::new(&server).await;
    let uploader = signed_uploader(&server, &signer).await;

    let pn = uploader.upload_new_permanode().await.unwrap().blob_ref;

    let mut set_claim = new_set_attribute_claim(&pn, "tag", "foo");
    uploader.upload_and_sign_map(&mut set_claim).await.unwrap();
    let mut del_claim = new_del_attribute_claim(&pn, "tag");
    uploader.upload_and_sign_map(&mut del_claim).await.unwrap();

    let store = server.indexer.store();
    assert!(
        store
            .current_attr_values(&pn.to_string(), "tag")
            .unwrap()
            .is_empty(),
        "deleted tag must not appear in the current view"
    );
    assert_eq!(
        store.attr_rows(&pn.to_string(), "tag").unwrap().len(),
        2,
        "both claim rows must remain"
    );
}

/// Claims replay in claimDate order to produce the current view.
#[tokio::test]
async fn test_attribute_replay_order() {
    let server = TestServer::spawn().await;
    let signer = SignerEnv::new(&server).await;
    let uploader = signed_uploader(&server, &signer).await;

    let pn = uploader.upload_new_permanode().await.unwrap().blob_ref;

    for value in ["first", "second", "third"] {
        let mut claim = new_set_attribute_claim(&pn, "title", value);
        uploader.upload_and_sign_map(&mut claim).await.unwrap();
    }

    let values = server
        .indexer
        .store()
        .current_attr_values(&pn.to_string(), "title")
        .unwrap();
    assert_eq!(values, vec!["third"]);
}

/// add-attribute accumulates values; del-attribute with a value removes
/// just that value.
#[tokio::test]
async fn test_multi_valued_tags() {
    let server = TestServer::spawn().await;
    let signer = SignerEnv::new(&server).await;
    let uploader = signed_uploader(&server, &signer).await;

    let pn = uploader.upload_new_permanode().await.unwrap().blob_ref;

    for tag in ["alpha", "beta"] {
        let mut claim = hoard_schema::new_add_attribute_claim(&pn, "tag", tag);
        uploader.upload_and_sign_map(&mut claim).await.unwrap();
    }

    let values = server
        .indexer
        .store()
        .current_attr_values(&pn.to_string(), "tag")
        .unwrap();
    assert_eq!(values, vec!["alpha", "beta"]);
}

/// Path claims land in the path index with the active flag tracking the
/// claim type.
#[tokio::test]
async fn test_camli_path_claims() {
    let server = TestServer::spawn().await;
    let signer = SignerEnv::new(&server).await;
    let uploader = signed_uploader(&server, &signer).await;

    let root = uploader.upload_new_permanode().await.unwrap().blob_ref;
    let target = uploader.upload_new_permanode().await.unwrap().blob_ref;

    let mut claim = new_set_attribute_claim(&root, "camliPath:photos/2011", &target.to_string());
    uploader.upload_and_sign_map(&mut claim).await.unwrap();

    let store = server.indexer.store();
    let key_id = store.get_signer_key_id(&signer.signer_ref).unwrap().unwrap();
    let rows = store.path_rows(&key_id, &root.to_string()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].suffix, "photos/2011");
    assert_eq!(rows[0].target_ref.as_deref(), Some(target.to_string().as_str()));
    assert!(rows[0].active);
}
