//! Shared test harness for hoard integration tests.
//!
//! Provides [`TestServer`] — an in-process blob server over a
//! [`MemoryStore`] and a temporary index — and [`SignerEnv`], a throwaway
//! signing identity whose public key is already uploaded to the server.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use hoard_client::{UploadClient, Uploader, UploaderConfig};
use hoard_index::{IndexStore, Indexer};
use hoard_jsonsign::{
    CachingKeyFetcher, KeyFetcher, Keyring, KeyringFetcher, StaticPassphrase, armored_public_key,
    generate_signing_key,
};
use hoard_server::{BlobServer, BlobServerConfig};
use hoard_store::{BlobSink, MemoryStore};
use hoard_types::{BlobRef, HashAlgo};

pub const TEST_USER: &str = "tester";
pub const TEST_PASSWORD: &str = "open-sesame";

/// An in-process blob server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryStore>,
    pub indexer: Arc<Indexer>,
    server_task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let storage = Arc::new(MemoryStore::new());
        let indexer = Arc::new(Indexer::new(
            IndexStore::open_temporary().expect("temp index"),
            storage.clone(),
        ));

        let server = BlobServer::new(BlobServerConfig {
            storage: storage.clone(),
            indexer: Some(indexer.clone()),
            username: TEST_USER.to_string(),
            password: TEST_PASSWORD.to_string(),
            base_url: None,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let server_task = tokio::spawn(async move {
            let _ = server.serve_on(listener).await;
        });

        Self {
            addr,
            storage,
            indexer,
            server_task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> Arc<UploadClient> {
        Arc::new(UploadClient::new(self.url(), TEST_USER, TEST_PASSWORD).expect("client"))
    }

    pub fn uploader(&self) -> Arc<Uploader> {
        Arc::new(Uploader::new(self.client(), UploaderConfig::default()).expect("uploader"))
    }

    /// Kill the server; requests from then on fail at the transport.
    pub fn shutdown(&self) {
        self.server_task.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

/// A throwaway signing identity: fresh key in a temp keyring, public-key
/// blob uploaded to the given server.
pub struct SignerEnv {
    pub signer_ref: BlobRef,
    pub key_fetcher: Arc<dyn KeyFetcher>,
    _dir: tempfile::TempDir,
}

impl SignerEnv {
    pub async fn new(server: &TestServer) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("secring.json");
        let key = generate_signing_key();
        let mut ring = Keyring::default();
        ring.add_key(&key, "test-pass").expect("seal key");
        ring.save(&path).expect("save ring");

        let pubkey = armored_public_key(&key.verifying_key());
        let signer_ref = BlobRef::from_data(HashAlgo::Sha1, pubkey.as_bytes());
        server
            .storage
            .receive(&signer_ref, Bytes::from(pubkey))
            .await
            .expect("store public key");

        let key_fetcher: Arc<dyn KeyFetcher> = Arc::new(CachingKeyFetcher::new(
            KeyringFetcher::new(&path, StaticPassphrase("test-pass".into())),
        ));

        Self {
            signer_ref,
            key_fetcher,
            _dir: dir,
        }
    }
}

/// Deterministic pseudo-random bytes for test payloads.
pub fn test_data_seeded(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect()
}
