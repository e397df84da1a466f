//! `hoardput` — ingest files into a hoard blob server, and serve one.
//!
//! # Usage
//!
//! ```text
//! hoardput init                         # generate a signing key
//! hoardput file <path>...               # ingest files or trees
//! hoardput file --rolling <path>...     # content-defined chunking
//! hoardput blob <file>...               # raw blobs, no schema ("-" = stdin)
//! hoardput permanode                    # create a signed permanode
//! hoardput attr <permanode> <attr> <value>        # set-attribute claim
//! hoardput attr --add <permanode> <attr> <value>  # add-attribute claim
//! hoardput attr --del <permanode> <attr>          # del-attribute claim
//! hoardput share <blobref>              # share a blob by reference
//! hoardput remove <blobref>...          # remove blobs from the server
//! hoardput serve                        # run a blob server
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use hoard_chunk::ChunkMode;
use hoard_client::{FjallCache, PutResult, UploadClient, Uploader, UploaderConfig};
use hoard_index::{IndexStore, Indexer};
use hoard_jsonsign::{
    CachingKeyFetcher, KeyFetcher, Keyring, KeyringFetcher, PassphraseSource, SignError,
    armored_public_key, generate_signing_key,
};
use hoard_schema::{new_add_attribute_claim, new_del_attribute_claim, new_set_attribute_claim};
use hoard_server::{BlobServer, BlobServerConfig};
use hoard_store::FileStore;
use hoard_types::{BlobRef, HashAlgo};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "hoardput", version, about = "Content-addressed personal data store client")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key and store it in the keyring.
    Init,
    /// Ingest files, directory trees, or symlinks.
    File {
        /// Use content-defined chunking.
        #[arg(long)]
        rolling: bool,
        /// Paths to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Upload raw blobs without any schema ("-" reads stdin).
    Blob {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Create and upload a signed permanode.
    Permanode,
    /// Create and upload an attribute claim on a permanode.
    Attr {
        /// Add the value instead of replacing (add-attribute).
        #[arg(long, conflicts_with = "del")]
        add: bool,
        /// Delete the attribute (del-attribute; value is ignored).
        #[arg(long)]
        del: bool,
        /// Ref of the target permanode.
        permanode: String,
        /// Attribute name.
        attribute: String,
        /// Attribute value (not used with --del).
        value: Option<String>,
    },
    /// Share a blob by reference.
    Share {
        /// Ref of the blob to share.
        blobref: String,
        /// Allow the share to be followed through referenced blobs.
        #[arg(long)]
        transitive: bool,
    },
    /// Remove blobs from the server.
    Remove {
        #[arg(required = true)]
        blobrefs: Vec<String>,
    },
    /// Run a blob server.
    Serve {
        /// Listen address (overrides config).
        #[arg(short, long)]
        listen: Option<String>,
    },
}

/// Passphrase from a configured environment variable; empty when the
/// variable is not configured, canceled when configured but unset.
struct CliPassphrase {
    var: Option<String>,
}

impl PassphraseSource for CliPassphrase {
    fn passphrase(&self, _desc: &str, _attempt: u32) -> Result<String, SignError> {
        match &self.var {
            Some(var) => match std::env::var(var) {
                Ok(pass) => Ok(pass),
                Err(_) => Ok(String::new()),
            },
            None => Ok(String::new()),
        }
    }
}

fn make_uploader(config: &CliConfig, rolling: bool) -> Result<Arc<Uploader>> {
    let client = Arc::new(UploadClient::new(
        &config.server.url,
        &config.server.username,
        &config.server.password,
    )?);

    let chunk_mode = if rolling || config.upload.rolling {
        ChunkMode::Rolling
    } else {
        ChunkMode::default()
    };
    let defaults = UploaderConfig::default();
    let mut uploader = Uploader::new(
        client,
        UploaderConfig {
            file_concurrency: config
                .upload
                .file_concurrency
                .unwrap_or(defaults.file_concurrency),
            dir_fanout: config.upload.dir_fanout.unwrap_or(defaults.dir_fanout),
            chunk_mode,
        },
    )?;

    if let Some(cache_dir) = config.cache_dir() {
        let cache = Arc::new(FjallCache::open(cache_dir)?);
        uploader = uploader.with_stat_cache(cache.clone()).with_have_cache(cache);
    }

    if let Some(signer) = &config.keys.signer {
        let signer = BlobRef::parse(signer).context("bad [keys].signer in config")?;
        let key_fetcher: Arc<dyn KeyFetcher> =
            Arc::new(CachingKeyFetcher::new(KeyringFetcher::new(
                config.keyring_path(),
                CliPassphrase {
                    var: config.keys.passphrase_env.clone(),
                },
            )));
        uploader = uploader.with_signer(signer, key_fetcher);
    }

    Ok(Arc::new(uploader))
}

fn print_result(pr: &PutResult) {
    println!("{}", pr.blob_ref);
}

async fn run_init(config: &CliConfig) -> Result<()> {
    let path = config.keyring_path();
    let passphrase = CliPassphrase {
        var: config.keys.passphrase_env.clone(),
    }
    .passphrase("Choose a passphrase for the new key.", 0)?;

    let key = generate_signing_key();
    let mut ring = Keyring::load(&path)?;
    let key_id = ring.add_key(&key, &passphrase)?;
    ring.save(&path)?;

    let pubkey = armored_public_key(&key.verifying_key());
    let signer_ref = BlobRef::from_data(HashAlgo::Sha1, pubkey.as_bytes());

    // Best effort: push the public-key blob so camliSigner resolves
    // server-side. Signing still works locally without it.
    match UploadClient::new(
        &config.server.url,
        &config.server.username,
        &config.server.password,
    ) {
        Ok(client) => match client
            .upload(hoard_client::UploadHandle::from_data(Bytes::from(pubkey)))
            .await
        {
            Ok(_) => info!(%signer_ref, "uploaded public key blob"),
            Err(e) => eprintln!("note: could not upload public key blob: {e}"),
        },
        Err(e) => eprintln!("note: could not reach server: {e}"),
    }

    println!("generated key {key_id}");
    println!("keyring: {}", path.display());
    println!("add to {}:", CliConfig::default_path().display());
    println!("\n[keys]\nsigner = \"{signer_ref}\"");
    Ok(())
}

async fn run_file(config: &CliConfig, rolling: bool, paths: &[PathBuf]) -> Result<()> {
    let uploader = make_uploader(config, rolling)?;
    let mut failed = false;
    for path in paths {
        match uploader.clone().upload_path(path).await {
            Ok(pr) => print_result(&pr),
            Err(e) => {
                eprintln!("error putting {}: {e}", path.display());
                failed = true;
            }
        }
    }
    if failed {
        bail!("some uploads failed");
    }
    Ok(())
}

async fn run_blob(config: &CliConfig, files: &[String]) -> Result<()> {
    let uploader = make_uploader(config, false)?;
    for file in files {
        let pr = if file == "-" {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            uploader.upload_blob_data(Bytes::from(data)).await?
        } else {
            uploader.upload_file_blob(std::path::Path::new(file)).await?
        };
        print_result(&pr);
    }
    Ok(())
}

async fn run_attr(
    config: &CliConfig,
    add: bool,
    del: bool,
    permanode: &str,
    attribute: &str,
    value: Option<&str>,
) -> Result<()> {
    let permanode = BlobRef::parse(permanode).context("bad permanode ref")?;
    let mut claim = if del {
        new_del_attribute_claim(&permanode, attribute)
    } else {
        let value = value.context("attribute value required")?;
        if add {
            new_add_attribute_claim(&permanode, attribute, value)
        } else {
            new_set_attribute_claim(&permanode, attribute, value)
        }
    };

    let uploader = make_uploader(config, false)?;
    let pr = uploader.upload_and_sign_map(&mut claim).await?;
    print_result(&pr);
    Ok(())
}

async fn run_remove(config: &CliConfig, blobrefs: &[String]) -> Result<()> {
    let refs = blobrefs
        .iter()
        .map(|s| BlobRef::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .context("bad blobref")?;
    let uploader = make_uploader(config, false)?;
    uploader.client().remove_blobs(&refs).await?;
    Ok(())
}

async fn run_serve(config: &CliConfig, listen: Option<String>) -> Result<()> {
    let data_dir = config.data_dir();
    let storage = Arc::new(FileStore::new(&data_dir)?);

    let indexer = if config.serve.index {
        let store = IndexStore::open(data_dir.join("index"))?;
        Some(Arc::new(Indexer::new(store, storage.clone())))
    } else {
        None
    };

    let server = BlobServer::new(BlobServerConfig {
        storage,
        indexer,
        username: config.server.username.clone(),
        password: config.server.password.clone(),
        base_url: config.serve.base_url.clone(),
    });

    let listen = listen.unwrap_or_else(|| config.serve.listen.clone());
    server.serve(&listen).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::File { rolling, paths } => run_file(&config, rolling, &paths).await,
        Commands::Blob { files } => run_blob(&config, &files).await,
        Commands::Permanode => {
            let uploader = make_uploader(&config, false)?;
            let pr = uploader.upload_new_permanode().await?;
            print_result(&pr);
            Ok(())
        }
        Commands::Attr {
            add,
            del,
            permanode,
            attribute,
            value,
        } => run_attr(&config, add, del, &permanode, &attribute, value.as_deref()).await,
        Commands::Share {
            blobref,
            transitive,
        } => {
            let target = BlobRef::parse(&blobref).context("bad blobref")?;
            let share = hoard_schema::new_share_map(
                hoard_schema::SHARE_HAVE_REF,
                &target,
                transitive,
            );
            let uploader = make_uploader(&config, false)?;
            let pr = uploader.upload_map(&share).await?;
            print_result(&pr);
            Ok(())
        }
        Commands::Remove { blobrefs } => run_remove(&config, &blobrefs).await,
        Commands::Serve { listen } => run_serve(&config, listen).await,
    }
}
