//! `identitykit`: developer CLI over the encrypted token store.
//!
//! Keys, blobs and stores live under `--data-dir` (by default the user's data
//! directory), backed by the portable filesystem implementations of the
//! platform traits.

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use eyre::{bail, eyre, WrapErr};
use identitykit_core::{
    platform::{FileKeystore, FileNameValueStore, FsBlobStore, NameValueStore},
    IdentityKitConfig, ReencryptionParams, Reencrypter, StorageHelper, StorageSettings,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_PACKAGE_NAME: &str = "dev.identitykit.cli";

#[derive(Parser, Debug)]
#[command(name = "identitykit", version, about = "Encrypted token storage toolbox")]
struct Cli {
    /// JSON settings file. Defaults apply when omitted.
    #[arg(long, global = true, env = "IDENTITYKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding keys, blobs and stores.
    #[arg(long, global = true, env = "IDENTITYKIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a value with the preferred key.
    Encrypt { value: String },
    /// Decrypt a value produced by any known key.
    Decrypt { value: String },
    /// Print which key family produced a value.
    Classify { value: String },
    /// Print the key `encrypt` would use.
    KeyType,
    /// Delete the platform key. Existing values become unreadable.
    RotateKey,
    /// Print the thumbprint of the platform key.
    Thumbprint,
    /// Work with an encrypted name-value store.
    Store {
        /// Store name.
        name: String,
        #[command(subcommand)]
        command: StoreCommand,
    },
    /// Re-encrypt a store from one key to another.
    Reencrypt {
        /// Store name.
        name: String,
        /// Settings the store is currently encrypted under. Values are
        /// re-encrypted with the key of the active settings.
        #[arg(long)]
        from_config: PathBuf,
        /// Stop at the first failing entry.
        #[arg(long)]
        abort_on_error: bool,
        /// Remove failing entries.
        #[arg(long)]
        erase_entry_on_error: bool,
        /// Remove every entry at the first failure.
        #[arg(long)]
        erase_all_on_error: bool,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Encrypt and store a value.
    Put { key: String, value: String },
    /// Read and decrypt a value.
    Get { key: String },
    /// Remove a value.
    Remove { key: String },
    /// List keys with their key family.
    List,
    /// Remove every value.
    Clear,
}

struct Workspace {
    data_dir: PathBuf,
    settings: StorageSettings,
}

impl Workspace {
    fn load(cli: &Cli) -> eyre::Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| eyre!("no data directory on this platform, pass --data-dir"))?
                .join("identitykit"),
        };
        let settings = match &cli.config {
            Some(path) => IdentityKitConfig::from_path(path)?.storage,
            None => StorageSettings::new(DEFAULT_PACKAGE_NAME),
        };
        tracing::debug!(data_dir = %data_dir.display(), package = %settings.package_name, "workspace loaded");
        Ok(Self { data_dir, settings })
    }

    fn helper(&self) -> eyre::Result<StorageHelper> {
        self.helper_with(self.settings.clone())
    }

    fn helper_with(&self, settings: StorageSettings) -> eyre::Result<StorageHelper> {
        let keystore = Arc::new(FileKeystore::new(self.data_dir.join("keystore"))?);
        let blobs = Arc::new(FsBlobStore::new(self.data_dir.join("blobs"))?);
        Ok(StorageHelper::new(settings, keystore, blobs)?)
    }

    fn store(&self, name: &str) -> eyre::Result<FileNameValueStore> {
        Ok(FileNameValueStore::open(self.data_dir.join("stores"), name)?)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "identitykit_core=debug,identitykit=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_store(workspace: &Workspace, name: &str, command: StoreCommand) -> eyre::Result<()> {
    let store = workspace.store(name)?;
    match command {
        StoreCommand::Put { key, value } => {
            let encrypted = workspace.helper()?.encrypt(&value)?;
            store.put(key, encrypted)?;
        }
        StoreCommand::Get { key } => {
            let Some(value) = store.get(key.clone())? else {
                bail!("no entry named {key}");
            };
            println!("{}", workspace.helper()?.decrypt(&value)?);
        }
        StoreCommand::Remove { key } => store.remove(key)?,
        StoreCommand::List => {
            for line in list_entries(&workspace.helper()?, &store)? {
                println!("{line}");
            }
        }
        StoreCommand::Clear => store.clear()?,
    }
    Ok(())
}

/// One `key<TAB>family` line per entry, sorted by key. A value that cannot
/// be classified is listed as malformed instead of ending the listing.
fn list_entries(
    helper: &StorageHelper,
    store: &dyn NameValueStore,
) -> eyre::Result<Vec<String>> {
    let mut entries: Vec<_> = store.get_all()?.into_iter().collect();
    entries.sort();
    Ok(entries
        .into_iter()
        .map(|(key, value)| match helper.encryption_type(&value) {
            Ok(family) => format!("{key}\t{family}"),
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "unclassifiable entry");
                format!("{key}\t<malformed: {err}>")
            }
        })
        .collect())
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let workspace = Workspace::load(&cli)?;

    match cli.command {
        Command::Encrypt { value } => println!("{}", workspace.helper()?.encrypt(&value)?),
        Command::Decrypt { value } => println!("{}", workspace.helper()?.decrypt(&value)?),
        Command::Classify { value } => {
            println!("{}", workspace.helper()?.encryption_type(&value)?);
        }
        Command::KeyType => println!("{}", workspace.helper()?.key_type_for_encryption()),
        Command::RotateKey => {
            workspace.helper()?.reset_key_pair()?;
            eprintln!("platform key deleted, a new one is generated on next encrypt");
        }
        Command::Thumbprint => match workspace.helper()?.current_thumbprint()? {
            Some(thumbprint) => println!("{thumbprint}"),
            None => eprintln!("no platform key yet"),
        },
        Command::Store { name, command } => run_store(&workspace, &name, command)?,
        Command::Reencrypt {
            name,
            from_config,
            abort_on_error,
            erase_entry_on_error,
            erase_all_on_error,
        } => {
            let store = workspace.store(&name)?;
            let source = IdentityKitConfig::from_path(&from_config)
                .wrap_err_with(|| format!("reading {}", from_config.display()))?;
            let decrypter = workspace.helper_with(source.storage)?;
            let encrypter = workspace.helper()?;
            let params = ReencryptionParams {
                abort_on_error,
                erase_entry_on_error,
                erase_all_on_error,
            };
            let result = Reencrypter::new().reencrypt(&store, &encrypter, &decrypter, params)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "total_records": result.total_records,
                    "failed_records": result.failed_records,
                    "failures_by_type": result.failures_by_type,
                }))?
            );
        }
    }
    Ok(())
}
