//! `playtime credential set|show`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use playtime_core::{Credential, CredentialError, CredentialStore, FileCredentialStore};

use super::Env;

#[derive(Subcommand, Debug)]
pub enum CredentialCommand {
    /// Store the bucket credentials under a key.
    Set(SetArgs),
    /// Print a stored credential with the secret redacted.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Credential entry; defaults to the configured credential key.
    #[arg(long)]
    pub key: Option<String>,

    #[arg(long)]
    pub bucket: String,

    /// `file:///path/to/folder` stores the bucket in a local or synced folder.
    #[arg(long)]
    pub endpoint: String,

    #[arg(long, default_value = "")]
    pub region: String,

    #[arg(long, default_value = "")]
    pub access_key_id: String,

    /// Read from PLAYTIME_SECRET_ACCESS_KEY when not given.
    #[arg(long, env = "PLAYTIME_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
    pub secret_access_key: String,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub key: Option<String>,
}

pub fn run(command: CredentialCommand) -> Result<()> {
    let env = Env::load()?;
    let store = FileCredentialStore::in_dir(&env.data_dir);
    let default_key = env.config.credential_key().to_string();

    match command {
        CredentialCommand::Set(args) => {
            let key = args.key.unwrap_or(default_key);
            let credential = Credential {
                access_key_id: args.access_key_id,
                secret_access_key: args.secret_access_key,
                bucket_name: args.bucket,
                region: args.region,
                endpoint: args.endpoint,
            };
            credential.validate(&key)?;
            store
                .save(&key, &credential)
                .with_context(|| format!("failed to save credential '{key}'"))?;
            println!("✓ Saved credential '{key}' to {}", store.path().display());
        }
        CredentialCommand::Show(args) => {
            let key = args.key.unwrap_or(default_key);
            match store.load(&key) {
                Ok(credential) => {
                    println!("key:           {key}");
                    println!("bucket:        {}", credential.bucket_name);
                    println!("endpoint:      {}", credential.endpoint);
                    if !credential.region.is_empty() {
                        println!("region:        {}", credential.region);
                    }
                    if !credential.access_key_id.is_empty() {
                        println!("access key id: {}", credential.access_key_id);
                    }
                    let secret = if credential.secret_access_key.is_empty() {
                        "(none)"
                    } else {
                        "********"
                    };
                    println!("secret:        {secret}");
                }
                Err(CredentialError::NotFound(_)) => {
                    println!("No credential stored under '{key}'.");
                }
                Err(err) => return Err(err).context("failed to read credentials"),
            }
        }
    }
    Ok(())
}
