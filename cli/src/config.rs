use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use solana_sdk::signature::Keypair;
use unlocker_client::Selector;

/// Resolve the CLI flags into exactly one selector.
///
/// Zero or more than one populated group is a configuration error; it
/// aborts before any network activity.
pub fn load_selector(
    collections: &[String],
    creators: &[String],
    hashlist: Option<&Path>,
) -> Result<Selector> {
    let populated =
        [!collections.is_empty(), !creators.is_empty(), hashlist.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
    if populated != 1 {
        bail!("pass exactly one of --collection, --creator or --hashlist");
    }

    if !collections.is_empty() {
        return Ok(Selector::Collections(collections.to_vec()));
    }
    if !creators.is_empty() {
        return Ok(Selector::Creators(creators.to_vec()));
    }

    let path = hashlist.expect("hashlist flag checked above");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read hashlist {}", path.display()))?;
    let mints: Vec<String> = serde_json::from_str(&raw)
        .map_err(|_| anyhow!("invalid hashlist - please pass a path to a JSON array of mints"))?;
    Ok(Selector::Assets(mints))
}

/// Load signing key material from either a base58 secret or a JSON
/// keypair file; exactly one source must be given.
pub fn load_keypair(secret: Option<&str>, keypair_path: Option<&Path>) -> Result<Keypair> {
    let bytes = match (secret, keypair_path) {
        (Some(secret), None) => bs58::decode(secret)
            .into_vec()
            .context("secret key is not valid base58")?,
        (None, Some(path)) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read keypair {}", path.display()))?;
            serde_json::from_str::<Vec<u8>>(&raw)
                .context("keypair file is not a JSON byte array")?
        }
        _ => bail!("must provide exactly one of --secret or --keypair"),
    };
    Keypair::try_from(bytes.as_slice()).map_err(|err| anyhow!("invalid signing key: {err}"))
}

const DEFAULT_REGISTRY_TEMPLATE: &str = "https://mainnet.helius-rpc.com/?api-key=";

/// The registry endpoint: an explicit URL wins, otherwise one is built
/// from the API key.
pub fn registry_url(explicit: Option<String>, api_key: Option<String>) -> Result<String> {
    if let Some(url) = explicit {
        return Ok(url);
    }
    let key = api_key.ok_or_else(|| anyhow!("set --registry-url or HELIUS_API_KEY"))?;
    Ok(format!("{DEFAULT_REGISTRY_TEMPLATE}{key}"))
}
