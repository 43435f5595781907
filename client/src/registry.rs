use async_trait::async_trait;
use mpl_token_metadata::types::TokenStandard;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::UnlockError;

/// Registry page size. The DAS API caps result pages at 1000 items.
pub const PAGE_LIMIT: u64 = 1000;

/// Maximum number of ids per `getAssetBatch` call.
pub const BATCH_LIMIT: usize = 1000;

/// One value of the registry's indexed lookup families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetFilter {
    Creator(String),
    Collection(String),
    Authority(String),
}

impl AssetFilter {
    pub fn describe(&self) -> String {
        match self {
            AssetFilter::Creator(c) => format!("creator {c}"),
            AssetFilter::Collection(c) => format!("collection {c}"),
            AssetFilter::Authority(a) => format!("authority {a}"),
        }
    }
}

/// One asset's identifying and ownership data as returned by the registry.
///
/// Addresses stay as the opaque base58 strings the registry handed back;
/// they are parsed (and validated) only when the unlock instruction is
/// built, so a malformed record costs that asset, not the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub id: String,
    pub owner: String,
    pub token_standard: Option<TokenStandard>,
}

/// One page of a paginated registry query.
#[derive(Debug, Clone)]
pub struct AssetPage {
    pub items: Vec<AssetRecord>,
    pub total: u64,
    /// Authoritative grand total across all pages. Only reported when the
    /// query asked for it, and only trustworthy after at least one page.
    pub grand_total: Option<u64>,
    pub page: u64,
}

/// Paginated read access to the asset registry.
///
/// Implementations surface network and registry errors to the caller and
/// never retry internally; retry policy belongs to the consumer, which
/// differs per operation type.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch one page of assets matching `filter`. Pages are 1-based.
    async fn search(
        &self,
        filter: &AssetFilter,
        page: u64,
        limit: u64,
    ) -> Result<AssetPage, UnlockError>;

    /// Look up a bounded chunk of assets by id. The caller supplies at most
    /// [`BATCH_LIMIT`] ids; the client does not re-chunk.
    async fn batch(&self, ids: &[String]) -> Result<Vec<AssetRecord>, UnlockError>;
}

/// JSON-RPC client for a DAS (Digital Asset Standard) registry endpoint.
pub struct DasClient {
    http: reqwest::Client,
    url: String,
}

impl DasClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T, UnlockError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(UnlockError::Registry {
                code: err.code,
                message: err.message,
            });
        }
        response.result.ok_or(UnlockError::EmptyResponse)
    }
}

#[async_trait]
impl Registry for DasClient {
    async fn search(
        &self,
        filter: &AssetFilter,
        page: u64,
        limit: u64,
    ) -> Result<AssetPage, UnlockError> {
        let options = json!({ "showGrandTotal": true });
        let (method, params) = match filter {
            AssetFilter::Creator(creator) => (
                "getAssetsByCreator",
                json!({
                    "creatorAddress": creator,
                    "page": page,
                    "limit": limit,
                    "displayOptions": options,
                }),
            ),
            AssetFilter::Collection(collection) => (
                "getAssetsByGroup",
                json!({
                    "groupKey": "collection",
                    "groupValue": collection,
                    "page": page,
                    "limit": limit,
                    "displayOptions": options,
                }),
            ),
            AssetFilter::Authority(authority) => (
                "getAssetsByAuthority",
                json!({
                    "authorityAddress": authority,
                    "page": page,
                    "limit": limit,
                    "displayOptions": options,
                }),
            ),
        };

        let result: DasPage = self.call(method, params).await?;
        Ok(AssetPage {
            total: result.total,
            grand_total: result.grand_total,
            page: result.page,
            items: result.items.into_iter().map(AssetRecord::from).collect(),
        })
    }

    async fn batch(&self, ids: &[String]) -> Result<Vec<AssetRecord>, UnlockError> {
        let result: Vec<Option<DasAsset>> =
            self.call("getAssetBatch", json!({ "ids": ids })).await?;
        Ok(result
            .into_iter()
            .flatten()
            .map(AssetRecord::from)
            .collect())
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct DasPage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    page: u64,
    #[serde(default)]
    grand_total: Option<u64>,
    #[serde(default)]
    items: Vec<DasAsset>,
}

#[derive(Deserialize)]
struct DasAsset {
    id: String,
    #[serde(default)]
    interface: Option<String>,
    #[serde(default)]
    ownership: Option<DasOwnership>,
}

#[derive(Deserialize)]
struct DasOwnership {
    #[serde(default)]
    owner: String,
}

impl From<DasAsset> for AssetRecord {
    fn from(asset: DasAsset) -> Self {
        AssetRecord {
            token_standard: asset
                .interface
                .as_deref()
                .and_then(token_standard_from_interface),
            owner: asset.ownership.map(|o| o.owner).unwrap_or_default(),
            id: asset.id,
        }
    }
}

fn token_standard_from_interface(interface: &str) -> Option<TokenStandard> {
    match interface {
        "V1_NFT" => Some(TokenStandard::NonFungible),
        "V1_PRINT" => Some(TokenStandard::NonFungibleEdition),
        "ProgrammableNFT" => Some(TokenStandard::ProgrammableNonFungible),
        "FungibleAsset" => Some(TokenStandard::FungibleAsset),
        "FungibleToken" => Some(TokenStandard::Fungible),
        _ => None,
    }
}
