//! HTTP-backed collaborators: JSON-RPC balance reads, the Helius-style holder
//! index, the PumpPortal-style claim endpoint and the Jupiter-style swap API.

use super::{
    BalanceReader, ClaimRequest, ClaimResponse, FeeClaimProvider, HolderIndex, HolderPage,
    IndexedAccount, OperationPayload, OperationPurpose, QuoteRequest, SwapProvider, SwapQuote,
    UnsignedOperation,
};
use crate::error::{Result, RpcError};
use crate::types::{from_base_units, Address, Amount};
use crate::utils::error::compact_error_message;
use crate::utils::rpc::{http_client, JsonRpcClient};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_HTTP_TIMEOUT_MS: u64 = 15_000;
const PROVIDER_ERR_MAX_LEN: usize = 240;

fn provider_client() -> Client {
    http_client(Duration::from_millis(PROVIDER_HTTP_TIMEOUT_MS))
}

fn transport(err: reqwest::Error) -> RpcError {
    RpcError::Transport(compact_error_message(&err.to_string(), PROVIDER_ERR_MAX_LEN))
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ValueEnvelope<T> {
    value: T,
}

#[derive(Deserialize)]
struct KeyedAccount {
    account: ParsedAccount,
}

#[derive(Deserialize)]
struct ParsedAccount {
    data: ParsedData,
}

#[derive(Deserialize)]
struct ParsedData {
    parsed: ParsedInfo,
}

#[derive(Deserialize)]
struct ParsedInfo {
    info: TokenAccountInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccountInfo {
    token_amount: TokenAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAmount {
    amount: String,
    decimals: u8,
    ui_amount: Option<f64>,
}

impl TokenAmount {
    fn ui(&self) -> Amount {
        if let Some(ui) = self.ui_amount.filter(|v| v.is_finite()) {
            return ui;
        }
        self.amount
            .parse::<u64>()
            .map(|raw| from_base_units(raw, self.decimals))
            .unwrap_or(0.0)
    }
}

pub struct RpcBalanceReader {
    rpc: Arc<JsonRpcClient>,
    base_decimals: u8,
}

impl RpcBalanceReader {
    pub fn new(rpc: Arc<JsonRpcClient>, base_decimals: u8) -> Self {
        Self { rpc, base_decimals }
    }

    async fn token_accounts(&self, owner: &Address, mint: &Address) -> Result<Vec<KeyedAccount>> {
        let params = serde_json::json!([
            owner.as_str(),
            { "mint": mint.as_str() },
            { "encoding": "jsonParsed", "commitment": "confirmed" }
        ]);
        let envelope: ValueEnvelope<Vec<KeyedAccount>> =
            self.rpc.call("getTokenAccountsByOwner", params).await?;
        Ok(envelope.value)
    }
}

#[async_trait]
impl BalanceReader for RpcBalanceReader {
    async fn base_balance(&self, owner: &Address) -> Result<Amount> {
        let params = serde_json::json!([owner.as_str(), { "commitment": "confirmed" }]);
        let envelope: ValueEnvelope<u64> = self.rpc.call("getBalance", params).await?;
        Ok(from_base_units(envelope.value, self.base_decimals))
    }

    async fn token_balance(&self, owner: &Address, mint: &Address) -> Result<Amount> {
        let accounts = self.token_accounts(owner, mint).await?;
        Ok(accounts
            .iter()
            .map(|a| a.account.data.parsed.info.token_amount.ui())
            .sum())
    }

    async fn token_account_exists(&self, owner: &Address, mint: &Address) -> Result<bool> {
        Ok(!self.token_accounts(owner, mint).await?.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Holder index
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenAccountsResult {
    #[serde(default)]
    token_accounts: Vec<IndexRow>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct IndexRow {
    owner: String,
    amount: Value,
}

/// The index reports amounts either as JSON numbers or decimal strings.
fn raw_amount(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn parse_holder_page(result: TokenAccountsResult) -> HolderPage {
    let accounts = result
        .token_accounts
        .into_iter()
        .filter_map(|row| {
            let Some(owner) = Address::parse(&row.owner) else {
                tracing::warn!(
                    "[SNAPSHOT] Dropping index row with malformed owner {:?}",
                    compact_error_message(&row.owner, 64)
                );
                return None;
            };
            let amount_units = raw_amount(&row.amount)?;
            Some(IndexedAccount {
                owner,
                amount_units,
            })
        })
        .collect();
    HolderPage {
        accounts,
        next_cursor: result.cursor.filter(|c| !c.is_empty()),
    }
}

pub struct HeliusHolderIndex {
    rpc: JsonRpcClient,
}

impl HeliusHolderIndex {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
        }
    }
}

#[async_trait]
impl HolderIndex for HeliusHolderIndex {
    async fn list_accounts(
        &self,
        mint: &Address,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<HolderPage> {
        let mut params = serde_json::json!({
            "mint": mint.as_str(),
            "limit": limit,
            "options": { "showZeroBalance": false },
        });
        if let (Some(cursor), Some(obj)) = (cursor, params.as_object_mut()) {
            obj.insert("cursor".to_string(), Value::String(cursor.to_string()));
        }
        let result: TokenAccountsResult = self.rpc.call("getTokenAccounts", params).await?;
        Ok(parse_holder_page(result))
    }
}

// ---------------------------------------------------------------------------
// Fee claim
// ---------------------------------------------------------------------------

pub fn is_no_fees_message(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    if lower.contains("no fees") || lower.contains("nothing to claim") {
        return true;
    }
    let tokens: Vec<&str> = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .map(|token| token.trim_end_matches('.'))
        .filter(|token| !token.is_empty())
        .collect();
    tokens.windows(2).any(|pair| pair == ["0", "sol"])
}

pub struct PumpPortalClaimProvider {
    url: String,
    client: Client,
}

impl PumpPortalClaimProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: provider_client(),
        }
    }
}

#[async_trait]
impl FeeClaimProvider for PumpPortalClaimProvider {
    async fn request_claim(&self, request: &ClaimRequest) -> Result<ClaimResponse> {
        let payload = serde_json::json!({
            "action": "collectCreatorFee",
            "pool": "pump",
            "priorityFee": request.priority_fee,
            "publicKey": request.treasury.as_str(),
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if is_no_fees_message(&body) {
                return Ok(ClaimResponse::NoFees);
            }
            return Err(RpcError::Api {
                endpoint: self.url.clone(),
                status: status.as_u16(),
                body: compact_error_message(&body, PROVIDER_ERR_MAX_LEN),
            }
            .into());
        }

        let bytes = resp.bytes().await.map_err(transport)?;
        if bytes.is_empty() {
            return Err(RpcError::Decode {
                endpoint: self.url.clone(),
                reason: "empty claim transaction".to_string(),
            }
            .into());
        }
        Ok(ClaimResponse::Operation(UnsignedOperation {
            purpose: OperationPurpose::FeeClaim,
            payload: OperationPayload::Raw(bytes.to_vec()),
        }))
    }
}

// ---------------------------------------------------------------------------
// Swap
// ---------------------------------------------------------------------------

fn parse_quote(request: &QuoteRequest, raw: Value) -> Option<SwapQuote> {
    if raw.get("error").is_some() {
        return None;
    }
    let out_amount_units = raw.get("outAmount").and_then(raw_amount)?;
    let in_amount_units = raw
        .get("inAmount")
        .and_then(raw_amount)
        .unwrap_or(request.amount_units);
    Some(SwapQuote {
        input_mint: request.input_mint.clone(),
        output_mint: request.output_mint.clone(),
        in_amount_units,
        out_amount_units,
        slippage_bps: request.slippage_bps,
        raw,
    })
}

pub struct JupiterSwapProvider {
    quote_url: String,
    swap_url: String,
    api_key: Option<String>,
    client: Client,
}

impl JupiterSwapProvider {
    pub fn new(
        quote_url: impl Into<String>,
        swap_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            quote_url: quote_url.into(),
            swap_url: swap_url.into(),
            api_key,
            client: provider_client(),
        }
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl SwapProvider for JupiterSwapProvider {
    async fn quote(&self, request: &QuoteRequest) -> Result<Option<SwapQuote>> {
        let amount = request.amount_units.to_string();
        let slippage = request.slippage_bps.to_string();
        let builder = self.client.get(&self.quote_url).query(&[
            ("inputMint", request.input_mint.as_str()),
            ("outputMint", request.output_mint.as_str()),
            ("amount", amount.as_str()),
            ("slippageBps", slippage.as_str()),
        ]);
        let resp = self.with_key(builder).send().await.map_err(transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            // 400 with a route error body means the pair is unroutable right now.
            if status.as_u16() == 400 && body.to_ascii_lowercase().contains("route") {
                return Ok(None);
            }
            return Err(RpcError::Api {
                endpoint: self.quote_url.clone(),
                status: status.as_u16(),
                body: compact_error_message(&body, PROVIDER_ERR_MAX_LEN),
            }
            .into());
        }
        let raw: Value = serde_json::from_str(&body).map_err(|e| RpcError::Decode {
            endpoint: self.quote_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(parse_quote(request, raw))
    }

    async fn build_swap(
        &self,
        quote: &SwapQuote,
        user: &Address,
        priority_fee_lamports: u64,
    ) -> Result<UnsignedOperation> {
        let payload = serde_json::json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user.as_str(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": priority_fee_lamports,
        });
        let builder = self.client.post(&self.swap_url).json(&payload);
        let resp = self.with_key(builder).send().await.map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::Api {
                endpoint: self.swap_url.clone(),
                status: status.as_u16(),
                body: compact_error_message(&body, PROVIDER_ERR_MAX_LEN),
            }
            .into());
        }
        let decoded = resp.json::<SwapResponse>().await.map_err(|e| RpcError::Decode {
            endpoint: self.swap_url.clone(),
            reason: e.to_string(),
        })?;
        match decoded.swap_transaction {
            Some(tx) if !tx.is_empty() => Ok(UnsignedOperation {
                purpose: OperationPurpose::Swap,
                payload: OperationPayload::Encoded(tx),
            }),
            _ => Err(RpcError::Decode {
                endpoint: self.swap_url.clone(),
                reason: decoded
                    .error
                    .unwrap_or_else(|| "missing swapTransaction".to_string()),
            }
            .into()),
        }
    }
}
