//! HTTP tool gateway client
//!
//! Each capability is one `POST {base_url}/tools/{tool}` carrying the wallet,
//! the signer key and the tool arguments. The gateway signs and submits; we
//! only relay its JSON answer.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::tools::{ChainTools, ToolContext};
use crate::error::{RelayError, Result};

pub struct GatewayChain {
    base_url: String,
    http: Client,
}

impl GatewayChain {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    #[instrument(skip(self, ctx, args), fields(subscription_id = %ctx.subscription_id))]
    async fn call(&self, tool: &str, ctx: &ToolContext, args: Value) -> Result<Value> {
        let url = format!("{}/tools/{}", self.base_url, tool);
        let body = json!({
            "delegationWalletId": ctx.delegation_wallet_id,
            "privateKey": ctx.signer.expose(),
            "args": args,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::Tool(format!(
                "{} returned {}: {}",
                tool,
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let output: Value = response.json().await?;
        debug!(tool, "gateway call succeeded");
        Ok(output)
    }
}

#[async_trait]
impl ChainTools for GatewayChain {
    async fn read_balance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        address: Option<&str>,
    ) -> Result<Value> {
        self.call(
            "readBalance",
            ctx,
            json!({ "chain": chain, "token": token, "address": address }),
        )
        .await
    }

    async fn transfer(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<Value> {
        self.call(
            "transfer",
            ctx,
            json!({ "chain": chain, "token": token, "to": to, "amount": amount.to_string() }),
        )
        .await
    }

    async fn approve_token(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<Value> {
        self.call(
            "approveToken",
            ctx,
            json!({
                "chain": chain,
                "token": token,
                "spender": spender,
                "amount": amount.to_string(),
            }),
        )
        .await
    }

    async fn check_allowance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        owner: Option<&str>,
    ) -> Result<Value> {
        self.call(
            "checkAllowance",
            ctx,
            json!({ "chain": chain, "token": token, "spender": spender, "owner": owner }),
        )
        .await
    }

    async fn cross_chain_swap(
        &self,
        ctx: &ToolContext,
        from_chain: &str,
        to_chain: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        recipient: Option<&str>,
    ) -> Result<Value> {
        self.call(
            "crossChainSwap",
            ctx,
            json!({
                "fromChain": from_chain,
                "toChain": to_chain,
                "fromToken": from_token,
                "toToken": to_token,
                "amount": amount.to_string(),
                "recipient": recipient,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::request::SecretKey;
    use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
    use std::sync::Arc;

    async fn fake_gateway(
        Path(tool): Path<String>,
        Json(body): Json<Value>,
    ) -> std::result::Result<Json<Value>, (StatusCode, String)> {
        match tool.as_str() {
            "readBalance" => Ok(Json(json!({
                "balance": "12.5",
                "wallet": body["delegationWalletId"],
                "chain": body["args"]["chain"],
            }))),
            _ => Err((StatusCode::BAD_GATEWAY, "rpc unavailable".to_string())),
        }
    }

    async fn spawn_gateway() -> String {
        let app = Router::new().route("/tools/:tool", post(fake_gateway));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn ctx() -> ToolContext {
        ToolContext {
            subscription_id: "S1".into(),
            delegation_wallet_id: "wallet-9".into(),
            signer: Arc::new(SecretKey::new("11".repeat(32))),
        }
    }

    #[tokio::test]
    async fn test_gateway_success_and_failure() {
        let base = spawn_gateway().await;
        let chain = GatewayChain::new(&base, Duration::from_secs(5)).unwrap();

        let out = chain
            .read_balance(&ctx(), "base", "USDC", None)
            .await
            .unwrap();
        assert_eq!(out["balance"], "12.5");
        assert_eq!(out["wallet"], "wallet-9");
        assert_eq!(out["chain"], "base");

        let err = chain
            .transfer(&ctx(), "base", "USDC", "0xbob", Decimal::ONE)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transfer returned 502"));
    }
}
