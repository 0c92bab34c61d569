//! Chain tool capability set and the invoker that reports every call
//!
//! Each tool invocation produces exactly two events in the run's log:
//! `tool_call` before the call and `tool_result` after it, success or not.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::request::SecretKey;
use super::sink::EventSink;
use crate::error::{RelayError, Result};

/// One tool invocation planned by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "camelCase")]
pub enum ToolCall {
    #[serde(rename_all = "camelCase")]
    ReadBalance {
        chain: String,
        token: String,
        #[serde(default)]
        address: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        chain: String,
        token: String,
        to: String,
        amount: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    ApproveToken {
        chain: String,
        token: String,
        spender: String,
        amount: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    CheckAllowance {
        chain: String,
        token: String,
        spender: String,
        #[serde(default)]
        owner: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CrossChainSwap {
        from_chain: String,
        to_chain: String,
        from_token: String,
        to_token: String,
        amount: Decimal,
        #[serde(default)]
        recipient: Option<String>,
    },
}

fn require(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} is required"))
    } else {
        Ok(())
    }
}

fn require_positive(amount: Decimal) -> std::result::Result<(), String> {
    if amount <= Decimal::ZERO {
        Err(format!("amount must be positive, got {amount}"))
    } else {
        Ok(())
    }
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadBalance { .. } => "readBalance",
            Self::Transfer { .. } => "transfer",
            Self::ApproveToken { .. } => "approveToken",
            Self::CheckAllowance { .. } => "checkAllowance",
            Self::CrossChainSwap { .. } => "crossChainSwap",
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::ReadBalance { chain, token, .. } => {
                require("chain", chain)?;
                require("token", token)
            }
            Self::Transfer {
                chain,
                token,
                to,
                amount,
            } => {
                require("chain", chain)?;
                require("token", token)?;
                require("to", to)?;
                require_positive(*amount)
            }
            Self::ApproveToken {
                chain,
                token,
                spender,
                amount,
            } => {
                require("chain", chain)?;
                require("token", token)?;
                require("spender", spender)?;
                // Zero is a valid approval: it revokes.
                if *amount < Decimal::ZERO {
                    return Err(format!("amount must not be negative, got {amount}"));
                }
                Ok(())
            }
            Self::CheckAllowance {
                chain,
                token,
                spender,
                ..
            } => {
                require("chain", chain)?;
                require("token", token)?;
                require("spender", spender)
            }
            Self::CrossChainSwap {
                from_chain,
                to_chain,
                from_token,
                to_token,
                amount,
                ..
            } => {
                require("fromChain", from_chain)?;
                require("toChain", to_chain)?;
                require("fromToken", from_token)?;
                require("toToken", to_token)?;
                require_positive(*amount)
            }
        }
    }
}

/// Wallet the tools act for
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub subscription_id: String,
    pub delegation_wallet_id: String,
    pub signer: Arc<SecretKey>,
}

/// Blockchain capabilities the agent loop may call
///
/// Every method is a single stateless call into a chain SDK or gateway and
/// returns the SDK's JSON result.
#[async_trait]
pub trait ChainTools: Send + Sync {
    async fn read_balance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        address: Option<&str>,
    ) -> Result<Value>;

    async fn transfer(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<Value>;

    async fn approve_token(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<Value>;

    async fn check_allowance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        owner: Option<&str>,
    ) -> Result<Value>;

    #[allow(clippy::too_many_arguments)]
    async fn cross_chain_swap(
        &self,
        ctx: &ToolContext,
        from_chain: &str,
        to_chain: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        recipient: Option<&str>,
    ) -> Result<Value>;
}

/// Routes tool calls to `ChainTools` and records them in the run's log
#[derive(Clone)]
pub struct ToolInvoker {
    tools: Arc<dyn ChainTools>,
    ctx: ToolContext,
    sink: EventSink,
}

impl ToolInvoker {
    pub fn new(tools: Arc<dyn ChainTools>, ctx: ToolContext, sink: EventSink) -> Self {
        Self { tools, ctx, sink }
    }

    /// Invoke one tool. Failures come back as `Err(detail)`, never as a panic or a thrown error.
    pub async fn invoke(&self, call: &ToolCall) -> std::result::Result<Value, String> {
        let tool = call.name();
        let args = serde_json::to_value(call).unwrap_or(Value::Null);
        self.sink.emit("tool_call", json!({ "tool": tool, "args": args }));
        debug!(subscription_id = %self.ctx.subscription_id, tool, "tool call");

        let result = match call.validate() {
            Err(reason) => Err(RelayError::Validation(reason)),
            Ok(()) => self.dispatch(call).await,
        };

        match result {
            Ok(output) => {
                self.sink.emit(
                    "tool_result",
                    json!({ "tool": tool, "ok": true, "output": output }),
                );
                Ok(output)
            }
            Err(e) => {
                let detail = e.to_string();
                warn!(subscription_id = %self.ctx.subscription_id, tool, error = %detail, "tool call failed");
                self.sink.emit(
                    "tool_result",
                    json!({ "tool": tool, "ok": false, "error": detail }),
                );
                Err(detail)
            }
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<Value> {
        let ctx = &self.ctx;
        match call {
            ToolCall::ReadBalance {
                chain,
                token,
                address,
            } => {
                self.tools
                    .read_balance(ctx, chain, token, address.as_deref())
                    .await
            }
            ToolCall::Transfer {
                chain,
                token,
                to,
                amount,
            } => self.tools.transfer(ctx, chain, token, to, *amount).await,
            ToolCall::ApproveToken {
                chain,
                token,
                spender,
                amount,
            } => {
                self.tools
                    .approve_token(ctx, chain, token, spender, *amount)
                    .await
            }
            ToolCall::CheckAllowance {
                chain,
                token,
                spender,
                owner,
            } => {
                self.tools
                    .check_allowance(ctx, chain, token, spender, owner.as_deref())
                    .await
            }
            ToolCall::CrossChainSwap {
                from_chain,
                to_chain,
                from_token,
                to_token,
                amount,
                recipient,
            } => {
                self.tools
                    .cross_chain_swap(
                        ctx,
                        from_chain,
                        to_chain,
                        from_token,
                        to_token,
                        *amount,
                        recipient.as_deref(),
                    )
                    .await
            }
        }
    }
}
