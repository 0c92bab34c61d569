//! In-process chain used for local runs and tests
//!
//! Balances and allowances live in memory. Every wallet starts each
//! (chain, token) pair with `initial_balance`. Transaction hashes are random.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use super::tools::{ChainTools, ToolContext};
use crate::error::{RelayError, Result};

/// Swap fee charged by the simulated bridge, in basis points
const SWAP_FEE_BPS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BalanceKey {
    chain: String,
    holder: String,
    token: String,
}

impl BalanceKey {
    fn new(chain: &str, holder: &str, token: &str) -> Self {
        Self {
            chain: chain.to_ascii_lowercase(),
            holder: holder.to_ascii_lowercase(),
            token: token.to_ascii_uppercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AllowanceKey {
    balance: BalanceKey,
    spender: String,
}

pub struct SimulatedChain {
    initial_balance: Decimal,
    balances: DashMap<BalanceKey, Decimal>,
    allowances: DashMap<AllowanceKey, Decimal>,
}

impl SimulatedChain {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balances: DashMap::new(),
            allowances: DashMap::new(),
        }
    }

    /// Pin a balance, overriding the initial amount
    pub fn with_balance(self, chain: &str, holder: &str, token: &str, amount: Decimal) -> Self {
        self.balances
            .insert(BalanceKey::new(chain, holder, token), amount);
        self
    }

    pub fn balance_of(&self, chain: &str, holder: &str, token: &str) -> Decimal {
        self.balances
            .get(&BalanceKey::new(chain, holder, token))
            .map(|b| *b)
            .unwrap_or(self.initial_balance)
    }

    fn debit(&self, key: BalanceKey, amount: Decimal) -> Result<Decimal> {
        let mut balance = self.balances.entry(key).or_insert(self.initial_balance);
        if *balance < amount {
            return Err(RelayError::Tool(format!(
                "insufficient balance: have {}, need {}",
                *balance, amount
            )));
        }
        *balance -= amount;
        Ok(*balance)
    }

    fn credit(&self, key: BalanceKey, amount: Decimal) {
        *self.balances.entry(key).or_insert(self.initial_balance) += amount;
    }

    fn tx_hash() -> String {
        format!("0x{}", Uuid::new_v4().simple())
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(Decimal::new(1000, 0))
    }
}

#[async_trait]
impl ChainTools for SimulatedChain {
    async fn read_balance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        address: Option<&str>,
    ) -> Result<Value> {
        let holder = address.unwrap_or(&ctx.delegation_wallet_id);
        Ok(json!({
            "chain": chain,
            "token": token,
            "address": holder,
            "balance": self.balance_of(chain, holder, token).to_string(),
        }))
    }

    async fn transfer(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<Value> {
        let remaining = self.debit(
            BalanceKey::new(chain, &ctx.delegation_wallet_id, token),
            amount,
        )?;
        self.credit(BalanceKey::new(chain, to, token), amount);
        Ok(json!({
            "txHash": Self::tx_hash(),
            "chain": chain,
            "token": token,
            "to": to,
            "amount": amount.to_string(),
            "remainingBalance": remaining.to_string(),
        }))
    }

    async fn approve_token(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        amount: Decimal,
    ) -> Result<Value> {
        let key = AllowanceKey {
            balance: BalanceKey::new(chain, &ctx.delegation_wallet_id, token),
            spender: spender.to_ascii_lowercase(),
        };
        self.allowances.insert(key, amount);
        Ok(json!({
            "txHash": Self::tx_hash(),
            "chain": chain,
            "token": token,
            "spender": spender,
            "allowance": amount.to_string(),
        }))
    }

    async fn check_allowance(
        &self,
        ctx: &ToolContext,
        chain: &str,
        token: &str,
        spender: &str,
        owner: Option<&str>,
    ) -> Result<Value> {
        let owner = owner.unwrap_or(&ctx.delegation_wallet_id);
        let key = AllowanceKey {
            balance: BalanceKey::new(chain, owner, token),
            spender: spender.to_ascii_lowercase(),
        };
        let allowance = self
            .allowances
            .get(&key)
            .map(|a| *a)
            .unwrap_or(Decimal::ZERO);
        Ok(json!({
            "chain": chain,
            "token": token,
            "owner": owner,
            "spender": spender,
            "allowance": allowance.to_string(),
        }))
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
        let recipient = recipient.unwrap_or(&ctx.delegation_wallet_id);
        self.debit(
            BalanceKey::new(from_chain, &ctx.delegation_wallet_id, from_token),
            amount,
        )?;
        let fee = amount * Decimal::new(SWAP_FEE_BPS.into(), 4);
        let received = amount - fee;
        self.credit(BalanceKey::new(to_chain, recipient, to_token), received);
        Ok(json!({
            "txHash": Self::tx_hash(),
            "fromChain": from_chain,
            "toChain": to_chain,
            "fromToken": from_token,
            "toToken": to_token,
            "amountIn": amount.to_string(),
            "amountOut": received.to_string(),
            "fee": fee.to_string(),
            "recipient": recipient,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::request::SecretKey;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            subscription_id: "S1".into(),
            delegation_wallet_id: "wallet-1".into(),
            signer: Arc::new(SecretKey::new("00".repeat(32))),
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let chain = SimulatedChain::new(dec!(100));
        let out = chain
            .transfer(&ctx(), "base", "usdc", "0xBob", dec!(40))
            .await
            .unwrap();
        assert_eq!(out["remainingBalance"], "60");
        assert_eq!(chain.balance_of("base", "wallet-1", "USDC"), dec!(60));
        assert_eq!(chain.balance_of("base", "0xbob", "USDC"), dec!(140));
    }

    #[tokio::test]
    async fn test_transfer_rejects_overdraft() {
        let chain = SimulatedChain::default().with_balance("base", "wallet-1", "USDC", dec!(5));
        let err = chain
            .transfer(&ctx(), "base", "USDC", "0xbob", dec!(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient balance"));
        assert_eq!(chain.balance_of("base", "wallet-1", "USDC"), dec!(5));
    }

    #[tokio::test]
    async fn test_approve_then_check_allowance() {
        let chain = SimulatedChain::default();
        let before = chain
            .check_allowance(&ctx(), "base", "USDC", "0xRouter", None)
            .await
            .unwrap();
        assert_eq!(before["allowance"], "0");

        chain
            .approve_token(&ctx(), "base", "USDC", "0xrouter", dec!(250))
            .await
            .unwrap();
        let after = chain
            .check_allowance(&ctx(), "base", "USDC", "0xRouter", None)
            .await
            .unwrap();
        assert_eq!(after["allowance"], "250");
    }

    #[tokio::test]
    async fn test_cross_chain_swap_charges_fee() {
        let chain = SimulatedChain::new(dec!(1000));
        let out = chain
            .cross_chain_swap(&ctx(), "base", "arbitrum", "USDC", "USDC", dec!(100), None)
            .await
            .unwrap();
        let fee: Decimal = out["fee"].as_str().unwrap().parse().unwrap();
        assert_eq!(fee, dec!(0.3));
        assert_eq!(chain.balance_of("base", "wallet-1", "USDC"), dec!(900));
        assert_eq!(chain.balance_of("arbitrum", "wallet-1", "USDC"), dec!(1099.7));
    }
}
