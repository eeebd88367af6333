use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Ledger;
use super::error::LedgerError;
use super::types::{AnswerSubmission, JobDescriptor, NodeRecord, NodeRegistration, amount};

/// JSON-RPC 2.0 client for the ledger gateway. The gateway signs
/// state-changing calls on behalf of `account_id`.
pub struct RpcLedger {
    account_id: String,
    client: Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BalanceView {
    #[serde(with = "amount")]
    available: u128,
}

impl RpcLedger {
    pub fn new(url: String, account_id: String) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            account_id,
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, T>(&self, method: &str, params: P) -> Result<T, LedgerError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::trace!(method, "Calling ledger");

        let response = self
            .client
            .post(&self.url)
            .header("x-account-id", &self.account_id)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LedgerError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<RpcResponse>()
            .await
            .map_err(|e| LedgerError::Decode(format!("{method}: {e}")))?;

        if let Some(error) = body.error {
            return Err(LedgerError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::Decode(format!("{method}: {e}")))
    }

    /// Change methods answer with the updated record, if anything. Only
    /// success matters here.
    async fn transact<P: Serialize>(&self, method: &str, params: P) -> Result<(), LedgerError> {
        let _: IgnoredAny = self.call(method, params).await?;
        Ok(())
    }
}

impl Ledger for RpcLedger {
    async fn get_job(&self, job_id: &str) -> Result<JobDescriptor, LedgerError> {
        let job: Option<JobDescriptor> = self.call("get_job", json!({ "job_id": job_id })).await?;
        job.ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))
    }

    async fn should_post_answer(&self, job_id: &str, node_id: &str) -> Result<bool, LedgerError> {
        self.call(
            "should_post_answer",
            json!({ "job_id": job_id, "node_id": node_id }),
        )
        .await
    }

    async fn get_node(&self, node_id: &str) -> Result<NodeRecord, LedgerError> {
        let node: Option<NodeRecord> = self.call("get_node", json!({ "node_id": node_id })).await?;
        node.ok_or_else(|| LedgerError::NotFound(format!("node {node_id}")))
    }

    async fn account_balance(&self, account_id: &str) -> Result<u128, LedgerError> {
        let balance: BalanceView = self
            .call("account_balance", json!({ "account_id": account_id }))
            .await?;
        Ok(balance.available)
    }

    async fn post_answer(&self, answer: &AnswerSubmission) -> Result<(), LedgerError> {
        self.transact("post_answer", answer).await
    }

    async fn reject_job(&self, job_id: &str, node_id: &str, message: &str) -> Result<(), LedgerError> {
        self.transact(
            "reject_job",
            json!({ "job_id": job_id, "node_id": node_id, "message": message }),
        )
        .await
    }

    async fn register_node(&self, registration: &NodeRegistration) -> Result<(), LedgerError> {
        self.transact("register_node", registration).await
    }

    async fn collect_reward(&self, job_id: &str, node_id: &str) -> Result<(), LedgerError> {
        self.transact(
            "collect_reward",
            json!({ "job_id": job_id, "node_id": node_id }),
        )
        .await
    }
}
