//! In-process chain executing the pixel pack contracts.
//!
//! Stands in for a local development node. Transactions are mined as soon as
//! they are submitted, one block each, unless automine is switched off; in that
//! case they stay pending until [`SimulatedChain::mine_blocks`] is called.
//! Under automine a wait for a deeper confirmation mines empty blocks.
//!
//! Live-network infrastructure can be pre-installed at fixed addresses and the
//! coordinator can be told to fulfil requests on its own after a delay, which
//! mimics an external oracle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use base64::Engine;
use tokio::sync::{broadcast, Mutex, Notify};

use super::{AbiValue, ChainClient, LogEvent, Receipt, Transaction, TxHandle, TxKind, TxStatus};
use crate::contracts::{self, fields, link_token, pixel_pack_factory, vrf_coordinator};
use crate::error::ChainError;

const ACCOUNT_COUNT: u8 = 10;
const EVENT_CAPACITY: usize = 1024;
const ATTRIBUTE_NAMES: [&str; 6] = [
    "dark_aura",
    "light_aura",
    "dark_stroke",
    "light_stroke",
    "corrupt",
    "noble",
];

/// LinkToken constructor mint: 1e27 juels.
pub fn initial_link_supply() -> U256 {
    U256::from(10u64).pow(U256::from(27u64))
}

#[derive(Debug, Clone)]
enum Contract {
    LinkToken { balances: HashMap<Address, U256> },
    Coordinator,
    Factory(Box<FactoryState>),
}

#[derive(Debug, Clone)]
struct FactoryState {
    coordinator: Address,
    link: Address,
    key_hash: B256,
    fee: U256,
    odds: Vec<U256>,
    next_token_id: U256,
    nonce: u64,
    request_tokens: HashMap<B256, U256>,
    token_requests: HashMap<U256, B256>,
    randomness: HashMap<U256, U256>,
    uris: HashMap<U256, String>,
}

/// A transaction as submitted, in submission order.
#[derive(Debug, Clone)]
pub struct RecordedTransaction {
    pub hash: B256,
    pub tx: Transaction,
}

#[derive(Debug)]
struct PendingTx {
    hash: B256,
    tx: Transaction,
    nonce: u64,
}

/// Randomness request raised by a factory, for automatic fulfillment.
#[derive(Debug, Clone, Copy)]
struct RaisedRequest {
    request_id: B256,
    factory: Address,
    coordinator: Address,
}

#[derive(Debug, Default)]
struct Execution {
    contract_address: Option<Address>,
    logs: Vec<LogEvent>,
    raised: Vec<RaisedRequest>,
}

#[derive(Debug, Default)]
struct ChainState {
    head: u64,
    automine: bool,
    auto_fulfill: Option<Duration>,
    nonces: HashMap<Address, u64>,
    contracts: HashMap<Address, Contract>,
    receipts: HashMap<B256, Receipt>,
    pending: Vec<PendingTx>,
    history: Vec<RecordedTransaction>,
}

impl ChainState {
    /// Mine `batch` into one new block.
    fn mine(
        &mut self,
        batch: Vec<PendingTx>,
        events: &broadcast::Sender<LogEvent>,
    ) -> Vec<RaisedRequest> {
        self.head += 1;
        let block = self.head;
        let mut raised = Vec::new();

        for pending in batch {
            let mut working = self.contracts.clone();
            let receipt = match execute(&mut working, &pending.tx, pending.nonce) {
                Ok(execution) => {
                    self.contracts = working;
                    for log in &execution.logs {
                        let _ = events.send(log.clone());
                    }
                    raised.extend(execution.raised);
                    Receipt {
                        transaction_hash: pending.hash,
                        block_number: block,
                        status: TxStatus::Success,
                        contract_address: execution.contract_address,
                        logs: execution.logs,
                    }
                }
                Err(reason) => {
                    tracing::debug!(
                        hash = %pending.hash,
                        reason = %reason,
                        "Simulated transaction reverted"
                    );
                    Receipt {
                        transaction_hash: pending.hash,
                        block_number: block,
                        status: TxStatus::Reverted(reason),
                        contract_address: None,
                        logs: Vec::new(),
                    }
                }
            };
            self.receipts.insert(pending.hash, receipt);
        }

        tracing::trace!(block, "Simulated block mined");
        raised
    }
}

struct Inner {
    accounts: Vec<Address>,
    state: Mutex<ChainState>,
    mined: Notify,
    events: broadcast::Sender<LogEvent>,
}

/// In-process [`ChainClient`].
#[derive(Clone)]
pub struct SimulatedChain {
    inner: Arc<Inner>,
}

impl SimulatedChain {
    /// Create a chain with ten funded-by-convention accounts and automine on.
    pub fn new() -> Self {
        let accounts = (1..=ACCOUNT_COUNT).map(Address::with_last_byte).collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = ChainState {
            automine: true,
            ..ChainState::default()
        };

        Self {
            inner: Arc::new(Inner {
                accounts,
                state: Mutex::new(state),
                mined: Notify::new(),
                events,
            }),
        }
    }

    pub fn accounts(&self) -> &[Address] {
        &self.inner.accounts
    }

    /// Account 0, the deployer by convention.
    pub fn deployer(&self) -> Address {
        self.inner.accounts[0]
    }

    /// Account used by the simulated oracle node to deliver fulfillments.
    pub fn oracle_operator(&self) -> Address {
        self.inner.accounts[self.inner.accounts.len() - 1]
    }

    pub async fn set_automine(&self, enabled: bool) {
        self.inner.state.lock().await.automine = enabled;
    }

    /// Fulfil every randomness request on its own after `delay`.
    pub async fn set_auto_fulfill(&self, delay: Option<Duration>) {
        self.inner.state.lock().await.auto_fulfill = delay;
    }

    /// Mine `count` blocks; the first one includes every pending transaction.
    pub async fn mine_blocks(&self, count: u64) {
        let raised = {
            let mut state = self.inner.state.lock().await;
            let mut raised = Vec::new();
            for i in 0..count {
                let batch = if i == 0 {
                    std::mem::take(&mut state.pending)
                } else {
                    Vec::new()
                };
                raised.extend(state.mine(batch, &self.inner.events));
            }
            raised
        };
        self.inner.mined.notify_waiters();
        self.schedule_fulfillments(raised).await;
    }

    pub async fn head(&self) -> u64 {
        self.inner.state.lock().await.head
    }

    /// Every submitted transaction, in submission order.
    pub async fn transactions(&self) -> Vec<RecordedTransaction> {
        self.inner.state.lock().await.history.clone()
    }

    /// Number of contract creations submitted so far.
    pub async fn deploy_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .history
            .iter()
            .filter(|r| r.tx.is_deploy())
            .count()
    }

    /// Balance of `holder` on the LinkToken at `token`.
    pub async fn balance_of(&self, token: Address, holder: Address) -> U256 {
        match self.inner.state.lock().await.contracts.get(&token) {
            Some(Contract::LinkToken { balances }) => {
                balances.get(&holder).copied().unwrap_or_default()
            }
            _ => U256::ZERO,
        }
    }

    /// Pre-install a LinkToken at a fixed address, as found on a live network.
    pub async fn install_link_token(&self, address: Address, holder: Address, amount: U256) {
        let balances = HashMap::from([(holder, amount)]);
        self.inner
            .state
            .lock()
            .await
            .contracts
            .insert(address, Contract::LinkToken { balances });
    }

    /// Pre-install a VRF coordinator at a fixed address.
    pub async fn install_coordinator(&self, address: Address) {
        self.inner
            .state
            .lock()
            .await
            .contracts
            .insert(address, Contract::Coordinator);
    }

    async fn schedule_fulfillments(&self, raised: Vec<RaisedRequest>) {
        if raised.is_empty() {
            return;
        }
        let Some(delay) = self.inner.state.lock().await.auto_fulfill else {
            return;
        };

        for request in raised {
            let chain = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let randomness = U256::from(rand::random::<u64>());
                let tx = Transaction::call(
                    chain.oracle_operator(),
                    request.coordinator,
                    vrf_coordinator::CALLBACK_WITH_RANDOMNESS,
                    vec![request.request_id.into(), randomness.into(), request.factory.into()],
                );
                if let Err(e) = chain.submit_transaction(tx).await {
                    tracing::warn!(
                        request_id = %request.request_id,
                        error = %e,
                        "Simulated fulfillment failed"
                    );
                }
            });
        }
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedChain")
            .field("accounts", &self.inner.accounts.len())
            .finish()
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn submit_transaction(&self, tx: Transaction) -> Result<TxHandle, ChainError> {
        let (hash, raised) = {
            let mut state = self.inner.state.lock().await;
            let counter = state.nonces.entry(tx.from).or_insert(0);
            let nonce = *counter;
            *counter += 1;

            let hash = keccak256(format!("{:?}:{}", tx, nonce));
            state.history.push(RecordedTransaction { hash, tx: tx.clone() });

            let pending = PendingTx { hash, tx, nonce };
            if state.automine {
                (hash, Some(state.mine(vec![pending], &self.inner.events)))
            } else {
                state.pending.push(pending);
                (hash, None)
            }
        };

        if let Some(raised) = raised {
            self.inner.mined.notify_waiters();
            self.schedule_fulfillments(raised).await;
        }
        Ok(TxHandle { hash })
    }

    async fn wait_for_confirmations(
        &self,
        handle: &TxHandle,
        confirmations: u64,
    ) -> Result<Receipt, ChainError> {
        loop {
            let mined = self.inner.mined.notified();
            {
                let mut state = self.inner.state.lock().await;
                match state.receipts.get(&handle.hash).cloned() {
                    Some(receipt) => {
                        let depth = state.head + 1 - receipt.block_number;
                        if depth >= confirmations {
                            return Ok(receipt);
                        }
                        if state.automine {
                            // Automine only mines on submission; fill the missing depth
                            // with empty blocks.
                            for _ in depth..confirmations {
                                state.mine(Vec::new(), &self.inner.events);
                            }
                            drop(state);
                            self.inner.mined.notify_waiters();
                            return Ok(receipt);
                        }
                    }
                    None if !state.pending.iter().any(|p| p.hash == handle.hash) => {
                        return Err(ChainError::UnknownTransaction(handle.hash));
                    }
                    None => {}
                }
            }
            mined.await;
        }
    }

    async fn has_code(&self, address: Address) -> Result<bool, ChainError> {
        Ok(self.inner.state.lock().await.contracts.contains_key(&address))
    }

    async fn call_static(
        &self,
        address: Address,
        method: &str,
        args: &[AbiValue],
    ) -> Result<AbiValue, ChainError> {
        let state = self.inner.state.lock().await;
        let fail = |reason: &str| ChainError::Call {
            address,
            method: method.to_string(),
            reason: reason.to_string(),
        };

        match (state.contracts.get(&address), method) {
            (Some(Contract::LinkToken { balances }), link_token::BALANCE_OF) => {
                let holder = arg_address(args, 0).map_err(|e| fail(&e))?;
                Ok(AbiValue::Uint(balances.get(&holder).copied().unwrap_or_default()))
            }
            (Some(Contract::Factory(factory)), pixel_pack_factory::REQUEST_ID_OF) => {
                let token_id = arg_uint(args, 0).map_err(|e| fail(&e))?;
                factory
                    .token_requests
                    .get(&token_id)
                    .map(|id| AbiValue::Bytes32(*id))
                    .ok_or_else(|| fail("nonexistent token"))
            }
            (Some(Contract::Factory(factory)), pixel_pack_factory::TOKEN_URI) => {
                let token_id = arg_uint(args, 0).map_err(|e| fail(&e))?;
                factory
                    .uris
                    .get(&token_id)
                    .map(|uri| AbiValue::String(uri.clone()))
                    .ok_or_else(|| fail("URI query for unfinished token"))
            }
            (None, _) => Err(fail("no contract at address")),
            _ => Err(fail("unknown method")),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.events.subscribe()
    }
}

fn execute(
    code: &mut HashMap<Address, Contract>,
    tx: &Transaction,
    nonce: u64,
) -> Result<Execution, String> {
    match &tx.kind {
        TxKind::Deploy { contract, args } => deploy(code, tx.from, nonce, contract, args),
        TxKind::Call { to, method, args } => {
            match (code.get(to), method.as_str()) {
                (Some(Contract::LinkToken { .. }), link_token::TRANSFER) => {
                    let recipient = arg_address(args, 0)?;
                    let amount = arg_uint(args, 1)?;
                    let log = link_transfer(code, *to, tx.from, recipient, amount)?;
                    Ok(Execution {
                        logs: vec![log],
                        ..Execution::default()
                    })
                }
                (Some(Contract::Coordinator), vrf_coordinator::CALLBACK_WITH_RANDOMNESS) => {
                    let request_id = arg_b256(args, 0)?;
                    let randomness = arg_uint(args, 1)?;
                    let consumer = arg_address(args, 2)?;
                    fulfill(code, *to, consumer, request_id, randomness)
                }
                (Some(Contract::Factory(_)), pixel_pack_factory::GENERATE) => {
                    generate(code, *to, tx.from)
                }
                (Some(Contract::Factory(_)), pixel_pack_factory::FINISH_MINT) => {
                    let token_id = arg_uint(args, 0)?;
                    finish_mint(code, *to, token_id)
                }
                (None, _) => Err("call to non-contract address".to_string()),
                (_, other) => Err(format!("function selector {} not recognized", other)),
            }
        }
    }
}

fn deploy(
    code: &mut HashMap<Address, Contract>,
    from: Address,
    nonce: u64,
    contract: &str,
    args: &[AbiValue],
) -> Result<Execution, String> {
    let address = from.create(nonce);
    let mut logs = Vec::new();

    let deployed = match contract {
        contracts::LINK_TOKEN => {
            let supply = initial_link_supply();
            logs.push(
                LogEvent::new(address, link_token::TRANSFER_EVENT)
                    .with_field(fields::FROM, Address::ZERO)
                    .with_field(fields::TO, from)
                    .with_field(fields::VALUE, supply),
            );
            Contract::LinkToken {
                balances: HashMap::from([(from, supply)]),
            }
        }
        contracts::VRF_COORDINATOR_MOCK => {
            arg_address(args, 0)?;
            Contract::Coordinator
        }
        contracts::PIXEL_PACK_FACTORY => {
            let odds = args
                .get(4)
                .and_then(AbiValue::as_array)
                .and_then(|items| items.iter().map(AbiValue::as_uint).collect::<Option<Vec<_>>>())
                .ok_or_else(|| "argument 4 must be an array of uint".to_string())?;
            Contract::Factory(Box::new(FactoryState {
                coordinator: arg_address(args, 0)?,
                link: arg_address(args, 1)?,
                key_hash: arg_b256(args, 2)?,
                fee: arg_uint(args, 3)?,
                odds,
                next_token_id: U256::ZERO,
                nonce: 0,
                request_tokens: HashMap::new(),
                token_requests: HashMap::new(),
                randomness: HashMap::new(),
                uris: HashMap::new(),
            }))
        }
        other => return Err(format!("no artifact named {}", other)),
    };

    code.insert(address, deployed);
    Ok(Execution {
        contract_address: Some(address),
        logs,
        raised: Vec::new(),
    })
}

fn link_transfer(
    code: &mut HashMap<Address, Contract>,
    token: Address,
    from: Address,
    to: Address,
    amount: U256,
) -> Result<LogEvent, String> {
    let Some(Contract::LinkToken { balances }) = code.get_mut(&token) else {
        return Err("LINK token not deployed".to_string());
    };
    let available = balances.get(&from).copied().unwrap_or_default();
    if available < amount {
        return Err("ERC20: transfer amount exceeds balance".to_string());
    }
    balances.insert(from, available - amount);
    *balances.entry(to).or_default() += amount;

    Ok(LogEvent::new(token, link_token::TRANSFER_EVENT)
        .with_field(fields::FROM, from)
        .with_field(fields::TO, to)
        .with_field(fields::VALUE, amount))
}

fn factory_mut(
    code: &mut HashMap<Address, Contract>,
    address: Address,
) -> Result<&mut FactoryState, String> {
    match code.get_mut(&address) {
        Some(Contract::Factory(state)) => Ok(state),
        _ => Err("consumer is not a pixel pack factory".to_string()),
    }
}

fn generate(
    code: &mut HashMap<Address, Contract>,
    factory: Address,
    sender: Address,
) -> Result<Execution, String> {
    let (link, coordinator, key_hash, fee, nonce) = {
        let state = factory_mut(code, factory)?;
        (state.link, state.coordinator, state.key_hash, state.fee, state.nonce)
    };

    let mut logs = Vec::new();
    logs.push(
        link_transfer(code, link, factory, coordinator, fee)
            .map_err(|_| "Not enough LINK - fill contract with faucet".to_string())?,
    );

    let mut seed = Vec::with_capacity(96);
    seed.extend_from_slice(key_hash.as_slice());
    seed.extend_from_slice(factory.into_word().as_slice());
    seed.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
    let request_id = keccak256(&seed);

    let state = factory_mut(code, factory)?;
    let token_id = state.next_token_id;
    state.next_token_id += U256::from(1);
    state.nonce += 1;
    state.request_tokens.insert(request_id, token_id);
    state.token_requests.insert(token_id, request_id);

    logs.push(
        LogEvent::new(coordinator, vrf_coordinator::REQUEST_EVENT)
            .with_field(fields::KEY_HASH, key_hash)
            .with_field(fields::FEE, fee)
            .with_field(fields::REQUEST_ID, request_id)
            .with_field(fields::SENDER, factory),
    );
    logs.push(
        LogEvent::new(factory, pixel_pack_factory::TRANSFER_EVENT)
            .with_field(fields::FROM, Address::ZERO)
            .with_field(fields::TO, sender)
            .with_field(fields::TOKEN_ID, token_id),
    );
    logs.push(
        LogEvent::new(factory, pixel_pack_factory::REQUESTED_EVENT)
            .with_field(fields::REQUEST_ID, request_id)
            .with_field(fields::TOKEN_ID, token_id),
    );

    Ok(Execution {
        contract_address: None,
        logs,
        raised: vec![RaisedRequest {
            request_id,
            factory,
            coordinator,
        }],
    })
}

fn fulfill(
    code: &mut HashMap<Address, Contract>,
    coordinator: Address,
    consumer: Address,
    request_id: B256,
    randomness: U256,
) -> Result<Execution, String> {
    let state = factory_mut(code, consumer)?;
    // Unknown request ids are accepted and ignored by the consumer.
    if let Some(token_id) = state.request_tokens.get(&request_id).copied() {
        state.randomness.entry(token_id).or_insert(randomness);
    }

    Ok(Execution {
        logs: vec![LogEvent::new(coordinator, vrf_coordinator::FULFILLED_EVENT)
            .with_field(fields::REQUEST_ID, request_id)
            .with_field(fields::OUTPUT, randomness)],
        ..Execution::default()
    })
}

fn finish_mint(
    code: &mut HashMap<Address, Contract>,
    factory: Address,
    token_id: U256,
) -> Result<Execution, String> {
    let state = factory_mut(code, factory)?;
    if !state.token_requests.contains_key(&token_id) {
        return Err("nonexistent token".to_string());
    }
    if state.uris.contains_key(&token_id) {
        return Err("pixel pack already finished".to_string());
    }
    let Some(randomness) = state.randomness.get(&token_id).copied() else {
        return Err("randomness not fulfilled".to_string());
    };

    let uri = render_token_uri(token_id, randomness, &state.odds);
    state.uris.insert(token_id, uri);

    Ok(Execution {
        logs: vec![
            LogEvent::new(factory, pixel_pack_factory::MINTED_EVENT)
                .with_field(fields::TOKEN_ID, token_id),
        ],
        ..Execution::default()
    })
}

fn render_token_uri(token_id: U256, randomness: U256, odds: &[U256]) -> String {
    let attributes: Vec<serde_json::Value> = ATTRIBUTE_NAMES
        .iter()
        .zip(odds)
        .enumerate()
        .filter(|(i, (_, odd))| !odd.is_zero() && ((randomness >> (i * 16)) % **odd).is_zero())
        .map(|(_, (name, _))| serde_json::json!({ "trait_type": name, "value": true }))
        .collect();

    let metadata = serde_json::json!({
        "name": format!("Pixel Pack #{}", token_id),
        "seed": randomness.to_string(),
        "attributes": attributes,
    });
    let encoded = base64::engine::general_purpose::STANDARD.encode(metadata.to_string());
    format!("data:application/json;base64,{}", encoded)
}

fn arg_address(args: &[AbiValue], index: usize) -> Result<Address, String> {
    args.get(index)
        .and_then(AbiValue::as_address)
        .ok_or_else(|| format!("argument {} must be an address", index))
}

fn arg_uint(args: &[AbiValue], index: usize) -> Result<U256, String> {
    args.get(index)
        .and_then(AbiValue::as_uint)
        .ok_or_else(|| format!("argument {} must be a uint", index))
}

fn arg_b256(args: &[AbiValue], index: usize) -> Result<B256, String> {
    args.get(index)
        .and_then(AbiValue::as_bytes32)
        .ok_or_else(|| format!("argument {} must be bytes32", index))
}
