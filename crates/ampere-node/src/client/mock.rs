// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock daemon for testing.
//!
//! Holds canned responses and lets tests push messages into open
//! subscriptions. Every request is counted by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ampere_core::domain::{
    Chain, ChannelPoint, Implementation, Network, NodeCredentials,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use tokio::sync::Mutex;

use super::traits::*;

/// Open subscriptions of one message type.
struct Subscribers<T> {
    senders: Vec<mpsc::UnboundedSender<Result<T>>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone + Send + 'static> Subscribers<T> {
    fn subscribe(&mut self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded();
        self.senders.push(tx);
        rx.boxed()
    }

    fn send(&mut self, item: Result<T>) -> usize {
        self.senders
            .retain(|sender| sender.unbounded_send(item.clone()).is_ok());
        self.senders.len()
    }

    fn close(&mut self) {
        self.senders.clear();
    }
}

#[derive(Default)]
struct MockState {
    channel_events: Subscribers<ChannelEventUpdate>,
    graph: Subscribers<GraphUpdate>,
    htlc: Subscribers<HtlcEvent>,
    peers: Subscribers<PeerEvent>,
    invoices: Subscribers<Invoice>,
    transactions: Subscribers<Transaction>,

    channels: Vec<ChannelInfo>,
    pending: PendingChannels,
    closed: Vec<ClosedChannelInfo>,
    chan_infos: HashMap<u64, ChanInfo>,
    node_infos: HashMap<String, NodeInfo>,
    connected: Vec<Peer>,
    forwards: Vec<ForwardingEvent>,
    payments: Vec<Payment>,
    wallet_transactions: Vec<Transaction>,
    wallet: WalletBalance,

    status_updates: Vec<(ChannelPoint, bool)>,
    policy_updates: Vec<PolicyUpdate>,
    invoice_subscriptions: Vec<(u64, u64)>,
}

/// Scriptable in-memory daemon.
pub struct MockNodeClient {
    implementation: Implementation,
    info: std::sync::RwLock<GetInfo>,
    state: Mutex<MockState>,
    calls: std::sync::Mutex<HashMap<&'static str, usize>>,
    closes: AtomicUsize,
    /// If true, every subscription request fails.
    pub fail_subscriptions: AtomicBool,
    /// If true, every unary request fails.
    pub fail_requests: AtomicBool,
}

impl MockNodeClient {
    /// LND mock on bitcoin mainnet with the given public key.
    pub fn new(public_key: impl Into<String>) -> Self {
        Self::with_implementation(Implementation::Lnd, public_key)
    }

    /// Mock of the given implementation on bitcoin mainnet.
    pub fn with_implementation(implementation: Implementation, public_key: impl Into<String>) -> Self {
        Self {
            implementation,
            info: std::sync::RwLock::new(GetInfo {
                public_key: public_key.into(),
                alias: "mock".to_string(),
                chain: Chain::Bitcoin,
                network: Network::MainNet,
                block_height: 800_000,
                synced_to_chain: true,
                version: "mock-0.1".to_string(),
            }),
            state: Mutex::new(MockState::default()),
            calls: std::sync::Mutex::new(HashMap::new()),
            closes: AtomicUsize::new(0),
            fail_subscriptions: AtomicBool::new(false),
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Change the reported network.
    pub fn set_network(&self, chain: Chain, network: Network) {
        if let Ok(mut info) = self.info.write() {
            info.chain = chain;
            info.network = network;
        }
    }

    /// Number of times `operation` was requested.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of times the transport was closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!("{operation} failed")));
        }
        Ok(())
    }

    fn record_subscription(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!("{operation} refused")));
        }
        Ok(())
    }

    /// Push a channel event to every open subscription. Returns the number of receivers.
    pub async fn push_channel_event(&self, update: ChannelEventUpdate) -> usize {
        self.state.lock().await.channel_events.send(Ok(update))
    }

    /// Push a graph update.
    pub async fn push_graph_update(&self, update: GraphUpdate) -> usize {
        self.state.lock().await.graph.send(Ok(update))
    }

    /// Push an HTLC event.
    pub async fn push_htlc_event(&self, event: HtlcEvent) -> usize {
        self.state.lock().await.htlc.send(Ok(event))
    }

    /// Push a peer event.
    pub async fn push_peer_event(&self, event: PeerEvent) -> usize {
        self.state.lock().await.peers.send(Ok(event))
    }

    /// Push an invoice update.
    pub async fn push_invoice(&self, invoice: Invoice) -> usize {
        self.state.lock().await.invoices.send(Ok(invoice))
    }

    /// Push a wallet transaction.
    pub async fn push_transaction(&self, transaction: Transaction) -> usize {
        self.state.lock().await.transactions.send(Ok(transaction))
    }

    /// Break every open subscription with an error.
    pub async fn fail_streams(&self, error: ClientError) {
        let mut state = self.state.lock().await;
        state.channel_events.send(Err(error.clone()));
        state.graph.send(Err(error.clone()));
        state.htlc.send(Err(error.clone()));
        state.peers.send(Err(error.clone()));
        state.invoices.send(Err(error.clone()));
        state.transactions.send(Err(error));
        state.channel_events.close();
        state.graph.close();
        state.htlc.close();
        state.peers.close();
        state.invoices.close();
        state.transactions.close();
    }

    /// Open channels returned by `list_channels`.
    pub async fn set_channels(&self, channels: Vec<ChannelInfo>) {
        self.state.lock().await.channels = channels;
    }

    /// Lists returned by `pending_channels`.
    pub async fn set_pending_channels(&self, pending: PendingChannels) {
        self.state.lock().await.pending = pending;
    }

    /// Channels returned by `closed_channels`.
    pub async fn set_closed_channels(&self, closed: Vec<ClosedChannelInfo>) {
        self.state.lock().await.closed = closed;
    }

    /// Graph view returned by `get_chan_info`.
    pub async fn set_chan_info(&self, info: ChanInfo) {
        self.state
            .lock()
            .await
            .chan_infos
            .insert(info.short_channel_id, info);
    }

    /// Graph view returned by `get_node_info`.
    pub async fn set_node_info(&self, info: NodeInfo) {
        self.state
            .lock()
            .await
            .node_infos
            .insert(info.announcement.public_key.clone(), info);
    }

    /// Peers returned by `list_peers`.
    pub async fn set_peers(&self, peers: Vec<Peer>) {
        self.state.lock().await.connected = peers;
    }

    /// Forwards served by `forwarding_history`.
    pub async fn set_forwards(&self, forwards: Vec<ForwardingEvent>) {
        self.state.lock().await.forwards = forwards;
    }

    /// Payments served by `list_payments`.
    pub async fn set_payments(&self, payments: Vec<Payment>) {
        self.state.lock().await.payments = payments;
    }

    /// Transactions served by `get_transactions`.
    pub async fn set_wallet_transactions(&self, transactions: Vec<Transaction>) {
        self.state.lock().await.wallet_transactions = transactions;
    }

    /// Balance returned by `wallet_balance`.
    pub async fn set_wallet_balance(&self, balance: WalletBalance) {
        self.state.lock().await.wallet = balance;
    }

    /// Channel status updates received so far.
    pub async fn status_updates(&self) -> Vec<(ChannelPoint, bool)> {
        self.state.lock().await.status_updates.clone()
    }

    /// Policy updates received so far.
    pub async fn policy_updates(&self) -> Vec<PolicyUpdate> {
        self.state.lock().await.policy_updates.clone()
    }

    /// Index pairs invoice subscriptions were opened with.
    pub async fn invoice_subscriptions(&self) -> Vec<(u64, u64)> {
        self.state.lock().await.invoice_subscriptions.clone()
    }

    fn public_key(&self) -> String {
        self.info
            .read()
            .map(|info| info.public_key.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    fn implementation(&self) -> Implementation {
        self.implementation
    }

    async fn get_info(&self) -> Result<GetInfo> {
        self.record("get_info")?;
        self.info
            .read()
            .map(|info| info.clone())
            .map_err(|_| ClientError::Status("info lock poisoned".to_string()))
    }

    async fn subscribe_channel_events(&self) -> Result<Subscription<ChannelEventUpdate>> {
        self.record_subscription("subscribe_channel_events")?;
        Ok(self.state.lock().await.channel_events.subscribe())
    }

    async fn subscribe_channel_graph(&self) -> Result<Subscription<GraphUpdate>> {
        self.record_subscription("subscribe_channel_graph")?;
        Ok(self.state.lock().await.graph.subscribe())
    }

    async fn subscribe_htlc_events(&self) -> Result<Subscription<HtlcEvent>> {
        self.record_subscription("subscribe_htlc_events")?;
        Ok(self.state.lock().await.htlc.subscribe())
    }

    async fn subscribe_peer_events(&self) -> Result<Subscription<PeerEvent>> {
        self.record_subscription("subscribe_peer_events")?;
        Ok(self.state.lock().await.peers.subscribe())
    }

    async fn subscribe_invoices(
        &self,
        add_index: u64,
        settle_index: u64,
    ) -> Result<Subscription<Invoice>> {
        self.record_subscription("subscribe_invoices")?;
        let mut state = self.state.lock().await;
        state.invoice_subscriptions.push((add_index, settle_index));
        Ok(state.invoices.subscribe())
    }

    async fn subscribe_transactions(&self) -> Result<Subscription<Transaction>> {
        self.record_subscription("subscribe_transactions")?;
        Ok(self.state.lock().await.transactions.subscribe())
    }

    async fn forwarding_history(
        &self,
        request: ForwardingHistoryRequest,
    ) -> Result<ForwardingHistoryPage> {
        self.record("forwarding_history")?;
        let state = self.state.lock().await;
        let start_ns = request.start_time.timestamp_nanos_opt().unwrap_or(0);
        let end_ns = request.end_time.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let events: Vec<ForwardingEvent> = state
            .forwards
            .iter()
            .filter(|event| event.timestamp_ns >= start_ns && event.timestamp_ns < end_ns)
            .skip(request.index_offset as usize)
            .take(request.max_events as usize)
            .cloned()
            .collect();
        let last_offset_index = request.index_offset + events.len() as u32;
        Ok(ForwardingHistoryPage {
            events,
            last_offset_index,
        })
    }

    async fn list_payments(&self, index_offset: u64, max_payments: u64) -> Result<PaymentsPage> {
        self.record("list_payments")?;
        let state = self.state.lock().await;
        let payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|payment| payment.payment_index > index_offset)
            .take(max_payments as usize)
            .cloned()
            .collect();
        let last_index_offset = payments
            .last()
            .map(|payment| payment.payment_index)
            .unwrap_or(index_offset);
        Ok(PaymentsPage {
            payments,
            last_index_offset,
        })
    }

    async fn get_transactions(&self, start_height: u32) -> Result<Vec<Transaction>> {
        self.record("get_transactions")?;
        let state = self.state.lock().await;
        Ok(state
            .wallet_transactions
            .iter()
            .filter(|tx| tx.block_height == 0 || tx.block_height >= start_height)
            .cloned()
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.record("list_channels")?;
        Ok(self.state.lock().await.channels.clone())
    }

    async fn pending_channels(&self) -> Result<PendingChannels> {
        self.record("pending_channels")?;
        Ok(self.state.lock().await.pending.clone())
    }

    async fn closed_channels(&self) -> Result<Vec<ClosedChannelInfo>> {
        self.record("closed_channels")?;
        Ok(self.state.lock().await.closed.clone())
    }

    async fn get_chan_info(&self, short_channel_id: u64) -> Result<ChanInfo> {
        self.record("get_chan_info")?;
        self.state
            .lock()
            .await
            .chan_infos
            .get(&short_channel_id)
            .cloned()
            .ok_or_else(|| ClientError::Status(format!("edge {short_channel_id} not found")))
    }

    async fn get_node_info(&self, public_key: &str) -> Result<NodeInfo> {
        self.record("get_node_info")?;
        self.state
            .lock()
            .await
            .node_infos
            .get(public_key)
            .cloned()
            .ok_or_else(|| ClientError::Status(format!("node {public_key} not found")))
    }

    async fn list_peers(&self) -> Result<Vec<Peer>> {
        self.record("list_peers")?;
        Ok(self.state.lock().await.connected.clone())
    }

    async fn connect_peer(&self, public_key: &str, host: &str) -> Result<()> {
        self.record("connect_peer")?;
        let mut state = self.state.lock().await;
        if !state.connected.iter().any(|peer| peer.public_key == public_key) {
            state.connected.push(Peer {
                public_key: public_key.to_string(),
                address: host.to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect_peer(&self, public_key: &str) -> Result<()> {
        self.record("disconnect_peer")?;
        let mut state = self.state.lock().await;
        let before = state.connected.len();
        state.connected.retain(|peer| peer.public_key != public_key);
        if state.connected.len() == before {
            return Err(ClientError::Status(format!("peer {public_key} is not connected")));
        }
        Ok(())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String> {
        self.record("sign_message")?;
        Ok(format!("sig:{}", hex::encode(message)))
    }

    async fn verify_message(&self, message: &[u8], signature: &str) -> Result<VerifyResult> {
        self.record("verify_message")?;
        Ok(VerifyResult {
            valid: signature == format!("sig:{}", hex::encode(message)),
            public_key: self.public_key(),
        })
    }

    async fn update_channel_status(&self, channel_point: &ChannelPoint, enable: bool) -> Result<()> {
        self.record("update_channel_status")?;
        self.state
            .lock()
            .await
            .status_updates
            .push((channel_point.clone(), enable));
        Ok(())
    }

    async fn update_channel_policy(&self, update: &PolicyUpdate) -> Result<()> {
        self.record("update_channel_policy")?;
        self.state.lock().await.policy_updates.push(update.clone());
        Ok(())
    }

    async fn wallet_balance(&self) -> Result<WalletBalance> {
        self.record("wallet_balance")?;
        Ok(self.state.lock().await.wallet)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that hands out one shared [`MockNodeClient`].
pub struct MockConnector {
    client: Arc<MockNodeClient>,
    opens: AtomicUsize,
    credentials: std::sync::Mutex<Vec<NodeCredentials>>,
    /// If true, every connect fails.
    pub fail: AtomicBool,
}

impl MockConnector {
    /// Connector returning `client` for every node.
    pub fn new(client: Arc<MockNodeClient>) -> Self {
        Self {
            client,
            opens: AtomicUsize::new(0),
            credentials: std::sync::Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// The shared client.
    pub fn client(&self) -> Arc<MockNodeClient> {
        self.client.clone()
    }

    /// Number of transports opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Credentials of every open, in order.
    pub fn opened_with(&self) -> Vec<NodeCredentials> {
        self.credentials
            .lock()
            .map(|credentials| credentials.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        implementation: Implementation,
        credentials: &NodeCredentials,
    ) -> Result<Arc<dyn NodeClient>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!(
                "cannot reach {} at {}",
                implementation, credentials.grpc_address
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut opened) = self.credentials.lock() {
            opened.push(credentials.clone());
        }
        Ok(self.client.clone())
    }
}
