// src/proxy/events.rs
//! Pre-dispatch event bus.
//!
//! Five hook points wrap the pipeline: raw data in/out, per-game-packet
//! bedrock in/out, and state transitions. Subscribers run in registration
//! order; each may hand back a replacement event or cancel, and the first
//! cancellation short-circuits the rest.

use super::session::SessionState;
use super::Origin;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

/// Subscriber verdict: keep going (possibly with a replacement) or drop.
pub enum Flow<E> {
    Continue(E),
    Cancel,
}

/// An async observer/interceptor for one hook point.
#[async_trait]
pub trait Subscriber<E>: Send + Sync {
    async fn on_event(&self, event: E) -> Flow<E>;
}

/// Raw bytes arriving from a peer, before any parsing.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub origin: Origin,
    pub data: Bytes,
}

/// Bytes about to leave on a listener. Subscribers may rewrite the payload or
/// destination; leaving either unusable is fatal to the session.
#[derive(Debug, Clone)]
pub struct DataOutEvent {
    pub data: Bytes,
    pub to: Option<SocketAddr>,
}

/// One game packet blob inside a batch, before (`bedrock-in`) or after
/// (`bedrock-out`) inspection.
#[derive(Debug, Clone)]
pub struct BedrockEvent {
    pub origin: Origin,
    pub payload: Bytes,
}

/// A session state transition.
#[derive(Debug, Clone, Copy)]
pub struct StateEvent {
    pub state: SessionState,
}

/// Registered subscribers for every hook point.
#[derive(Default)]
pub struct EventBus {
    data_in: Vec<Box<dyn Subscriber<DataEvent>>>,
    data_out: Vec<Box<dyn Subscriber<DataOutEvent>>>,
    bedrock_in: Vec<Box<dyn Subscriber<BedrockEvent>>>,
    bedrock_out: Vec<Box<dyn Subscriber<BedrockEvent>>>,
    state: Vec<Box<dyn Subscriber<StateEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data_in(&mut self, subscriber: Box<dyn Subscriber<DataEvent>>) {
        self.data_in.push(subscriber);
    }

    pub fn on_data_out(&mut self, subscriber: Box<dyn Subscriber<DataOutEvent>>) {
        self.data_out.push(subscriber);
    }

    pub fn on_bedrock_in(&mut self, subscriber: Box<dyn Subscriber<BedrockEvent>>) {
        self.bedrock_in.push(subscriber);
    }

    pub fn on_bedrock_out(&mut self, subscriber: Box<dyn Subscriber<BedrockEvent>>) {
        self.bedrock_out.push(subscriber);
    }

    pub fn on_state(&mut self, subscriber: Box<dyn Subscriber<StateEvent>>) {
        self.state.push(subscriber);
    }

    pub async fn emit_data_in(&self, event: DataEvent) -> Option<DataEvent> {
        emit(&self.data_in, event).await
    }

    pub async fn emit_data_out(&self, event: DataOutEvent) -> Option<DataOutEvent> {
        emit(&self.data_out, event).await
    }

    pub async fn emit_bedrock_in(&self, event: BedrockEvent) -> Option<BedrockEvent> {
        emit(&self.bedrock_in, event).await
    }

    pub async fn emit_bedrock_out(&self, event: BedrockEvent) -> Option<BedrockEvent> {
        emit(&self.bedrock_out, event).await
    }

    pub async fn emit_state(&self, event: StateEvent) -> Option<StateEvent> {
        emit(&self.state, event).await
    }
}

/// Awaits subscribers in registration order; `None` means cancelled.
async fn emit<E>(subscribers: &[Box<dyn Subscriber<E>>], mut event: E) -> Option<E> {
    for subscriber in subscribers {
        match subscriber.on_event(event).await {
            Flow::Continue(replacement) => event = replacement,
            Flow::Cancel => return None,
        }
    }
    Some(event)
}
