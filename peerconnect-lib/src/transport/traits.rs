use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{PeerAddress, Result, TransportOptions};

/// Events raised by a transport identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport became viable (fires once).
    Connections,
    /// A peer became visible.
    Seen(PeerAddress),
    /// A peer disconnected.
    Left(PeerAddress),
    /// The identity reached, or was reached by, its configured remote.
    Server,
}

/// Handler for a named request endpoint.
///
/// Returning `None` sends no reply; the caller's request then never resolves.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request from `from` and produce the reply, if any.
    async fn handle(&self, from: PeerAddress, args: Value) -> Option<Value>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(PeerAddress, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    async fn handle(&self, from: PeerAddress, args: Value) -> Option<Value> {
        (self.0)(from, args).await
    }
}

/// Wrap an async closure as a shareable request handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(PeerAddress, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// One transport identity (address + seed) and its messaging channel.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Address of this identity.
    fn address(&self) -> PeerAddress;

    /// Seed the address was derived from.
    fn seed(&self) -> String;

    /// Remote address this identity was configured to reach, if any.
    fn identifier(&self) -> Option<PeerAddress>;

    /// Take the event stream. Returns `None` once it has been taken.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Install (or replace) the handler for `endpoint`.
    fn register(&self, endpoint: &str, handler: Arc<dyn RequestHandler>);

    /// Send a request to `to` and wait for its reply.
    ///
    /// There is no timeout: a peer that never replies leaves the future pending.
    async fn rpc(&self, to: &PeerAddress, endpoint: &str, args: Value) -> Result<Value>;

    /// Forget every peer seen so far.
    fn clear_seen(&self);

    /// Tear the identity down and release its resources.
    fn close(&self);

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;
}

/// Creates transport identities.
pub trait TransportFactory: Send + Sync {
    fn create(&self, options: TransportOptions) -> Result<Arc<dyn PeerTransport>>;
}

/// Typed RPC helper: serialize `request`, deserialize the reply.
pub async fn call<Req, Resp>(
    transport: &dyn PeerTransport,
    to: &PeerAddress,
    endpoint: &str,
    request: &Req,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let args = serde_json::to_value(request)?;
    let reply = transport.rpc(to, endpoint, args).await?;
    Ok(serde_json::from_value(reply)?)
}
