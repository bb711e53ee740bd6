use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    marker::PhantomData,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    error::{RelayError, Result},
    protocol::{decode_message, encode_message},
    types::ChannelKind,
};

/// Host-provided messaging primitive
///
/// Implementations wrap either a raw BLE buffer channel or a socket-like
/// peer messaging API. Inbound buffers are handed out once, in arrival order.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Which primitive this is; used to label errors
    fn kind(&self) -> ChannelKind;

    /// Whether the host currently provides the primitive
    fn is_available(&self) -> bool;

    /// Write one complete message buffer to the peer
    async fn write(&self, buf: Bytes) -> Result<()>;

    /// Take the inbound buffer receiver; `None` once taken
    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>>;
}

/// Uniform `send` / `on_message` contract over a [`HostChannel`]
pub struct TransportAdapter<C: HostChannel> {
    channel: C,
    handler_registered: bool,
}

impl<C: HostChannel> TransportAdapter<C> {
    /// Wrap a host channel
    pub const fn new(channel: C) -> Self {
        Self {
            channel,
            handler_registered: false,
        }
    }

    /// Kind of the wrapped channel
    pub fn kind(&self) -> ChannelKind {
        self.channel.kind()
    }

    /// Whether the wrapped channel is available
    pub fn is_available(&self) -> bool {
        self.channel.is_available()
    }

    /// Serialize and send a message
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransportUnavailable`] when the host channel is
    /// absent, [`RelayError::Serialization`] when the message cannot be
    /// encoded, or whatever the channel reports for the write.
    pub async fn send<M: Serialize + Sync>(&self, message: &M) -> Result<()> {
        if !self.channel.is_available() {
            return Err(RelayError::TransportUnavailable {
                transport: self.channel.kind().label(),
            });
        }

        let buf = encode_message(message)?;
        debug!("Sending {} bytes over {}", buf.len(), self.channel.kind());
        self.channel.write(buf).await
    }

    /// Register the single inbound consumer as a stream
    ///
    /// Buffers that do not decode as `M` are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HandlerAlreadyRegistered`] on a second call or
    /// when the inbound side of an available channel was already taken, and
    /// [`RelayError::TransportUnavailable`] if the channel is unavailable.
    pub fn subscribe<M: DeserializeOwned>(&mut self) -> Result<Inbound<M>> {
        if self.handler_registered {
            return Err(RelayError::HandlerAlreadyRegistered);
        }

        let Some(receiver) = self.channel.take_inbound() else {
            return Err(if self.channel.is_available() {
                RelayError::HandlerAlreadyRegistered
            } else {
                RelayError::TransportUnavailable {
                    transport: self.channel.kind().label(),
                }
            });
        };
        self.handler_registered = true;

        Ok(Inbound {
            receiver,
            _message: PhantomData,
        })
    }

    /// Register the single inbound handler
    ///
    /// The handler runs on a spawned task and sees messages in arrival order.
    ///
    /// # Errors
    ///
    /// Same as [`TransportAdapter::subscribe`].
    pub fn on_message<M, F>(&mut self, mut handler: F) -> Result<JoinHandle<()>>
    where
        M: DeserializeOwned + Send + 'static,
        F: FnMut(M) + Send + 'static,
    {
        let mut inbound = self.subscribe::<M>()?;
        Ok(tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                handler(message);
            }
            debug!("Inbound channel closed");
        }))
    }
}

/// Ordered stream of decoded inbound messages
#[derive(Debug)]
pub struct Inbound<M> {
    receiver: mpsc::UnboundedReceiver<Bytes>,
    _message: PhantomData<fn() -> M>,
}

impl<M: DeserializeOwned> Inbound<M> {
    /// Wait for the next decodable message; `None` once the channel closes
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            let buf = self.receiver.recv().await?;
            if let Some(message) = decode_or_drop(&buf) {
                return Some(message);
            }
        }
    }
}

impl<M: DeserializeOwned> Stream for Inbound<M> {
    type Item = M;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<M>> {
        loop {
            match ready!(self.receiver.poll_recv(cx)) {
                Some(buf) => {
                    if let Some(message) = decode_or_drop(&buf) {
                        return Poll::Ready(Some(message));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

fn decode_or_drop<M: DeserializeOwned>(buf: &[u8]) -> Option<M> {
    match decode_message(buf) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Dropping inbound message: {}", e);
            None
        }
    }
}

/// In-memory host channel; one half of a connected pair
///
/// Used to wire a watch controller directly to a companion, in tests and
/// demos, and to simulate the host withdrawing its messaging capability.
pub struct LoopbackChannel {
    kind: ChannelKind,
    available: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    inbound: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl LoopbackChannel {
    /// Create two connected channel halves
    #[must_use]
    pub fn pair(kind: ChannelKind) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            kind,
            available: Arc::new(AtomicBool::new(true)),
            outbound: Some(b_tx),
            inbound: Some(a_rx),
        };
        let b = Self {
            kind,
            available: Arc::new(AtomicBool::new(true)),
            outbound: Some(a_tx),
            inbound: Some(b_rx),
        };
        (a, b)
    }

    /// A channel the host never provided
    #[must_use]
    pub fn unavailable(kind: ChannelKind) -> Self {
        Self {
            kind,
            available: Arc::new(AtomicBool::new(false)),
            outbound: None,
            inbound: None,
        }
    }

    /// Handle toggling availability from outside the owner
    #[must_use]
    pub fn availability(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.available)
    }
}

#[async_trait]
impl HostChannel for LoopbackChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.outbound.is_some() && self.available.load(Ordering::Acquire)
    }

    async fn write(&self, buf: Bytes) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(RelayError::TransportUnavailable {
            transport: self.kind.label(),
        })?;
        outbound.send(buf).map_err(|_| RelayError::Disconnected)
    }

    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inbound.take()
    }
}
