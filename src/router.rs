//! Demultiplexing router nodes
//!
//! A [`Router`] owns one inbound stream and fans every message that passes
//! its filter out to a dynamic set of subscriber streams. Routers compose
//! into a graph: attaching one router's inbound sender to another router
//! makes it a child of that router.
//!
//! All structural changes (attach, detach) are sent as control operations to
//! the router's single loop, so the subscriber set is never touched from any
//! other task. Each delivery is attempted independently, so a slow or stuck
//! subscriber never holds up the loop or the other subscribers.

use crate::error::{BusError, Result};
use crate::messages::Message;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Decides whether a message passes a router, possibly rewriting it
pub type Filter = Arc<dyn Fn(Message) -> Option<Message> + Send + Sync>;

/// Runs inside the router loop on a subscriber-count edge
pub type LifecycleHook = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send>;

/// Handle naming one subscriber of one router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Filter that keeps every message unchanged
pub fn pass_all() -> Filter {
    Arc::new(|message: Message| Some(message))
}

enum Control {
    Attach(SubscriberId, mpsc::Sender<Message>, oneshot::Sender<()>),
    Detach(SubscriberId),
    Count(oneshot::Sender<usize>),
}

/// Optional hooks fired on subscriber-count transitions
#[derive(Default)]
pub struct Hooks {
    /// Runs when the subscriber count goes from 0 to 1
    pub on_first: Option<LifecycleHook>,
    /// Runs when the subscriber count goes from 1 to 0
    pub on_last: Option<LifecycleHook>,
}

/// Handle to a running router node
///
/// Cheap to clone; every clone talks to the same loop.
#[derive(Clone)]
pub struct Router {
    control: mpsc::Sender<Control>,
    next_id: Arc<AtomicU64>,
    subscriber_capacity: usize,
}

impl Router {
    /// Spawn a router loop reading from `inbound`
    ///
    /// The loop stops once every sender of `inbound` is dropped; its
    /// subscriber streams close with it.
    pub fn spawn(
        inbound: mpsc::Receiver<Message>,
        filter: Filter,
        hooks: Hooks,
        control_capacity: usize,
        subscriber_capacity: usize,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(control_capacity);

        let node = RouterLoop {
            inbound,
            control_rx,
            control_tx: control_tx.clone(),
            filter,
            hooks,
            subscribers: Vec::new(),
        };
        tokio::spawn(node.run());

        Self {
            control: control_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_capacity,
        }
    }

    /// Register a subscriber stream
    ///
    /// Returns once the router loop has registered it (and run the
    /// first-subscriber hook, if this is the first); any message the router
    /// receives after that is delivered to `outbound`.
    pub async fn attach_raw(&self, outbound: mpsc::Sender<Message>) -> Result<SubscriberId> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(Control::Attach(id, outbound, ack_tx))
            .await
            .map_err(|_| BusError::Shutdown)?;
        ack_rx.await.map_err(|_| BusError::Shutdown)?;
        Ok(id)
    }

    /// Unregister a subscriber stream. Unknown ids are ignored.
    pub async fn detach_raw(&self, id: SubscriberId) -> Result<()> {
        self.control
            .send(Control::Detach(id))
            .await
            .map_err(|_| BusError::Shutdown)
    }

    /// Attach a callback run for every delivered message
    ///
    /// The callback gets its own thread from the blocking pool, so it may
    /// block for as long as it likes without stalling the runtime. It is
    /// detached as soon as it returns `false` or its stream closes.
    pub async fn attach<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Message) -> bool + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(self.subscriber_capacity);
        let id = self.attach_raw(tx).await?;

        let control = self.control.clone();
        tokio::task::spawn_blocking(move || {
            while let Some(message) = rx.blocking_recv() {
                if !callback(message) {
                    debug!(subscriber = %id, "callback finished, detaching");
                    break;
                }
            }
            drop(rx);
            let _ = control.blocking_send(Control::Detach(id));
        });

        Ok(())
    }

    /// Current number of subscribers, as seen by the router loop
    pub async fn subscriber_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Count(tx))
            .await
            .map_err(|_| BusError::Shutdown)?;
        rx.await.map_err(|_| BusError::Shutdown)
    }
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Message>,
    // Delivery still waiting for stream capacity; later messages queue behind it
    pending: Option<JoinHandle<()>>,
}

struct RouterLoop {
    inbound: mpsc::Receiver<Message>,
    control_rx: mpsc::Receiver<Control>,
    control_tx: mpsc::Sender<Control>,
    filter: Filter,
    hooks: Hooks,
    subscribers: Vec<Subscriber>,
}

impl RouterLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                Some(ctrl) = self.control_rx.recv() => self.exec(ctrl).await,

                message = self.inbound.recv() => match message {
                    Some(message) => {
                        if let Some(message) = (self.filter)(message) {
                            self.dispatch(message).await;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(subscribers = self.subscribers.len(), "router inbound closed, stopping");
    }

    async fn exec(&mut self, ctrl: Control) {
        match ctrl {
            Control::Attach(id, tx, ack) => {
                self.attach(id, tx).await;
                let _ = ack.send(());
            }
            Control::Detach(id) => self.detach(id).await,
            Control::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    async fn attach(&mut self, id: SubscriberId, tx: mpsc::Sender<Message>) {
        self.subscribers.push(Subscriber {
            id,
            tx,
            pending: None,
        });
        debug!(subscriber = %id, count = self.subscribers.len(), "subscriber attached");

        if self.subscribers.len() == 1 {
            if let Some(hook) = self.hooks.on_first.as_mut() {
                hook().await;
            }
        }
    }

    async fn detach(&mut self, id: SubscriberId) {
        let Some(index) = self.subscribers.iter().position(|s| s.id == id) else {
            return;
        };
        self.subscribers.swap_remove(index);
        debug!(subscriber = %id, count = self.subscribers.len(), "subscriber detached");

        if self.subscribers.is_empty() {
            if let Some(hook) = self.hooks.on_last.as_mut() {
                hook().await;
            }
        }
    }

    async fn dispatch(&mut self, message: Message) {
        let mut closed = Vec::new();

        for subscriber in &mut self.subscribers {
            let idle = subscriber
                .pending
                .as_ref()
                .map_or(true, JoinHandle::is_finished);

            if idle {
                subscriber.pending = None;
                match subscriber.tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                    Err(TrySendError::Full(message)) => {
                        deliver_later(subscriber, message, self.control_tx.clone());
                    }
                }
            } else {
                deliver_later(subscriber, message.clone(), self.control_tx.clone());
            }
        }

        for id in closed {
            debug!(subscriber = %id, "subscriber stream closed");
            self.detach(id).await;
        }
    }
}

/// Deliver on a separate task once the subscriber has room, behind any
/// delivery already waiting for the same subscriber.
fn deliver_later(subscriber: &mut Subscriber, message: Message, control: mpsc::Sender<Control>) {
    let previous = subscriber.pending.take();
    let tx = subscriber.tx.clone();
    let id = subscriber.id;

    subscriber.pending = Some(tokio::spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        if tx.send(message).await.is_err() {
            debug!(subscriber = %id, "delivery failed, detaching");
            let _ = control.send(Control::Detach(id)).await;
        }
    }));
}
