//! Packet dispatch: one handler per [`PacketType`].
//!
//! Handlers receive the [`Message`] enum and match the variant they expect,
//! so a handler can never see a payload of the wrong type. Registering a
//! second handler for a tag replaces the first.

use rustc_hash::FxHashMap;

use strata_log::Diagnostics;

use crate::connection::{ConnectionId, ConnectionTable};
use crate::protocol::{Message, Packet, PacketType};

/// Everything a handler may touch while resolving one packet.
pub struct HandlerContext<'a, S> {
    /// The connection that sent the packet.
    pub sender: ConnectionId,
    pub connections: &'a mut ConnectionTable,
    /// Application state owned by the caller of the manager.
    pub state: &'a mut S,
    pub diag: &'a Diagnostics,
}

/// Handles packets of one type.
///
/// The return value reports whether the packet was accepted; the caller uses
/// it for bookkeeping only (e.g. the authentication verdict).
pub trait PacketHandler<S>: Send {
    fn on_resolve(&self, message: Message, ctx: &mut HandlerContext<'_, S>) -> bool;
}

impl<S, F> PacketHandler<S> for F
where
    F: Fn(Message, &mut HandlerContext<'_, S>) -> bool + Send,
{
    fn on_resolve(&self, message: Message, ctx: &mut HandlerContext<'_, S>) -> bool {
        self(message, ctx)
    }
}

/// Adapter behind [`DispatchRegistry::register_typed`].
struct TypedHandler<T, F> {
    handler: F,
    _packet: std::marker::PhantomData<fn(T)>,
}

impl<S, T, F> PacketHandler<S> for TypedHandler<T, F>
where
    T: Packet,
    F: Fn(T, &mut HandlerContext<'_, S>) -> bool + Send,
{
    fn on_resolve(&self, message: Message, ctx: &mut HandlerContext<'_, S>) -> bool {
        match T::from_message(message) {
            Ok(payload) => (self.handler)(payload, ctx),
            Err(other) => {
                ctx.diag.warning(format_args!(
                    "{:?} handler received a {:?} packet",
                    T::TYPE,
                    other.tag()
                ));
                false
            }
        }
    }
}

/// Maps packet tags to their handler.
pub struct DispatchRegistry<S> {
    handlers: FxHashMap<PacketType, Box<dyn PacketHandler<S>>>,
}

impl<S> DispatchRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register `handler` for `tag`, replacing any previous one.
    pub fn register<H: PacketHandler<S> + 'static>(&mut self, tag: PacketType, handler: H) {
        self.handlers.insert(tag, Box::new(handler));
    }

    /// Register a closure for `tag`.
    pub fn register_fn<F>(&mut self, tag: PacketType, handler: F)
    where
        F: Fn(Message, &mut HandlerContext<'_, S>) -> bool + Send + 'static,
        S: 'static,
    {
        self.register(tag, handler);
    }

    /// Register a handler for payload type `T` under `T::TYPE`.
    ///
    /// The handler gets the payload itself; a message of another variant
    /// reaching it is rejected with `false`.
    pub fn register_typed<T, F>(&mut self, handler: F)
    where
        T: Packet + 'static,
        F: Fn(T, &mut HandlerContext<'_, S>) -> bool + Send + 'static,
        S: 'static,
    {
        self.register(
            T::TYPE,
            TypedHandler {
                handler,
                _packet: std::marker::PhantomData,
            },
        );
    }

    pub fn unregister(&mut self, tag: PacketType) -> bool {
        self.handlers.remove(&tag).is_some()
    }

    pub fn is_registered(&self, tag: PacketType) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub fn registered_tags(&self) -> impl Iterator<Item = PacketType> + '_ {
        self.handlers.keys().copied()
    }

    /// Invoke the handler for `message`'s tag.
    ///
    /// Without a handler the message is dropped with a warning and `false`
    /// is returned; the sender is not penalized.
    pub fn resolve(&self, message: Message, ctx: &mut HandlerContext<'_, S>) -> bool {
        let tag = message.tag();
        match self.handlers.get(&tag) {
            Some(handler) => handler.on_resolve(message, ctx),
            None => {
                ctx.diag.warning(format_args!(
                    "no handler registered for {tag:?}, dropping packet from {}",
                    ctx.sender
                ));
                false
            }
        }
    }
}

impl<S> Default for DispatchRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
