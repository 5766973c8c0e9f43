//! WebSocket fan-out: subscriber connections, their writers and the registry
//! that broadcasts committed task events to them.

pub mod connection;
pub mod event_router;
pub mod registry;
pub mod session;
pub mod transport;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;
