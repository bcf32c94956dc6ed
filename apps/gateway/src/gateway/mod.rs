pub mod calls;
pub mod delivery;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod notify;
pub mod presence;
pub mod ratelimit;
pub mod rooms;
pub mod server;
pub mod session;
pub mod streams;

#[cfg(test)]
pub(crate) mod testing;
