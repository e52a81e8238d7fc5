// Plebbit network access — typed payloads, the forum client interface,
// an IPFS-gateway implementation of it, and the shared fetch queue.

pub mod client;
pub mod fetch_queue;
pub mod gateway;
pub mod types;
