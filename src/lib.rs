// Spamward: spam and abuse risk scoring for plebbit publications
//
// This is the library root. Each module corresponds to a major subsystem:
// challenge flow, risk engine, the evidence stores, and the network indexer
// that keeps the indexed store fresh.

pub mod challenge;
pub mod combined;
pub mod config;
pub mod db;
pub mod indexer;
pub mod output;
pub mod plebbit;
pub mod risk;
pub mod status;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;
