pub mod abi;
pub mod cfg;
pub mod client;
pub mod correlator;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod message;
pub mod p2p_node;
pub mod query;
pub mod transport;
pub mod verify;
