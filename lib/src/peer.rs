//! A peer discovered through the directory service.

use crate::crypto::PublicKey;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Peer {
    pub pub_key: PublicKey,
    pub address: String,
    pub port: u16,
    pub display_name: String,
    pub lastheardfrom: f64,
}
