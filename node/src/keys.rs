//! Key generation and PEM storage on startup. Grounded in `gen-keys.py` and
//! `crypto.py`'s `load_public_key`/`load_private_key`.

use ndcoin_core::crypto::{PrivateKey, PublicKey};
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

pub struct Keys {
    pub private: PrivateKey,
    pub public: PublicKey,
}

/// Loads `<dir>/ecdsa_key{,.pub}` if both are present and well-formed;
/// otherwise generates a fresh pair and writes it. `force` always
/// regenerates, matching `gen-keys.py -f`'s overwrite flag.
pub fn load_or_generate(dir: &Path, force: bool) -> io::Result<Keys> {
    let priv_path = dir.join("ecdsa_key");
    let pub_path = dir.join("ecdsa_key.pub");

    if !force {
        if let (Ok(priv_pem), Ok(pub_pem)) = (fs::read_to_string(&priv_path), fs::read_to_string(&pub_path)) {
            if let (Some(private), Some(public)) = (PrivateKey::from_pem(&priv_pem), PublicKey::from_pem(&pub_pem)) {
                return Ok(Keys { private, public });
            }
            info!(dir = %dir.display(), "existing key files are unreadable, regenerating");
        }
    }

    let private = PrivateKey::generate();
    let public = private.public_key();
    fs::create_dir_all(dir)?;
    fs::write(&priv_path, private.to_pem())?;
    fs::write(&pub_path, public.to_pem())?;
    info!(dir = %dir.display(), pub_key = %public.to_hex(), "generated new key pair");

    Ok(Keys { private, public })
}
