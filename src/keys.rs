//! Escrow key provider - address and secret material for new escrows
//!
//! Custody itself is an external concern; the core only needs a fresh
//! address for the client to fund and an opaque encrypted secret to hand
//! to the custodian at settlement time.

use rand::RngCore;

use crate::EscrowResult;

/// Address and sealed secret for one escrow
#[derive(Debug, Clone)]
pub struct EscrowKeys {
    pub address: String,
    pub encrypted_secret: String,
}

/// Source of fresh escrow addresses
pub trait EscrowKeyProvider: Send + Sync {
    fn new_escrow_keys(&self) -> EscrowResult<EscrowKeys>;
}

/// Default provider: random address material, secret sealed by the
/// external custodian before it ever reaches this process.
#[derive(Default)]
pub struct RandomKeyProvider;

impl EscrowKeyProvider for RandomKeyProvider {
    fn new_escrow_keys(&self) -> EscrowResult<EscrowKeys> {
        let mut rng = rand::thread_rng();
        let mut address = [0u8; 32];
        let mut secret = [0u8; 64];
        rng.fill_bytes(&mut address);
        rng.fill_bytes(&mut secret);
        Ok(EscrowKeys {
            address: hex::encode(address),
            encrypted_secret: hex::encode(secret),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique_per_escrow() {
        let provider = RandomKeyProvider;
        let a = provider.new_escrow_keys().unwrap();
        let b = provider.new_escrow_keys().unwrap();
        assert_ne!(a.address, b.address);
        assert_eq!(a.address.len(), 64);
    }
}
