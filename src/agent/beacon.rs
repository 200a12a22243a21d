use async_trait::async_trait;
use ethers::types::H256;
use ethers::utils::keccak256;

use crate::error::Result;

/// Source of the per-round random value every agent must agree on.
#[async_trait]
pub trait RandomnessBeacon: Send + Sync {
    async fn randomness(&self, round: u64) -> Result<H256>;
}

/// `keccak256(seed || round)`, identical for every agent sharing the seed.
/// Not verifiable; for dry runs and simulations only.
#[derive(Debug, Clone, Copy)]
pub struct KeccakBeacon {
    seed: H256,
}

impl KeccakBeacon {
    pub fn new(seed: H256) -> Self {
        Self { seed }
    }

    pub fn from_u64(seed: u64) -> Self {
        Self::new(H256::from_low_u64_be(seed))
    }
}

#[async_trait]
impl RandomnessBeacon for KeccakBeacon {
    async fn randomness(&self, round: u64) -> Result<H256> {
        let mut preimage = [0u8; 40];
        preimage[..32].copy_from_slice(self.seed.as_bytes());
        preimage[32..].copy_from_slice(&round.to_be_bytes());
        Ok(H256::from(keccak256(preimage)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keccak_beacon_is_deterministic_per_round() {
        let a = KeccakBeacon::from_u64(7);
        let b = KeccakBeacon::from_u64(7);
        assert_eq!(a.randomness(3).await.unwrap(), b.randomness(3).await.unwrap());
        assert_ne!(a.randomness(3).await.unwrap(), a.randomness(4).await.unwrap());
        assert_ne!(
            a.randomness(3).await.unwrap(),
            KeccakBeacon::from_u64(8).randomness(3).await.unwrap()
        );
    }
}
