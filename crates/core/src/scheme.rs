//! Signature schemes and the asset families that use them

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Signature algorithm a signer's registered key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// Ed25519 over the 32-byte request digest
    Ed25519,
    /// ECDSA on secp256k1 over the 32-byte request digest (prehashed, low-S)
    Secp256k1,
}

/// Chain families grouped by the curve their custody keys live on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetFamily {
    Bitcoin,
    Ethereum,
    Solana,
    Other,
}

impl AssetFamily {
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.trim().to_ascii_uppercase().as_str() {
            "BTC" | "LTC" | "BCH" | "DOGE" => AssetFamily::Bitcoin,
            "ETH" | "USDT" | "USDC" | "DAI" | "WBTC" => AssetFamily::Ethereum,
            "SOL" => AssetFamily::Solana,
            _ => AssetFamily::Other,
        }
    }

    pub fn default_scheme(&self) -> SignatureScheme {
        match self {
            AssetFamily::Bitcoin | AssetFamily::Ethereum => SignatureScheme::Secp256k1,
            AssetFamily::Solana | AssetFamily::Other => SignatureScheme::Ed25519,
        }
    }
}
