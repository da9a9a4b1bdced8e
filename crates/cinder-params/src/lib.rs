//! Cinder network definitions
//!
//! Currency-level constants shared by the wallet container and its
//! surrounding daemons: network names, the BIP-44 coin type, and the
//! per-network suffixes used for wallet-adjacent files and database rows.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Ticker/database name of the coin, stored inside every HD wallet file.
pub const COIN_NAME: &str = "cinder";

/// BIP-44 coin type used by the hierarchical key derivation chain.
pub const BIP44_COIN_TYPE: u32 = 768;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
    /// Stagenet (pre-release staging network)
    Stagenet,
}

impl NetworkType {
    /// Short network name as persisted in wallet files and queue rows.
    pub const fn name(self) -> &'static str {
        match self {
            NetworkType::Mainnet => "main",
            NetworkType::Testnet => "test",
            NetworkType::Stagenet => "stage",
        }
    }

    /// Suffix appended to wallet-adjacent file and row names.
    ///
    /// Mainnet data carries no suffix so that files written before
    /// multi-network support keep their historical names.
    pub fn file_suffix(self) -> String {
        match self {
            NetworkType::Mainnet => String::new(),
            net => format!("_{}net", net.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_names() {
        assert_eq!(NetworkType::Mainnet.name(), "main");
        assert_eq!(NetworkType::Testnet.name(), "test");
        assert_eq!(NetworkType::Stagenet.name(), "stage");
    }

    #[test]
    fn test_file_suffixes() {
        assert_eq!(NetworkType::Mainnet.file_suffix(), "");
        assert_eq!(NetworkType::Testnet.file_suffix(), "_testnet");
        assert_eq!(NetworkType::Stagenet.file_suffix(), "_stagenet");
    }
}
