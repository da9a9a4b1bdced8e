//! Error types for the wallet containers.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet container errors.
///
/// The first six variants are the stable error surface callers dispatch
/// on; the remaining ones flag API misuse without mutating state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wallet file failed to decrypt or validate (wrong password, corrupt
    /// data, broken invariant).
    #[error("Wallet file decrypt error: {0}")]
    Decrypt(String),

    /// Wallet file version is newer than this build understands.
    #[error("Wallet file unknown version: {0}")]
    UnknownVersion(String),

    /// Wallet file could not be read.
    #[error("Wallet file read error: {0}")]
    Read(String),

    /// Wallet file could not be written or replaced.
    #[error("Wallet file write error: {0}")]
    Write(String),

    /// Refusing to overwrite an existing wallet file.
    #[error("Wallet file already exists: {0}")]
    Exists(String),

    /// Mnemonic failed word or checksum validation.
    #[error("Mnemonic checksum mismatch: {0}")]
    MnemonicCrc(String),

    /// The operation needs spend secrets a view-only wallet lacks.
    #[error("Operation impossible for view-only wallet: {0}")]
    ViewOnly(String),

    /// The operation is not supported by this container flavor.
    #[error("Operation not supported by container: {0}")]
    NotSupported(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn read(err: std::io::Error) -> Self {
        Error::Read(err.to_string())
    }

    pub(crate) fn write(err: std::io::Error) -> Self {
        Error::Write(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = Error::Decrypt("view keys do not match".into());
        assert!(err.to_string().contains("view keys do not match"));
        let err = Error::Exists("/tmp/w".into());
        assert!(err.to_string().contains("/tmp/w"));
    }
}
