//! Assembly identities and public key tokens.
//!
//! An assembly is named by its simple name, version, culture and either a full public key or
//! the 8 byte token derived from it. References to other assemblies usually carry only the
//! token; it is the last 8 bytes of the key's hash, reversed (ECMA-335 §II.6.2.1.3).
//!
//! ```rust
//! use dotforge::metadata::identity::AssemblyIdentity;
//!
//! let corlib = AssemblyIdentity::mscorlib();
//! assert_eq!(
//!     corlib.to_string(),
//!     "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
//! );
//! ```

use std::fmt;

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::{metadata::tables::AssemblyHashAlgorithm, Error, Result};

/// Token of the ECMA standard public key that signs the desktop corlib
pub const ECMA_PUBLIC_KEY_TOKEN: [u8; 8] = [0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89];

/// Either a full public key or its token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The full public key blob
    PubKey(Vec<u8>),
    /// The 8 byte token, in blob order
    Token([u8; 8]),
}

impl Identity {
    /// Interpret a `PublicKeyOrToken` blob
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a token blob is not exactly 8 bytes.
    pub fn from(data: &[u8], is_pub: bool) -> Result<Self> {
        if is_pub {
            return Ok(Identity::PubKey(data.to_vec()));
        }

        let token: [u8; 8] = data.try_into().map_err(|_| {
            malformed_error!("Public key token must be 8 bytes, got {}", data.len())
        })?;
        Ok(Identity::Token(token))
    }

    /// The token, hashing the key with `algo` if needed
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for a hash algorithm other than MD5 or SHA-1.
    pub fn to_token(&self, algo: u32) -> Result<[u8; 8]> {
        match self {
            Identity::PubKey(data) => {
                let digest: Vec<u8> = match algo {
                    AssemblyHashAlgorithm::MD5 => Md5::digest(data).to_vec(),
                    AssemblyHashAlgorithm::SHA1 => Sha1::digest(data).to_vec(),
                    _ => return Err(Error::NotSupported),
                };

                let mut token = [0u8; 8];
                for (slot, byte) in token.iter_mut().zip(digest.iter().rev()) {
                    *slot = *byte;
                }
                Ok(token)
            }
            Identity::Token(token) => Ok(*token),
        }
    }

    /// The bytes stored in the `#Blob` heap
    #[must_use]
    pub fn as_blob(&self) -> &[u8] {
        match self {
            Identity::PubKey(data) => data,
            Identity::Token(token) => token,
        }
    }
}

/// A four part assembly version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major part
    pub major: u16,
    /// Minor part
    pub minor: u16,
    /// Build part
    pub build: u16,
    /// Revision part
    pub revision: u16,
}

impl AssemblyVersion {
    /// `major.minor.build.revision`
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// The identity of an assembly, as stored in `Assembly` and `AssemblyRef` rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `mscorlib`
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// Culture, `None` for neutral
    pub culture: Option<String>,
    /// Strong name, `None` for unsigned assemblies
    pub public_key: Option<Identity>,
}

impl AssemblyIdentity {
    /// A neutral, unsigned identity
    #[must_use]
    pub fn new(name: &str, version: AssemblyVersion) -> Self {
        AssemblyIdentity {
            name: name.to_string(),
            version,
            culture: None,
            public_key: None,
        }
    }

    /// Attach a public key token
    #[must_use]
    pub fn with_public_key_token(mut self, token: [u8; 8]) -> Self {
        self.public_key = Some(Identity::Token(token));
        self
    }

    /// Attach a full public key
    #[must_use]
    pub fn with_public_key(mut self, key: Vec<u8>) -> Self {
        self.public_key = Some(Identity::PubKey(key));
        self
    }

    /// Set the culture
    #[must_use]
    pub fn with_culture(mut self, culture: &str) -> Self {
        self.culture = Some(culture.to_string());
        self
    }

    /// The desktop corlib: `mscorlib`, 4.0.0.0, signed with the ECMA key
    #[must_use]
    pub fn mscorlib() -> Self {
        AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
            .with_public_key_token(ECMA_PUBLIC_KEY_TOKEN)
    }

    /// The public key token, derived with SHA-1 when only the key is known
    ///
    /// # Errors
    /// See [`Identity::to_token`].
    pub fn public_key_token(&self) -> Result<Option<[u8; 8]>> {
        match &self.public_key {
            Some(identity) => Ok(Some(identity.to_token(AssemblyHashAlgorithm::SHA1)?)),
            None => Ok(None),
        }
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}",
            self.name,
            self.version,
            self.culture.as_deref().unwrap_or("neutral")
        )?;

        match self.public_key_token() {
            Ok(Some(token)) => {
                write!(f, ", PublicKeyToken=")?;
                for byte in token {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            _ => write!(f, ", PublicKeyToken=null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECMA_KEY: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

    #[test]
    fn ecma_key_token() {
        let identity = Identity::PubKey(ECMA_KEY.to_vec());
        assert_eq!(
            identity.to_token(AssemblyHashAlgorithm::SHA1).unwrap(),
            ECMA_PUBLIC_KEY_TOKEN
        );
    }

    #[test]
    fn md5_and_sha1_tokens() {
        let key: Vec<u8> = (1..=16).collect();
        let identity = Identity::PubKey(key);

        assert_eq!(
            identity.to_token(AssemblyHashAlgorithm::SHA1).unwrap(),
            [0xa9, 0xd8, 0xe4, 0xb4, 0xef, 0x8a, 0xec, 0x96]
        );
        assert_eq!(
            identity.to_token(AssemblyHashAlgorithm::MD5).unwrap(),
            [0x6c, 0x8a, 0x10, 0x39, 0x89, 0x01, 0x85, 0x1d]
        );
        assert!(matches!(
            identity.to_token(AssemblyHashAlgorithm::NONE),
            Err(Error::NotSupported)
        ));
    }

    #[test]
    fn token_blob() {
        let identity = Identity::from(&ECMA_PUBLIC_KEY_TOKEN, false).unwrap();
        assert_eq!(identity.as_blob(), &ECMA_PUBLIC_KEY_TOKEN);
        assert!(Identity::from(&[1, 2, 3], false).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(
            AssemblyIdentity::mscorlib().to_string(),
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );

        let signed = AssemblyIdentity::new("mscorlib", AssemblyVersion::new(4, 0, 0, 0))
            .with_public_key(ECMA_KEY.to_vec());
        assert_eq!(signed.to_string(), AssemblyIdentity::mscorlib().to_string());

        let unsigned = AssemblyIdentity::new("SampleLib", AssemblyVersion::new(1, 0, 0, 0))
            .with_culture("de-DE");
        assert_eq!(
            unsigned.to_string(),
            "SampleLib, Version=1.0.0.0, Culture=de-DE, PublicKeyToken=null"
        );
    }
}
