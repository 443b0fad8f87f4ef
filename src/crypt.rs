//! Decryption capability
//!
//! Encryption key derivation and cipher implementations live outside this
//! crate. The parser only needs an opaque capability that can transform
//! string and stream bytes given the identity of the object they belong to.
//! Callers construct one and thread it through [`OpenOptions`]; there is no
//! process-wide provider registry.
//!
//! [`OpenOptions`]: crate::document::OpenOptions

use crate::error::Result;
use crate::objgen::ObjGen;

/// Opaque decryption capability keyed by object identity
pub trait StringDecrypter {
    /// Decrypt a string value found inside the object `og`
    fn decrypt_string(&self, data: &[u8], og: ObjGen) -> Result<Vec<u8>>;

    /// Decrypt a stream payload belonging to the object `og`.
    ///
    /// Defaults to the string transformation, which is correct for ciphers
    /// that do not distinguish the two.
    fn decrypt_stream(&self, data: &[u8], og: ObjGen) -> Result<Vec<u8>> {
        self.decrypt_string(data, og)
    }
}

/// Pass-through decrypter for unencrypted files
pub struct IdentityDecrypter;

impl StringDecrypter for IdentityDecrypter {
    fn decrypt_string(&self, data: &[u8], _og: ObjGen) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// XOR "cipher" standing in for a real capability
    struct XorDecrypter(u8);

    impl StringDecrypter for XorDecrypter {
        fn decrypt_string(&self, data: &[u8], _og: ObjGen) -> Result<Vec<u8>> {
            Ok(data.iter().map(|b| b ^ self.0).collect())
        }
    }

    #[test]
    fn test_identity_decrypter() {
        let d = IdentityDecrypter;
        let out = d.decrypt_string(b"secret", ObjGen::new(4, 0)).unwrap();
        assert_eq!(out, b"secret");
    }

    #[test]
    fn test_stream_defaults_to_string_path() {
        let d = XorDecrypter(0xff);
        let s = d.decrypt_string(&[0x00, 0x0f], ObjGen::new(1, 0)).unwrap();
        let t = d.decrypt_stream(&[0x00, 0x0f], ObjGen::new(1, 0)).unwrap();
        assert_eq!(s, t);
        assert_eq!(s, vec![0xff, 0xf0]);
    }
}
