//! PEM encoding of asymmetric key material

use crate::key_types::KeyMaterial;

/// Which half of a key pair a DER blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHalf {
    /// SubjectPublicKeyInfo DER
    Public,
    /// PKCS#8 PrivateKeyInfo DER
    Private,
}

impl KeyHalf {
    fn pem_tag(&self) -> &'static str {
        match self {
            KeyHalf::Public => "PUBLIC KEY",
            KeyHalf::Private => "PRIVATE KEY",
        }
    }
}

/// Wrap DER key material in a PEM envelope
pub fn encode_pem(der: &KeyMaterial, half: KeyHalf) -> KeyMaterial {
    let block = pem::Pem::new(half.pem_tag(), der.as_bytes().to_vec());
    let encoded = pem::encode_config(&block, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF));
    KeyMaterial::new(encoded.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_public_key() {
        let der = KeyMaterial::new(vec![0x30, 0x82, 0x01, 0x22]);
        let encoded = encode_pem(&der, KeyHalf::Public);
        let text = std::str::from_utf8(encoded.as_bytes()).unwrap();

        assert!(text.starts_with("-----BEGIN PUBLIC KEY-----\n"));
        assert!(text.trim_end().ends_with("-----END PUBLIC KEY-----"));

        let parsed = pem::parse(text).unwrap();
        assert_eq!(parsed.tag(), "PUBLIC KEY");
        assert_eq!(parsed.contents(), der.as_bytes());
    }

    #[test]
    fn test_encode_private_key_tag() {
        let encoded = encode_pem(&KeyMaterial::new(vec![1, 2, 3]), KeyHalf::Private);
        let parsed = pem::parse(encoded.as_bytes()).unwrap();
        assert_eq!(parsed.tag(), "PRIVATE KEY");
    }
}
