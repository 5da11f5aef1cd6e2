//! ECHConfigList parsing and selection.
//!
//! ## Wire Format
//!
//! ```text
//! struct {
//!     ECHConfig configs<4..2^16-1>;
//! } ECHConfigList;
//!
//! struct {
//!     uint16 version;
//!     uint16 length;
//!     select (ECHConfig.version) {
//!         case 0xfe0d: ECHConfigContents contents;
//!     }
//! } ECHConfig;
//!
//! struct {
//!     HpkeKeyConfig key_config;     // config_id, kem_id, public_key, cipher_suites
//!     uint8 maximum_name_length;
//!     opaque public_name<1..255>;
//!     Extension extensions<0..2^16-1>;
//! } ECHConfigContents;
//! ```
//!
//! Configurations with an unknown version are skipped, as a client is
//! required to ignore them. The list handed to BoringSSL is re-encoded
//! from the selected configuration only.

use std::fmt;
use thiserror::Error;

/// Draft-13 / RFC 9849 ECHConfig version.
pub const ECH_VERSION: u16 = 0xfe0d;

/// DHKEM(X25519, HKDF-SHA256)
pub const KEM_X25519_HKDF_SHA256: u16 = 0x0020;
/// HKDF-SHA256
pub const KDF_HKDF_SHA256: u16 = 0x0001;
/// AES-128-GCM
pub const AEAD_AES_128_GCM: u16 = 0x0001;
/// AES-256-GCM
pub const AEAD_AES_256_GCM: u16 = 0x0002;
/// ChaCha20-Poly1305
pub const AEAD_CHACHA20_POLY1305: u16 = 0x0003;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EchParseError {
    #[error("truncated ECH config: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("ECH config list length {declared} does not match payload {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("invalid ECH config: {0}")]
    Invalid(String),
    #[error("ECH config list contains no supported configs")]
    NoSupportedConfigs,
}

/// HPKE symmetric cipher suite advertised by a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpkeSymmetricCipherSuite {
    pub kdf_id: u16,
    pub aead_id: u16,
}

/// A single parsed ECH configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct EchConfig {
    pub version: u16,
    pub config_id: u8,
    pub kem_id: u16,
    pub public_key: Vec<u8>,
    pub cipher_suites: Vec<HpkeSymmetricCipherSuite>,
    pub maximum_name_length: u8,
    pub public_name: String,
    pub extensions: Vec<u8>,
    /// The config as it appeared on the wire, version and length included.
    raw: Vec<u8>,
}

impl fmt::Debug for EchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchConfig")
            .field("version", &format_args!("{:#06x}", self.version))
            .field("config_id", &self.config_id)
            .field("kem_id", &format_args!("{:#06x}", self.kem_id))
            .field("public_name", &self.public_name)
            .field("cipher_suites", &self.cipher_suites)
            .finish_non_exhaustive()
    }
}

impl EchConfig {
    /// True if BoringSSL can encrypt to this config.
    pub fn has_compatible_suite(&self) -> bool {
        self.kem_id == KEM_X25519_HKDF_SHA256
            && self.cipher_suites.iter().any(|s| {
                s.kdf_id == KDF_HKDF_SHA256
                    && matches!(
                        s.aead_id,
                        AEAD_AES_128_GCM | AEAD_AES_256_GCM | AEAD_CHACHA20_POLY1305
                    )
            })
    }

    /// Wire bytes of this config, including its version and length header.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// A parsed ECHConfigList.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchConfigList {
    configs: Vec<EchConfig>,
}

impl EchConfigList {
    /// Parse a wire-format ECHConfigList.
    pub fn parse(data: &[u8]) -> Result<Self, EchParseError> {
        let mut reader = Reader::new(data);
        let declared = reader.read_u16()? as usize;
        if declared != reader.remaining() {
            return Err(EchParseError::LengthMismatch {
                declared,
                actual: reader.remaining(),
            });
        }

        let mut configs = Vec::new();
        while reader.remaining() > 0 {
            let start = reader.offset();
            let version = reader.read_u16()?;
            let length = reader.read_u16()? as usize;
            let body = reader.read_bytes(length)?;
            if version != ECH_VERSION {
                tracing::debug!(version = %format_args!("{version:#06x}"), "skipping unknown ECH config version");
                continue;
            }
            let raw = data[start..reader.offset()].to_vec();
            configs.push(parse_contents(version, body, raw)?);
        }

        if configs.is_empty() {
            return Err(EchParseError::NoSupportedConfigs);
        }
        Ok(Self { configs })
    }

    pub fn configs(&self) -> &[EchConfig] {
        &self.configs
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn extend(&mut self, other: EchConfigList) {
        self.configs.extend(other.configs);
    }

    /// The first config with a cipher suite BoringSSL supports.
    pub fn select(&self) -> Option<&EchConfig> {
        self.configs.iter().find(|c| c.has_compatible_suite())
    }

    /// Encode a single config as an ECHConfigList.
    pub fn encode_single(config: &EchConfig) -> Vec<u8> {
        let mut out = Vec::with_capacity(config.raw.len() + 2);
        out.extend_from_slice(&(config.raw.len() as u16).to_be_bytes());
        out.extend_from_slice(&config.raw);
        out
    }

    /// Encode every config back into one ECHConfigList.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len: usize = self.configs.iter().map(|c| c.raw.len()).sum();
        let mut out = Vec::with_capacity(len + 2);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        for config in &self.configs {
            out.extend_from_slice(&config.raw);
        }
        out
    }
}

fn parse_contents(version: u16, body: &[u8], raw: Vec<u8>) -> Result<EchConfig, EchParseError> {
    let mut reader = Reader::new(body);
    let config_id = reader.read_u8()?;
    let kem_id = reader.read_u16()?;
    let public_key = reader.read_u16_prefixed()?.to_vec();
    if public_key.is_empty() {
        return Err(EchParseError::Invalid("empty public key".into()));
    }

    let suites = reader.read_u16_prefixed()?;
    if suites.is_empty() || suites.len() % 4 != 0 {
        return Err(EchParseError::Invalid(format!(
            "cipher suites length {} is not a positive multiple of 4",
            suites.len()
        )));
    }
    let cipher_suites = suites
        .chunks_exact(4)
        .map(|c| HpkeSymmetricCipherSuite {
            kdf_id: u16::from_be_bytes([c[0], c[1]]),
            aead_id: u16::from_be_bytes([c[2], c[3]]),
        })
        .collect();

    let maximum_name_length = reader.read_u8()?;
    let name = reader.read_u8_prefixed()?;
    if name.is_empty() {
        return Err(EchParseError::Invalid("empty public name".into()));
    }
    let public_name = String::from_utf8(name.to_vec())
        .map_err(|e| EchParseError::Invalid(format!("public name is not UTF-8: {e}")))?;
    let extensions = reader.read_u16_prefixed()?.to_vec();

    if reader.remaining() != 0 {
        return Err(EchParseError::Invalid(format!(
            "{} trailing bytes in config contents",
            reader.remaining()
        )));
    }

    Ok(EchConfig {
        version,
        config_id,
        kem_id,
        public_key,
        cipher_suites,
        maximum_name_length,
        public_name,
        extensions,
        raw,
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], EchParseError> {
        if self.remaining() < n {
            return Err(EchParseError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, EchParseError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, EchParseError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u8_prefixed(&mut self) -> Result<&'a [u8], EchParseError> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    fn read_u16_prefixed(&mut self) -> Result<&'a [u8], EchParseError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build one wire ECHConfig with the given KEM and suites.
    pub(crate) fn config_bytes(
        version: u16,
        config_id: u8,
        kem_id: u16,
        suites: &[(u16, u16)],
        public_name: &str,
    ) -> Vec<u8> {
        let mut body = vec![config_id];
        body.extend_from_slice(&kem_id.to_be_bytes());
        body.extend_from_slice(&32u16.to_be_bytes());
        body.extend_from_slice(&[0x42; 32]);
        body.extend_from_slice(&((suites.len() * 4) as u16).to_be_bytes());
        for (kdf, aead) in suites {
            body.extend_from_slice(&kdf.to_be_bytes());
            body.extend_from_slice(&aead.to_be_bytes());
        }
        body.push(0);
        body.push(public_name.len() as u8);
        body.extend_from_slice(public_name.as_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());

        let mut out = version.to_be_bytes().to_vec();
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub(crate) fn list_bytes(configs: &[Vec<u8>]) -> Vec<u8> {
        let len: usize = configs.iter().map(Vec::len).sum();
        let mut out = (len as u16).to_be_bytes().to_vec();
        for c in configs {
            out.extend_from_slice(c);
        }
        out
    }

    #[test]
    fn test_parse_single_config() {
        let cfg = config_bytes(
            ECH_VERSION,
            7,
            KEM_X25519_HKDF_SHA256,
            &[(KDF_HKDF_SHA256, AEAD_AES_128_GCM)],
            "public.example.com",
        );
        let list = EchConfigList::parse(&list_bytes(&[cfg.clone()])).unwrap();
        assert_eq!(list.len(), 1);

        let parsed = &list.configs()[0];
        assert_eq!(parsed.config_id, 7);
        assert_eq!(parsed.public_name, "public.example.com");
        assert_eq!(parsed.public_key.len(), 32);
        assert_eq!(parsed.as_bytes(), cfg.as_slice());
        assert!(parsed.has_compatible_suite());
    }

    #[test]
    fn test_unknown_version_skipped() {
        let unknown = config_bytes(0xfe0a, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "old.example");
        let known = config_bytes(ECH_VERSION, 2, KEM_X25519_HKDF_SHA256, &[(1, 1)], "new.example");
        let list = EchConfigList::parse(&list_bytes(&[unknown, known])).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.configs()[0].public_name, "new.example");
    }

    #[test]
    fn test_only_unknown_versions_fails() {
        let unknown = config_bytes(0xfe0a, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "old.example");
        let err = EchConfigList::parse(&list_bytes(&[unknown])).unwrap_err();
        assert_eq!(err, EchParseError::NoSupportedConfigs);
    }

    #[test]
    fn test_length_mismatch() {
        let cfg = config_bytes(ECH_VERSION, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "a.example");
        let mut bytes = list_bytes(&[cfg]);
        bytes.push(0);
        assert!(matches!(
            EchConfigList::parse(&bytes),
            Err(EchParseError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(
            EchConfigList::parse(&[0x00]),
            Err(EchParseError::Truncated { .. })
        ));
        let cfg = config_bytes(ECH_VERSION, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "a.example");
        let mut bytes = list_bytes(&[cfg]);
        bytes.truncate(bytes.len() - 3);
        bytes[0..2].copy_from_slice(&((bytes.len() - 2) as u16).to_be_bytes());
        assert!(EchConfigList::parse(&bytes).is_err());
    }

    #[test]
    fn test_select_first_compatible() {
        let p384 = config_bytes(ECH_VERSION, 1, 0x0011, &[(1, 1)], "p384.example");
        let chacha = config_bytes(
            ECH_VERSION,
            2,
            KEM_X25519_HKDF_SHA256,
            &[(KDF_HKDF_SHA256, AEAD_CHACHA20_POLY1305)],
            "chacha.example",
        );
        let aes = config_bytes(
            ECH_VERSION,
            3,
            KEM_X25519_HKDF_SHA256,
            &[(KDF_HKDF_SHA256, AEAD_AES_128_GCM)],
            "aes.example",
        );
        let list = EchConfigList::parse(&list_bytes(&[p384, chacha.clone(), aes])).unwrap();
        let selected = list.select().unwrap();
        assert_eq!(selected.public_name, "chacha.example");

        let encoded = EchConfigList::encode_single(selected);
        assert_eq!(encoded, list_bytes(&[chacha]));
    }

    #[test]
    fn test_select_none_compatible() {
        let cfg = config_bytes(ECH_VERSION, 1, KEM_X25519_HKDF_SHA256, &[(0x0003, 1)], "x.example");
        let list = EchConfigList::parse(&list_bytes(&[cfg])).unwrap();
        assert!(list.select().is_none());
    }

    #[test]
    fn test_to_bytes_preserves_input() {
        let a = config_bytes(ECH_VERSION, 1, KEM_X25519_HKDF_SHA256, &[(1, 1)], "a.example");
        let b = config_bytes(ECH_VERSION, 2, KEM_X25519_HKDF_SHA256, &[(1, 2)], "b.example");
        let wire = list_bytes(&[a, b]);
        let list = EchConfigList::parse(&wire).unwrap();
        assert_eq!(list.to_bytes(), wire);
    }
}
