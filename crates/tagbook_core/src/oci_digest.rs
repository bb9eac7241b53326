use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

// https://github.com/opencontainers/image-spec/blob/main/descriptor.md#digests
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: RegisteredImageSpecAlgorithm,
    encoded: String,
}

impl TryFrom<&str> for OciDigest {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        let i = match s.find(':') {
            Some(i) => i,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let algo: &str = match s.get(..i) {
            Some(a) => a,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let encoded: &str = match s.get(i + 1..) {
            Some(e) if !e.is_empty() => e,
            Some(_) => return Err(Error::InvalidDigest(s.to_string())),
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let algorithm = RegisteredImageSpecAlgorithm::try_from(algo)
            .map_err(|_| Error::InvalidDigest(s.to_string()))?;

        if !algorithm.encoded_pattern().is_match(encoded) {
            return Err(Error::InvalidDigest(s.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl std::str::FromStr for OciDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OciDigest::try_from(s)
    }
}

/// sha256 digest of `bs`; fixtures address their blobs with it.
#[cfg(test)]
impl From<&[u8]> for OciDigest {
    fn from(bs: &[u8]) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, bs);
        let s = hasher.finalize();

        Self {
            algorithm: RegisteredImageSpecAlgorithm::Sha256,
            encoded: format!("{:x}", s),
        }
    }
}

impl From<OciDigest> for String {
    fn from(d: OciDigest) -> String {
        d.to_string()
    }
}

impl From<&OciDigest> for String {
    fn from(d: &OciDigest) -> String {
        d.to_string()
    }
}

impl std::fmt::Display for OciDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", String::from(&self.algorithm), self.encoded)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum RegisteredImageSpecAlgorithm {
    Sha256,
    Sha512,
}

impl RegisteredImageSpecAlgorithm {
    fn encoded_pattern(&self) -> &'static Regex {
        static SHA256: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").unwrap());
        static SHA512: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{128}$").unwrap());
        match self {
            Self::Sha256 => &SHA256,
            Self::Sha512 => &SHA512,
        }
    }
}

impl TryFrom<&str> for RegisteredImageSpecAlgorithm {
    type Error = Error;

    fn try_from(a: &str) -> Result<Self> {
        match a {
            "sha512" => Ok(RegisteredImageSpecAlgorithm::Sha512),
            "sha256" => Ok(RegisteredImageSpecAlgorithm::Sha256),
            s => Err(Error::UnsupportedDigestAlgorithm(String::from(s))),
        }
    }
}

impl From<&RegisteredImageSpecAlgorithm> for String {
    fn from(a: &RegisteredImageSpecAlgorithm) -> String {
        match a {
            RegisteredImageSpecAlgorithm::Sha512 => String::from("sha512"),
            RegisteredImageSpecAlgorithm::Sha256 => String::from("sha256"),
        }
    }
}
