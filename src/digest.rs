//! Self-describing integrity digests (`<algorithm>-<base64-hash>`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

/// A hash algorithm usable as the identity of a [`Blob`](crate::blob::Blob).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for Algorithm {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(crate::error::Error::UnknownAlgorithm(other.to_owned())),
        }
    }
}

/// A self-describing integrity digest: `<algorithm>-<base64-hash>`.
///
/// This is the sole identity of a [`Blob`](crate::blob::Blob). Equality is
/// byte-identical over the canonical string form.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Integrity(String);

impl Integrity {
    /// Computes the integrity of `bytes` using the given algorithm.
    pub fn compute(algorithm: Algorithm, bytes: &[u8]) -> Self {
        let mut builder = IntegrityBuilder::new(algorithm);
        builder.update(bytes);
        builder.finish()
    }

    /// Returns the canonical string form, e.g. `sha512-<base64>`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the algorithm component of this digest.
    pub fn algorithm(&self) -> Algorithm {
        // Constructed only via `IntegrityBuilder`/`FromStr`, which both validate the prefix.
        let prefix = self.0.split('-').next().expect("integrity always has a dash");
        prefix.parse().expect("integrity prefix already validated")
    }

    /// Returns `(algorithm, hash)`, the two halves either side of the dash,
    /// for callers that need to lay out a content-addressed store (see
    /// [`crate::blob::fs::FsBlobStore::path_for`]).
    pub(crate) fn parts(&self) -> (&str, &str) {
        let (algo, hash) = self.0.split_once('-').expect("integrity always has a dash");
        (algo, hash)
    }
}

impl Display for Integrity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Integrity {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hash) = s
            .split_once('-')
            .ok_or_else(|| crate::error::Error::MalformedIntegrity(s.to_owned()))?;
        let _: Algorithm = algo.parse()?;
        if hash.is_empty() {
            return Err(crate::error::Error::MalformedIntegrity(s.to_owned()));
        }
        Ok(Integrity(s.to_owned()))
    }
}

impl Serialize for Integrity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Integrity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An incremental hasher that produces an [`Integrity`] digest.
///
/// Mirrors the streaming-hash pattern used for blob hashing: callers can feed
/// it chunks of a byte stream as they arrive rather than buffering the whole
/// input up front.
enum Hasher {
    Sha256(Box<Sha256>),
    Sha512(Box<Sha512>),
}

pub struct IntegrityBuilder {
    algorithm: Algorithm,
    hasher: Hasher,
}

impl IntegrityBuilder {
    pub fn new(algorithm: Algorithm) -> Self {
        let hasher = match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Box::new(Sha256::new())),
            Algorithm::Sha512 => Hasher::Sha512(Box::new(Sha512::new())),
        };
        IntegrityBuilder { algorithm, hasher }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        match &mut self.hasher {
            Hasher::Sha256(h) => h.update(bytes),
            Hasher::Sha512(h) => h.update(bytes),
        }
        self
    }

    pub fn finish(self) -> Integrity {
        let encoded = match self.hasher {
            Hasher::Sha256(h) => base64::encode(h.finalize()),
            Hasher::Sha512(h) => base64::encode(h.finalize()),
        };
        Integrity(format!("{}-{}", self.algorithm.as_str(), encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let integrity = Integrity::compute(Algorithm::Sha512, b"module.x=1;");
        let parsed: Integrity = integrity.as_str().parse().unwrap();
        assert_eq!(integrity, parsed);
        assert_eq!(integrity.algorithm(), Algorithm::Sha512);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = "md5-AAAA".parse::<Integrity>().unwrap_err();
        assert!(matches!(err, crate::error::Error::UnknownAlgorithm(_)));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("garbage".parse::<Integrity>().is_err());
        assert!("sha256-".parse::<Integrity>().is_err());
    }

    #[test]
    fn same_bytes_same_digest() {
        let a = Integrity::compute(Algorithm::Sha256, b"hello");
        let b = Integrity::compute(Algorithm::Sha256, b"hello");
        assert_eq!(a, b);
    }
}
