// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Broad operation family; decides which statistics bucket a request lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Cipher,
    Hash,
    Aead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Algorithms a crypto engine can be asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    AesEcb,
    AesCbc,
    AesCtr,
    AesXts,
    DesEcb,
    DesCbc,
    TripleDesEcb,
    TripleDesCbc,
    Sha1,
    Sha256,
    HmacSha1,
    HmacSha256,
    AesCmac,
    AesCcm,
    Rfc4309AesCcm,
    AuthencHmacSha1AesCbc,
    AuthencHmacSha256AesCbc,
    AuthencHmacSha1DesCbc,
    AuthencHmacSha1TripleDesCbc,
}

impl Algorithm {
    pub fn kind(self) -> OperationKind {
        use Algorithm::*;
        match self {
            AesEcb | AesCbc | AesCtr | AesXts | DesEcb | DesCbc | TripleDesEcb | TripleDesCbc => {
                OperationKind::Cipher
            }
            Sha1 | Sha256 | HmacSha1 | HmacSha256 | AesCmac => OperationKind::Hash,
            AesCcm | Rfc4309AesCcm | AuthencHmacSha1AesCbc | AuthencHmacSha256AesCbc
            | AuthencHmacSha1DesCbc | AuthencHmacSha1TripleDesCbc => OperationKind::Aead,
        }
    }

    /// Kernel-style algorithm name, e.g. `cbc(aes)`.
    pub fn name(self) -> &'static str {
        use Algorithm::*;
        match self {
            AesEcb => "ecb(aes)",
            AesCbc => "cbc(aes)",
            AesCtr => "ctr(aes)",
            AesXts => "xts(aes)",
            DesEcb => "ecb(des)",
            DesCbc => "cbc(des)",
            TripleDesEcb => "ecb(des3_ede)",
            TripleDesCbc => "cbc(des3_ede)",
            Sha1 => "sha1",
            Sha256 => "sha256",
            HmacSha1 => "hmac(sha1)",
            HmacSha256 => "hmac(sha256)",
            AesCmac => "cmac(aes)",
            AesCcm => "ccm(aes)",
            Rfc4309AesCcm => "rfc4309(ccm(aes))",
            AuthencHmacSha1AesCbc => "authenc(hmac(sha1),cbc(aes))",
            AuthencHmacSha256AesCbc => "authenc(hmac(sha256),cbc(aes))",
            AuthencHmacSha1DesCbc => "authenc(hmac(sha1),cbc(des))",
            AuthencHmacSha1TripleDesCbc => "authenc(hmac(sha1),cbc(des3_ede))",
        }
    }

    /// Digest or tag size in bytes for hashing and authenticating algorithms.
    pub fn digest_size(self) -> Option<usize> {
        use Algorithm::*;
        match self {
            Sha1 | HmacSha1 | AuthencHmacSha1AesCbc | AuthencHmacSha1DesCbc
            | AuthencHmacSha1TripleDesCbc => Some(20),
            Sha256 | HmacSha256 | AuthencHmacSha256AesCbc => Some(32),
            AesCmac | AesCcm | Rfc4309AesCcm => Some(16),
            _ => None,
        }
    }

    /// Input block size in bytes
    pub fn block_size(self) -> usize {
        use Algorithm::*;
        match self {
            Sha1 | Sha256 | HmacSha1 | HmacSha256 => 64,
            DesEcb | DesCbc | TripleDesEcb | TripleDesCbc | AuthencHmacSha1DesCbc
            | AuthencHmacSha1TripleDesCbc => 8,
            AesCtr => 1,
            _ => 16,
        }
    }

    /// The plain hash underlying an HMAC algorithm.
    pub fn underlying_hash(self) -> Option<Algorithm> {
        match self {
            Algorithm::HmacSha1 => Some(Algorithm::Sha1),
            Algorithm::HmacSha256 => Some(Algorithm::Sha256),
            _ => None,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Algorithm::AesXts.kind(), OperationKind::Cipher);
        assert_eq!(Algorithm::AesCmac.kind(), OperationKind::Hash);
        assert_eq!(Algorithm::Rfc4309AesCcm.kind(), OperationKind::Aead);
    }

    #[test]
    fn test_hmac_hash() {
        assert_eq!(Algorithm::HmacSha256.underlying_hash(), Some(Algorithm::Sha256));
        assert_eq!(Algorithm::Sha256.underlying_hash(), None);
        assert_eq!(Algorithm::HmacSha1.block_size(), 64);
    }
}
