// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transform contexts
//!
//! A [`Transform`] is one keyed algorithm instance. It owns the response list
//! that keeps its completions in submission order, carries its keys and tag
//! size, and may be pinned to one engine.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Weak};

use hwcrypto_hal::{Algorithm, Direction, EngineCapabilities, HwOperation, OperationKind};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::engine::{Engine, EngineId};
use crate::error::{DispatchError, DispatchResult};
use crate::registry::Shared;
use crate::reorder::Outcome;
use crate::request::{CompletionFn, CryptoRequest};

/// Longest HMAC key stored as-is; longer keys are digested first
pub const HMAC_MAX_DIRECT_KEY: usize = 64;
/// Upper bound for either half of an authenc key
pub const AUTHENC_MAX_KEY: usize = 64;
/// Salt bytes carried at the end of an RFC 4309 key
pub const RFC4309_NONCE_LEN: usize = 3;

/// Per-transform context flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContextFlags(u32);

impl ContextFlags {
    pub const NONE: ContextFlags = ContextFlags(0);
    /// Use the key provisioned in the engine instead of a software key
    pub const USE_HW_KEY: ContextFlags = ContextFlags(0x0001);
    /// Use a key loaded into the pipe
    pub const USE_PIPE_KEY: ContextFlags = ContextFlags(0x0002);
    pub const KEY_MASK: ContextFlags = ContextFlags(0x0003);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ContextFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: ContextFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn remove(self, other: ContextFlags) -> ContextFlags {
        ContextFlags(self.0 & !other.0)
    }
}

impl BitOr for ContextFlags {
    type Output = ContextFlags;

    fn bitor(self, rhs: ContextFlags) -> ContextFlags {
        ContextFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ContextFlags {
    fn bitor_assign(&mut self, rhs: ContextFlags) {
        self.0 |= rhs.0;
    }
}

/// One entry of a transform's pending-response list
pub(crate) struct ResponseRecord {
    pub ticket: u64,
    pub outcome: Option<Outcome>,
    pub on_complete: CompletionFn,
}

pub(crate) struct TransformSettings {
    pub engine: Option<Arc<Engine>>,
    pub flags: ContextFlags,
    pub key: Vec<u8>,
    pub auth_key: Vec<u8>,
    pub nonce: Vec<u8>,
    pub auth_size: usize,
}

pub(crate) struct TransformShared {
    pub id: u64,
    pub algorithm: Algorithm,
    pub registry: Weak<Shared>,
    /// Submission-ordered, so tickets ascend; guarded separately from the
    /// settings
    pub responses: Mutex<VecDeque<ResponseRecord>>,
    pub settings: Mutex<TransformSettings>,
}

impl TransformShared {
    pub fn new(
        id: u64,
        algorithm: Algorithm,
        registry: Weak<Shared>,
        engine: Option<Arc<Engine>>,
    ) -> Self {
        let auth_size = match algorithm.kind() {
            OperationKind::Aead => algorithm.digest_size().unwrap_or(16),
            _ => 0,
        };
        Self {
            id,
            algorithm,
            registry,
            responses: Mutex::new(VecDeque::new()),
            settings: Mutex::new(TransformSettings {
                engine,
                flags: ContextFlags::NONE,
                key: Vec::new(),
                auth_key: Vec::new(),
                nonce: Vec::new(),
                auth_size,
            }),
        }
    }

    #[cfg(test)]
    pub fn standalone(id: u64, algorithm: Algorithm) -> Self {
        Self::new(id, algorithm, Weak::new(), None)
    }

    fn registry(&self) -> DispatchResult<Arc<Shared>> {
        self.registry.upgrade().ok_or(DispatchError::ShutDown)
    }

    /// Answer a capability question from the pinned engine, or from the
    /// attached engines when unpinned.
    fn capable<F>(&self, engine: Option<&Arc<Engine>>, pred: F) -> bool
    where
        F: Fn(&EngineCapabilities) -> bool,
    {
        match engine {
            Some(engine) => pred(&engine.caps),
            None => self
                .registry
                .upgrade()
                .map_or(false, |shared| shared.any_engine(&pred)),
        }
    }

    /// Build the hardware operation for `request`
    ///
    /// `algorithm` overrides the transform's own algorithm for internal
    /// sub-requests. Returns the pinned engine alongside.
    pub fn prepare(
        &self,
        request: &CryptoRequest,
        algorithm: Algorithm,
    ) -> DispatchResult<(HwOperation, Option<Arc<Engine>>)> {
        request.check_lengths()?;
        let settings = self.settings.lock();
        let use_hw_key = settings.flags.contains(ContextFlags::USE_HW_KEY);
        let internal = algorithm != self.algorithm;

        let needs_key = !internal
            && !matches!(algorithm, Algorithm::Sha1 | Algorithm::Sha256)
            && !matches!(algorithm, Algorithm::HmacSha1 | Algorithm::HmacSha256);
        if needs_key && settings.key.is_empty() && !use_hw_key {
            return Err(DispatchError::InvalidKeyLength {
                algorithm: algorithm.name(),
                len: 0,
            });
        }

        let kind = algorithm.kind();
        if kind == OperationKind::Aead
            && request.direction == Direction::Decrypt
            && request.data.len() < settings.auth_size
        {
            return Err(DispatchError::InvalidRequest(format!(
                "ciphertext of {} bytes is shorter than the {} byte tag",
                request.data.len(),
                settings.auth_size
            )));
        }

        let iv = if algorithm == Algorithm::Rfc4309AesCcm {
            let mut iv = settings.nonce.clone();
            iv.extend_from_slice(&request.iv);
            iv
        } else {
            request.iv.clone()
        };

        let (key, auth_key) = if internal {
            (Vec::new(), Vec::new())
        } else {
            (settings.key.clone(), settings.auth_key.clone())
        };

        let operation = HwOperation {
            algorithm,
            direction: request.direction,
            key,
            auth_key,
            use_hw_key,
            iv,
            assoc: request.assoc.clone(),
            data: request.data.clone(),
            auth_size: if kind == OperationKind::Aead {
                settings.auth_size
            } else {
                0
            },
        };
        Ok((operation, settings.engine.clone()))
    }

    pub fn store_hmac_key(&self, key: Vec<u8>) {
        self.settings.lock().key = key;
    }
}

/// Handle to a transform context
///
/// Created by [`crate::Registry::create_transform`]. Requests go through
/// [`crate::Registry::submit`]; completions for one transform are delivered
/// in the order they were submitted.
pub struct Transform {
    pub(crate) inner: Arc<TransformShared>,
}

impl Transform {
    pub(crate) fn from_shared(inner: Arc<TransformShared>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.inner.algorithm
    }

    /// Engine this transform is pinned to, if any
    pub fn engine(&self) -> Option<EngineId> {
        self.inner.settings.lock().engine.as_ref().map(|e| e.id)
    }

    /// Submitted requests whose final status has not been delivered yet
    pub fn pending_responses(&self) -> usize {
        self.inner.responses.lock().len()
    }

    pub fn flags(&self) -> ContextFlags {
        self.inner.settings.lock().flags
    }

    pub fn authsize(&self) -> usize {
        self.inner.settings.lock().auth_size
    }

    /// Pin to the first engine on `device`
    pub fn set_device(&self, device: u32) -> DispatchResult<()> {
        self.pin(device, None)
    }

    /// Pin to the engine with the given device and hardware instance
    pub fn set_device_hw(&self, device: u32, hw_instance: u32) -> DispatchResult<()> {
        self.pin(device, Some(hw_instance))
    }

    fn pin(&self, device: u32, hw_instance: Option<u32>) -> DispatchResult<()> {
        let shared = self.inner.registry()?;
        let engine = shared
            .find_engine(device, hw_instance)
            .ok_or(DispatchError::NoDevice)?;
        debug!(
            "[REGISTRY] transform {} pinned to engine {} ({})",
            self.inner.id,
            engine.id,
            engine.name()
        );
        self.inner.settings.lock().engine = Some(engine);
        Ok(())
    }

    pub fn set_flag(&self, flags: ContextFlags) -> DispatchResult<()> {
        let mut settings = self.inner.settings.lock();
        if flags.contains(ContextFlags::USE_HW_KEY)
            && !self
                .inner
                .capable(settings.engine.as_ref(), |c| c.hw_key_support)
        {
            return Err(DispatchError::InvalidFlags(
                "engine has no hardware key support",
            ));
        }
        if (settings.flags | flags).contains(ContextFlags::KEY_MASK) {
            return Err(DispatchError::InvalidFlags(
                "hardware key and pipe key are mutually exclusive",
            ));
        }
        settings.flags |= flags;
        Ok(())
    }

    pub fn clear_flag(&self, flags: ContextFlags) {
        let mut settings = self.inner.settings.lock();
        settings.flags = settings.flags.remove(flags);
    }

    /// Install the key for a cipher, hash-MAC or CCM transform
    ///
    /// HMAC keys longer than the block size are digested on the engine
    /// first; that path blocks until the digest completes and must not be
    /// called from a completion continuation.
    pub fn set_key(&self, key: &[u8]) -> DispatchResult<()> {
        use Algorithm::*;
        let algorithm = self.inner.algorithm;
        let invalid = || DispatchError::InvalidKeyLength {
            algorithm: algorithm.name(),
            len: key.len(),
        };

        match algorithm {
            Sha1 | Sha256 => Err(DispatchError::InvalidRequest(format!(
                "{} takes no key",
                algorithm
            ))),
            HmacSha1 | HmacSha256 => {
                if key.len() <= HMAC_MAX_DIRECT_KEY {
                    self.inner.store_hmac_key(key.to_vec());
                    Ok(())
                } else {
                    self.inner.registry()?.hmac_setkey(&self.inner, key)
                }
            }
            AuthencHmacSha1AesCbc
            | AuthencHmacSha256AesCbc
            | AuthencHmacSha1DesCbc
            | AuthencHmacSha1TripleDesCbc => Err(DispatchError::InvalidRequest(format!(
                "{} keys are set with set_authenc_key",
                algorithm
            ))),
            Rfc4309AesCcm => {
                if key.len() < RFC4309_NONCE_LEN {
                    return Err(invalid());
                }
                let (aes, nonce) = key.split_at(key.len() - RFC4309_NONCE_LEN);
                let mut settings = self.inner.settings.lock();
                let allow_192 = self.inner.capable(settings.engine.as_ref(), |c| c.aes_key_192);
                if !aes_key_len_ok(aes.len(), allow_192) {
                    return Err(invalid());
                }
                settings.key = aes.to_vec();
                settings.nonce = nonce.to_vec();
                Ok(())
            }
            DesEcb | DesCbc | TripleDesEcb | TripleDesCbc => {
                let expected = if matches!(algorithm, DesEcb | DesCbc) { 8 } else { 24 };
                let mut settings = self.inner.settings.lock();
                if settings.flags.contains(ContextFlags::USE_HW_KEY) {
                    return Ok(());
                }
                if key.len() != expected {
                    return Err(invalid());
                }
                settings.key = key.to_vec();
                Ok(())
            }
            AesEcb | AesCbc | AesCtr | AesXts | AesCmac | AesCcm => {
                let mut settings = self.inner.settings.lock();
                if settings.flags.contains(ContextFlags::USE_HW_KEY)
                    && matches!(algorithm, AesEcb | AesCbc | AesCtr | AesXts)
                {
                    return Ok(());
                }
                let allow_192 = self.inner.capable(settings.engine.as_ref(), |c| c.aes_key_192);
                let ok = if algorithm == AesXts {
                    key.len() % 2 == 0 && matches!(key.len() / 2, 16 | 32)
                } else {
                    aes_key_len_ok(key.len(), allow_192)
                };
                if !ok {
                    return Err(invalid());
                }
                settings.key = key.to_vec();
                Ok(())
            }
        }
    }

    /// Install the authentication and encryption keys of an authenc transform
    pub fn set_authenc_key(&self, auth_key: &[u8], enc_key: &[u8]) -> DispatchResult<()> {
        use Algorithm::*;
        let algorithm = self.inner.algorithm;
        let invalid = |len| DispatchError::InvalidKeyLength {
            algorithm: algorithm.name(),
            len,
        };

        let mut settings = self.inner.settings.lock();
        let enc_ok = match algorithm {
            AuthencHmacSha1AesCbc | AuthencHmacSha256AesCbc => {
                let allow_192 = self.inner.capable(settings.engine.as_ref(), |c| c.aes_key_192);
                aes_key_len_ok(enc_key.len(), allow_192)
            }
            AuthencHmacSha1DesCbc => enc_key.len() == 8,
            AuthencHmacSha1TripleDesCbc => enc_key.len() == 24,
            _ => {
                return Err(DispatchError::InvalidRequest(format!(
                    "{} is not an authenc transform",
                    algorithm
                )))
            }
        };
        if !enc_ok || enc_key.len() > AUTHENC_MAX_KEY {
            return Err(invalid(enc_key.len()));
        }
        if auth_key.len() > AUTHENC_MAX_KEY {
            return Err(invalid(auth_key.len()));
        }
        settings.key = enc_key.to_vec();
        settings.auth_key = auth_key.to_vec();
        Ok(())
    }

    /// Set the authentication tag size of an AEAD transform
    pub fn set_authsize(&self, size: usize) -> DispatchResult<()> {
        use Algorithm::*;
        let algorithm = self.inner.algorithm;
        let ok = match algorithm {
            AesCcm => matches!(size, 4 | 6 | 8 | 10 | 12 | 14 | 16),
            Rfc4309AesCcm => matches!(size, 8 | 12 | 16),
            AuthencHmacSha1AesCbc
            | AuthencHmacSha256AesCbc
            | AuthencHmacSha1DesCbc
            | AuthencHmacSha1TripleDesCbc => {
                size > 0 && size <= algorithm.digest_size().unwrap_or(0)
            }
            _ => {
                return Err(DispatchError::InvalidRequest(format!(
                    "{} has no authentication tag",
                    algorithm
                )))
            }
        };
        if !ok {
            return Err(DispatchError::InvalidAuthSize {
                algorithm: algorithm.name(),
                size,
            });
        }
        self.inner.settings.lock().auth_size = size;
        Ok(())
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("id", &self.inner.id)
            .field("algorithm", &self.inner.algorithm)
            .field("engine", &self.engine())
            .finish()
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        let outstanding = self.inner.responses.lock().len();
        if outstanding > 0 {
            error!(
                "[REGISTRY] transform {} ({}) dropped with {} outstanding responses",
                self.inner.id, self.inner.algorithm, outstanding
            );
        }
    }
}

fn aes_key_len_ok(len: usize, allow_192: bool) -> bool {
    match len {
        16 | 32 => true,
        24 => allow_192,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(algorithm: Algorithm) -> Transform {
        Transform::from_shared(Arc::new(TransformShared::standalone(1, algorithm)))
    }

    #[test]
    fn test_context_flags() {
        let flags = ContextFlags::USE_HW_KEY | ContextFlags::USE_PIPE_KEY;
        assert!(flags.contains(ContextFlags::KEY_MASK));
        assert_eq!(flags.remove(ContextFlags::USE_HW_KEY), ContextFlags::USE_PIPE_KEY);
        assert!(ContextFlags::NONE.is_empty());
    }

    #[test]
    fn test_pipe_key_flag_round_trip() {
        let t = transform(Algorithm::AesCbc);
        t.set_flag(ContextFlags::USE_PIPE_KEY).unwrap();
        assert_eq!(t.flags(), ContextFlags::USE_PIPE_KEY);
        t.clear_flag(ContextFlags::USE_PIPE_KEY);
        assert!(t.flags().is_empty());
    }

    #[test]
    fn test_hw_key_needs_engine_support() {
        // no engine pinned and no registry to ask
        let t = transform(Algorithm::AesCbc);
        assert!(matches!(
            t.set_flag(ContextFlags::USE_HW_KEY),
            Err(DispatchError::InvalidFlags(_))
        ));
    }

    #[test]
    fn test_des_key_lengths() {
        let des = transform(Algorithm::DesCbc);
        assert!(des.set_key(&[0; 8]).is_ok());
        assert!(des.set_key(&[0; 16]).is_err());

        let tdes = transform(Algorithm::TripleDesEcb);
        assert!(tdes.set_key(&[0; 24]).is_ok());
        assert!(tdes.set_key(&[0; 8]).is_err());
    }

    #[test]
    fn test_aes_key_lengths_without_192_capability() {
        let t = transform(Algorithm::AesCbc);
        assert!(t.set_key(&[0; 16]).is_ok());
        assert!(t.set_key(&[0; 32]).is_ok());
        assert_eq!(
            t.set_key(&[0; 24]),
            Err(DispatchError::InvalidKeyLength {
                algorithm: "cbc(aes)",
                len: 24
            })
        );

        let xts = transform(Algorithm::AesXts);
        assert!(xts.set_key(&[0; 64]).is_ok());
        assert!(xts.set_key(&[0; 16]).is_err());
    }

    #[test]
    fn test_rfc4309_key_splits_nonce() {
        let t = transform(Algorithm::Rfc4309AesCcm);
        let mut key = vec![1u8; 16];
        key.extend_from_slice(&[7, 8, 9]);
        t.set_key(&key).unwrap();
        let settings = t.inner.settings.lock();
        assert_eq!(settings.key, vec![1u8; 16]);
        assert_eq!(settings.nonce, vec![7, 8, 9]);
    }

    #[test]
    fn test_authsize_rules() {
        let ccm = transform(Algorithm::AesCcm);
        assert_eq!(ccm.authsize(), 16);
        assert!(ccm.set_authsize(8).is_ok());
        assert!(ccm.set_authsize(7).is_err());

        let rfc = transform(Algorithm::Rfc4309AesCcm);
        assert!(rfc.set_authsize(12).is_ok());
        assert!(rfc.set_authsize(10).is_err());

        let authenc = transform(Algorithm::AuthencHmacSha1AesCbc);
        assert!(authenc.set_authsize(20).is_ok());
        assert!(authenc.set_authsize(21).is_err());

        assert!(matches!(
            transform(Algorithm::AesCbc).set_authsize(16),
            Err(DispatchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_authenc_keys() {
        let t = transform(Algorithm::AuthencHmacSha256AesCbc);
        assert!(t.set_authenc_key(&[1; 32], &[2; 16]).is_ok());
        assert!(t.set_authenc_key(&[1; 65], &[2; 16]).is_err());
        assert!(t.set_authenc_key(&[1; 32], &[2; 15]).is_err());
        assert!(t.set_key(&[0; 16]).is_err());
    }

    #[test]
    fn test_prepare_requires_key() {
        let t = transform(Algorithm::AesCbc);
        let request = CryptoRequest::new(Direction::Encrypt, vec![0; 16], |_| {});
        assert!(matches!(
            t.inner.prepare(&request, Algorithm::AesCbc),
            Err(DispatchError::InvalidKeyLength { len: 0, .. })
        ));

        t.set_key(&[3; 16]).unwrap();
        let (op, engine) = t.inner.prepare(&request, Algorithm::AesCbc).unwrap();
        assert_eq!(op.key, vec![3; 16]);
        assert_eq!(op.auth_size, 0);
        assert!(engine.is_none());
    }

    #[test]
    fn test_prepare_rfc4309_iv_prefix() {
        let t = transform(Algorithm::Rfc4309AesCcm);
        let mut key = vec![0u8; 16];
        key.extend_from_slice(&[0xa, 0xb, 0xc]);
        t.set_key(&key).unwrap();
        let request =
            CryptoRequest::new(Direction::Encrypt, vec![0; 4], |_| {}).with_iv(vec![1; 8]);
        let (op, _) = t.inner.prepare(&request, Algorithm::Rfc4309AesCcm).unwrap();
        assert_eq!(&op.iv[..3], &[0xa, 0xb, 0xc]);
        assert_eq!(op.iv.len(), 11);
    }

    #[test]
    fn test_prepare_short_aead_ciphertext() {
        let t = transform(Algorithm::AesCcm);
        t.set_key(&[0; 16]).unwrap();
        let request = CryptoRequest::new(Direction::Decrypt, vec![0; 8], |_| {});
        assert!(matches!(
            t.inner.prepare(&request, Algorithm::AesCcm),
            Err(DispatchError::InvalidRequest(_))
        ));
    }
}
