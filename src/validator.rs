//! Pluggable validation of values before they are stored or returned.

use std::convert::TryInto;
use std::fmt::{self, Debug, Formatter};

use bytes::{BufMut, Bytes, BytesMut};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::common::Id;
use crate::{Error, Result};

const PUBLIC_KEY_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 64;

/// Decides whether a value may be stored at this node, or accepted as the
/// result of a value lookup.
pub trait StorableValidator: Send {
    fn is_valid_storable(&self, value: &[u8]) -> bool;
}

impl Debug for dyn StorableValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "StorableValidator")
    }
}

impl<F> StorableValidator for F
where
    F: Fn(&[u8]) -> bool + Send,
{
    fn is_valid_storable(&self, value: &[u8]) -> bool {
        self(value)
    }
}

/// Accepts every value.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl StorableValidator for AcceptAll {
    fn is_valid_storable(&self, _value: &[u8]) -> bool {
        true
    }
}

/// Accepts only well signed [SignedValue] envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedValueValidator;

impl StorableValidator for SignedValueValidator {
    fn is_valid_storable(&self, value: &[u8]) -> bool {
        SignedValue::from_bytes(value)
            .map(|signed| signed.verify())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An ed25519 signed payload, encoded as `public key ‖ signature ‖ payload`.
pub struct SignedValue {
    public_key: VerifyingKey,
    signature: Signature,
    payload: Bytes,
}

impl SignedValue {
    /// Sign a payload.
    pub fn sign(signer: &SigningKey, payload: &[u8]) -> Self {
        SignedValue {
            public_key: signer.verifying_key(),
            signature: signer.sign(payload),
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Parse an envelope without verifying its signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH {
            return Err(Error::InvalidSignedValue("too short"));
        }

        let (key, rest) = bytes.split_at(PUBLIC_KEY_LENGTH);
        let (signature, payload) = rest.split_at(SIGNATURE_LENGTH);

        let key: [u8; PUBLIC_KEY_LENGTH] = key
            .try_into()
            .map_err(|_| Error::InvalidSignedValue("invalid public key length"))?;
        let signature: [u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| Error::InvalidSignedValue("invalid signature length"))?;

        Ok(SignedValue {
            public_key: VerifyingKey::from_bytes(&key)
                .map_err(|_| Error::InvalidSignedValue("invalid public key"))?,
            signature: Signature::from_bytes(&signature),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    // === Getters ===

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The conventional key for this value: the [Id] of its public key.
    pub fn key(&self) -> Id {
        Id::from_public_key(self.public_key.as_bytes())
    }

    // === Public Methods ===

    pub fn verify(&self) -> bool {
        self.public_key
            .verify(&self.payload, &self.signature)
            .is_ok()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut bytes =
            BytesMut::with_capacity(PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH + self.payload.len());

        bytes.put_slice(self.public_key.as_bytes());
        bytes.put_slice(&self.signature.to_bytes());
        bytes.put_slice(&self.payload);

        bytes.freeze()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn signer() -> SigningKey {
        SigningKey::from_bytes(&[42; 32])
    }

    #[test]
    fn signed_value_is_valid() {
        let signed = SignedValue::sign(&signer(), b"hello");
        let bytes = signed.to_bytes();

        assert!(SignedValueValidator.is_valid_storable(&bytes));

        let parsed = SignedValue::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, signed);
        assert_eq!(&parsed.payload()[..], b"hello");
        assert_eq!(parsed.key(), Id::from_public_key(signer().verifying_key().as_bytes()));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let mut bytes = SignedValue::sign(&signer(), b"hello").to_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 1;

        assert!(!SignedValueValidator.is_valid_storable(&bytes));
    }

    #[test]
    fn short_input_is_invalid() {
        assert!(!SignedValueValidator.is_valid_storable(b"short"));
        assert!(SignedValue::from_bytes(b"short").is_err());
    }

    #[test]
    fn closures_are_validators() {
        let validator = |value: &[u8]| value.starts_with(b"ok");

        assert!(validator.is_valid_storable(b"ok value"));
        assert!(!validator.is_valid_storable(b"bad value"));
        assert!(AcceptAll.is_valid_storable(b"anything"));
    }
}
