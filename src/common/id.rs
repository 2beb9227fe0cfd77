//! Kademlia node Id or a lookup target
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1_smol::Sha1;
use std::{
    convert::TryFrom,
    fmt::{self, Debug, Display, Formatter},
    ops::{BitAnd, BitOr, BitXor, Shl},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits.
pub const ID_BITS: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
/// Kademlia node Id or a lookup target.
///
/// A 160 bit unsigned integer stored big-endian, so the derived ordering is
/// the numeric ordering and bit `0` is the most significant bit.
pub struct Id(#[serde(with = "serde_bytes")] [u8; ID_SIZE]);

impl Id {
    /// The zero Id, also the distance of any Id to itself.
    pub const ZERO: Id = Id([0; ID_SIZE]);
    /// The largest possible Id.
    pub const MAX: Id = Id([u8::MAX; ID_SIZE]);
    /// The Id with only the least significant bit set.
    pub const ONE: Id = {
        let mut bytes = [0; ID_SIZE];
        bytes[ID_SIZE - 1] = 1;
        Id(bytes)
    };

    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// Derive an Id from a public key, as the SHA-1 hash of its bytes.
    pub fn from_public_key(public_key: &[u8]) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(public_key);

        Id(hasher.digest().bytes())
    }

    // === Getters ===

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    // === Public Methods ===

    /// XOR distance between this Id and another one.
    ///
    /// Symmetric, and zero only for the same Id.
    pub fn distance(&self, other: &Id) -> Id {
        *self ^ *other
    }

    /// Read the bit at `index`, where index `0` is the most significant bit.
    ///
    /// Indices past [ID_BITS] read as `false`.
    pub fn bit(&self, index: usize) -> bool {
        if index >= ID_BITS {
            return false;
        }

        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// The Id with only the bit at `index` set, counting from the most significant bit.
    pub fn with_bit(index: usize) -> Id {
        if index >= ID_BITS {
            return Id::ZERO;
        }

        Id::ONE << (ID_BITS - 1 - index)
    }

    /// Mask keeping the `len` most significant bits.
    pub fn mask(len: usize) -> Id {
        if len >= ID_BITS {
            return Id::MAX;
        }

        Id::MAX << (ID_BITS - len)
    }

    /// Number of leading bits shared with `other`.
    pub fn shared_prefix_len(&self, other: &Id) -> usize {
        for (i, byte) in self.distance(other).0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }

        ID_BITS
    }

    /// Returns a random Id sharing the first `len` bits with `prefix`.
    pub fn random_with_prefix(prefix: &Id, len: usize) -> Id {
        let mask = Id::mask(len);

        (*prefix & mask) | (Id::random() & !mask)
    }
}

impl std::ops::Not for Id {
    type Output = Id;

    fn not(self) -> Id {
        let mut bytes = self.0;
        for byte in bytes.iter_mut() {
            *byte = !*byte;
        }

        Id(bytes)
    }
}

impl BitXor for Id {
    type Output = Id;

    fn bitxor(self, rhs: Id) -> Id {
        let mut bytes = self.0;
        for (a, b) in bytes.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }

        Id(bytes)
    }
}

impl BitAnd for Id {
    type Output = Id;

    fn bitand(self, rhs: Id) -> Id {
        let mut bytes = self.0;
        for (a, b) in bytes.iter_mut().zip(rhs.0.iter()) {
            *a &= b;
        }

        Id(bytes)
    }
}

impl BitOr for Id {
    type Output = Id;

    fn bitor(self, rhs: Id) -> Id {
        let mut bytes = self.0;
        for (a, b) in bytes.iter_mut().zip(rhs.0.iter()) {
            *a |= b;
        }

        Id(bytes)
    }
}

impl Shl<usize> for Id {
    type Output = Id;

    fn shl(self, bits: usize) -> Id {
        let mut bytes = [0; ID_SIZE];
        if bits >= ID_BITS {
            return Id(bytes);
        }

        let byte_shift = bits / 8;
        let bit_shift = bits % 8;

        for (i, byte) in bytes.iter_mut().enumerate().take(ID_SIZE - byte_shift) {
            let source = i + byte_shift;
            *byte = self.0[source] << bit_shift;

            if bit_shift > 0 && source + 1 < ID_SIZE {
                *byte |= self.0[source + 1] >> (8 - bit_shift);
            }
        }

        Id(bytes)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Id> {
        Id::from_bytes(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        if s.len() != ID_SIZE * 2 || !s.is_ascii() {
            return Err(Error::InvalidIdEncoding(s.to_string()));
        }

        let mut bytes = [0; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();

        assert_eq!(id.distance(&id), Id::ZERO);
    }

    #[test]
    fn distance_is_symmetric() {
        for _ in 0..100 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(a.distance(&b), b.distance(&a));
        }
    }

    #[test]
    fn distance_to_max() {
        assert_eq!(Id::ZERO.distance(&Id::MAX), Id::MAX);
    }

    #[test]
    fn ordering_is_numeric() {
        let small = Id::ONE;
        let large = Id::with_bit(0);

        assert!(small < large);
        assert!(large > small);
        assert!(Id::ZERO <= Id::ZERO);
    }

    #[test]
    fn read_bits() {
        let id = Id::from_str("8000000000000000000000000000000000000001").unwrap();

        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(!id.bit(158));
        assert!(id.bit(159));
        assert!(!id.bit(160));
    }

    #[test]
    fn shift_left_across_bytes() {
        assert_eq!(Id::ONE << 8, Id::from_str("0000000000000000000000000000000000000100").unwrap());
        assert_eq!(Id::ONE << 12, Id::from_str("0000000000000000000000000000000000001000").unwrap());
        assert_eq!(Id::ONE << 159, Id::with_bit(0));
        assert_eq!(Id::ONE << 160, Id::ZERO);
    }

    #[test]
    fn masks() {
        assert_eq!(Id::mask(0), Id::ZERO);
        assert_eq!(Id::mask(4), Id::from_str("f000000000000000000000000000000000000000").unwrap());
        assert_eq!(Id::mask(160), Id::MAX);
    }

    #[test]
    fn shared_prefix() {
        let a = Id::from_str("f000000000000000000000000000000000000000").unwrap();
        let b = Id::from_str("f800000000000000000000000000000000000000").unwrap();

        assert_eq!(a.shared_prefix_len(&b), 4);
        assert_eq!(a.shared_prefix_len(&a), ID_BITS);
    }

    #[test]
    fn random_with_prefix_keeps_prefix() {
        let prefix = Id::from_str("abc0000000000000000000000000000000000000").unwrap();

        for _ in 0..20 {
            let id = Id::random_with_prefix(&prefix, 12);
            assert!(id.shared_prefix_len(&prefix) >= 12);
        }
    }

    #[test]
    fn hex_string() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let id = Id::from_str(hex).unwrap();

        assert_eq!(id.to_string(), hex);
        assert!(Id::from_str("0123").is_err());
        assert!(Id::from_str("zz23456789abcdef0123456789abcdef01234567").is_err());
    }

    #[test]
    fn from_bytes_wrong_size() {
        assert!(matches!(
            Id::from_bytes([0u8; 19]),
            Err(Error::InvalidIdSize(19))
        ));
    }

    #[test]
    fn id_from_public_key() {
        let key = [7u8; 32];

        assert_eq!(Id::from_public_key(&key), Id::from_public_key(&key));
        assert_ne!(Id::from_public_key(&key), Id::from_public_key(&[8u8; 32]));
    }
}
