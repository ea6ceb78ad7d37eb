use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const OID_LEN: usize = 16;

fn parse_16(s: &str) -> Result<[u8; OID_LEN], TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    if bytes.len() != OID_LEN {
        return Err(TypeError::InvalidLength {
            expected: OID_LEN,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; OID_LEN];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Object identifier, unique within a store.
///
/// Two identifiers are reserved in every store: [`OID::ROOT`] is the implicit
/// root directory and [`OID::TRASH`] is the parent of deleted objects.
/// Everything else is generated from a time-ordered UUID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OID([u8; OID_LEN]);

impl OID {
    /// The implicit root of every store.
    pub const ROOT: OID = OID([0u8; OID_LEN]);

    /// The well-known parent used to represent deletion.
    pub const TRASH: OID = OID([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().into_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns `true` for [`OID::ROOT`].
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// Returns `true` for [`OID::TRASH`].
    pub fn is_trash(&self) -> bool {
        *self == Self::TRASH
    }

    /// Returns `true` for either reserved identifier.
    pub fn is_reserved(&self) -> bool {
        self.is_root() || self.is_trash()
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation of the random tail (8 characters).
    ///
    /// The leading bytes of a generated OID are a timestamp and are shared
    /// by OIDs created close together.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[OID_LEN - 4..])
    }

    /// Parse from a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_16(s).map(Self)
    }
}

impl fmt::Debug for OID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "OID(root)")
        } else if self.is_trash() {
            write!(f, "OID(trash)")
        } else {
            write!(f, "OID({})", self.short_hex())
        }
    }
}

impl fmt::Display for OID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Local integer handle for a store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SIndex(u32);

impl SIndex {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIndex({})", self.0)
    }
}

impl fmt::Display for SIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Store-qualified object identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SOID {
    pub sidx: SIndex,
    pub oid: OID,
}

impl SOID {
    pub const fn new(sidx: SIndex, oid: OID) -> Self {
        Self { sidx, oid }
    }

    /// The root object of the given store.
    pub const fn root(sidx: SIndex) -> Self {
        Self::new(sidx, OID::ROOT)
    }

    /// The trash object of the given store.
    pub const fn trash(sidx: SIndex) -> Self {
        Self::new(sidx, OID::TRASH)
    }
}

impl fmt::Debug for SOID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOID({}, {:?})", self.sidx, self.oid)
    }
}

impl fmt::Display for SOID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sidx, self.oid.short_hex())
    }
}

/// Identity of a replica. Keys the entries of a [`Version`](crate::Version).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId([u8; OID_LEN]);

impl DeviceId {
    /// Generate a fresh device identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().into_bytes())
    }

    pub const fn from_bytes(bytes: [u8; OID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_16(s).map(Self)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
