//! Joint evaluation of arithmetic expressions over private inputs, using
//! additive N-out-of-N secret sharing with Beaver-triple multiplication.
//! Parties exchange messages through a bulletin board and obtain correlated
//! randomness from a trusted parameter generator. The protocol is secure
//! against a semi-honest adversary only; messages are not authenticated.

pub mod expr;
pub mod fields;
pub mod party;
pub mod sharing;
pub mod tpg;
pub mod transport;

/// Prime field usable as the protocol's message space.
///
/// Values cross the wire as decimal ASCII of the canonical representative
/// in `[0, p)`.
pub trait MpcField: ff::PrimeField {
    /// Canonical representative in `[0, p)` as an unsigned integer.
    fn canonical(&self) -> u128;

    /// Encode as decimal ASCII of the canonical representative.
    fn to_decimal(&self) -> String {
        self.canonical().to_string()
    }

    /// Parse a decimal ASCII encoding.
    fn from_decimal(s: &str) -> Option<Self> {
        Self::from_str_vartime(s)
    }
}
