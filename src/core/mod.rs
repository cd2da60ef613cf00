//! Foundational types shared by the rest of the crate.

pub mod currency;
pub mod iban;
pub mod party;
