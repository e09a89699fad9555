//! Threshold custody: the signing key exists only as distributed share
//! fragments. A settlement reassembles a quorum in memory, derives the
//! keypair, signs one transfer and drops everything.

pub mod keys;
pub mod shamir;
pub mod shares;

pub use keys::derive_keypair;
pub use shares::{ShareFetcher, ShareFragment, ShareSet, ShareSource};
