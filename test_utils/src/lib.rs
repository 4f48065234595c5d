//! Fakes and block factories shared by the Keystone module tests

pub mod chain;
pub mod clock;
pub mod consensus;
pub mod network;
pub mod pools;
pub mod proofs;
pub mod reputation;
