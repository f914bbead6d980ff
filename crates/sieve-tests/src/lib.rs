//! Cross-crate integration tests for Sieve.
//!
//! Scenarios run the real storage, oracles and wallet actors together;
//! shared builders live in [`helpers`].

pub mod helpers;
