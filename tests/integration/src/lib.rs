//! End-to-end tests that launch a real server binary.
//!
//! The binary comes from `CORRAL_TEST_SERVER` or `redis-server` on
//! `PATH`. Without one, every test prints a note and passes.

#[cfg(test)]
mod helpers;

#[cfg(test)]
mod cli;
#[cfg(test)]
mod cluster;
#[cfg(test)]
mod shard;
