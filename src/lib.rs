#![cfg_attr(feature = "clippy", feature(plugin))]
#![cfg_attr(feature = "clippy", plugin(clippy(conf_file = "../clippy.toml")))]

#[macro_use]
extern crate bitflags;
extern crate byteorder;
extern crate bytes;
extern crate crypto;
extern crate des;
extern crate digest;
extern crate encoding;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate generic_array;
extern crate hostname;
extern crate itertools;
#[macro_use]
extern crate log;
extern crate md4;
#[macro_use]
extern crate nom;
extern crate num;
#[macro_use]
extern crate num_derive;
extern crate rand;
extern crate time;

#[cfg(feature = "serde")]
extern crate serde;
#[cfg(feature = "serde_derive")]
#[macro_use]
extern crate serde_derive;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;
#[cfg(test)]
#[macro_use]
extern crate matches;

pub mod errors;
pub mod credential;
pub mod crypt;
pub mod hash;
pub mod proto;
pub mod auth;
pub mod client;

pub use auth::{NtlmV1AuthenticateEncoder, NtlmV2AuthenticateEncoder};
pub use client::NtlmClient;
pub use credential::{Credential, Hash, HashKind, Password};
pub use errors::NtlmError;
pub use proto::{NegotiateFlags, ServerChallenge};
