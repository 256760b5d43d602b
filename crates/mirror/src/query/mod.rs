//! Query API over the mirrored store
//!
//! Read-side helpers that walk the reply links set by thread
//! reconstruction.

mod threads;

pub use threads::{references_of, replies_to, reply_chain};
