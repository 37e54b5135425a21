//! PAFFS core: log-structured flash filesystem engine (spec §1).
//!
//! This crate implements the flash management and metadata engine — the
//! area allocator and garbage collector, the B⁺-tree inode index, the
//! page-address cache, the area-summary cache, the superblock chain and
//! the journal — that a POSIX-style file/directory API is built on top
//! of. The user-facing open/read/write/mkdir/... surface, permission
//! enforcement, dirent layout policy, ECC, the hardware driver and its
//! concurrency are out of scope (spec §1); [`driver::Driver`] is the
//! seam a concrete implementation plugs into.
//!
//! `no_std` by default (enable the `std` feature for host-side testing
//! and tooling), following the teacher's `#![cfg_attr(not(test), no_std)]`
//! gate, generalised into an explicit feature so firmware builds opt in
//! deliberately rather than accidentally pulling in `std` from a dev
//! dependency.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod addr;
pub mod area;
pub mod btree;
pub mod config;
pub mod dataio;
pub mod device;
pub mod dirent;
pub mod driver;
pub mod error;
pub mod gc;
pub mod inode;
pub mod journal;
pub mod pac;
pub mod superblock;
pub mod summary;

pub use addr::{Addr, AreaPos};
pub use device::Device;
pub use error::Error;
