//! The SpiderScript front half and type-system core.
//!
//! The interesting machinery is the typed-memory substrate and the type
//! registry:
//!
//! * [`mem`] — named, page-granular backing [`Memory`](mem::Memory) with
//!   typed, alignment-preserving span views.
//! * [`alloc`] — a bump [`Arena`](alloc::Arena) and the three-tier
//!   [`Threaded`](alloc::Threaded) allocator with per-thread freelists.
//! * [`interp`] — the [`Interp`] registry of modules, symbols and types,
//!   with content-hash deduplication of structural types.
//! * [`types`] — the [`Statements`](types::Statements) description of
//!   composite bodies and the enum/bitfield/struct/union layout engines.
//! * [`value`] — typed decoding and encoding of field bytes.
//!
//! The [`syntax`] front end (lexer, literal parsers, AST parser) and the
//! `spiderscript` binary are clients of the core.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod alloc;
pub mod buffer;
pub mod error;
pub mod idx;
pub mod interp;
pub mod mangle;
pub mod mem;
pub mod module;
pub mod signature;
pub mod symbol;
pub mod syntax;
pub mod types;
pub mod value;

pub use idx::{BufferId, ErrorId, FuncSigId, GenSigId, SymbolId, TypeId};
pub use interp::Interp;
