//! ArenaJS - an embeddable JavaScript-subset interpreter in one buffer
//!
//! ArenaJS runs a small JavaScript dialect with every piece of interpreter
//! state - objects, properties, strings, scopes - living inside a single
//! fixed-size byte buffer the host hands over at creation. There is no
//! bytecode and no AST: the evaluator walks the token stream directly and
//! folds values as it parses.
//!
//! # Features
//! - NaN-boxed 64-bit values, arena entities addressed by 32-bit offsets
//! - Strict semantics: no coercion, `==` behaves like `===`
//! - Mark-and-compact reclamation of the arena between statements
//! - Host functions callable from scripts
//!
//! # Example
//! ```
//! use arenajs::Context;
//!
//! let mut ctx = Context::new(4096).unwrap();
//! let v = ctx.eval("let x = 2; x + 3");
//! assert_eq!(v.as_number(), 5.0);
//! ```

// Core modules
pub mod context;
pub mod value;

// Garbage collector
pub mod gc;

// Tokenizer
pub mod parser;

// Arena-resident structures
pub mod runtime;

// Evaluator
pub mod vm;

// Re-export main types
pub use context::{Context, CreateError, NativeFn};
pub use gc::GcStats;
pub use value::{Type, Value};
