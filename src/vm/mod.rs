//! The evaluator: statements and expressions over the token stream

pub mod interpreter;
