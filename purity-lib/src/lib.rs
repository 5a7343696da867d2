//! Purity and immutability analyses for object-oriented programs, built on
//! [`propstore`].
//!
//! Programs are described by a small fact format listing, for every class,
//! its fields and what each method body does:
//!
//! ```text
//! class Point {
//!   field x final;
//!   field y;
//!   method <init> { write y; }
//!   method getX { read x; }
//! }
//! ```
//!
//! [`analysis::run_analyses`] computes method purity, field mutability and
//! class immutability over such a program. The analyses depend on each other
//! through the property store: purity asks for the mutability of the fields
//! a method reads, class immutability for the mutability of its fields.

pub mod analysis;
pub mod lexer;
pub mod parser;
pub mod program;


#[cfg(test)]
mod parser_tests;
