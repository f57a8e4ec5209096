//! Query model: DNF plans, clause parameters, pattern trees and predicates.

pub mod ast;
pub mod parse;
pub mod predicate;

pub use ast::{
    BasicQuery, Field, IndexMode, Parameter, Pattern, PatternExpr, PatternKind, Plan, ResultTypes,
    SelectKind,
};
pub use parse::parse;
pub use predicate::Predicate;
