mod splitter;
mod statement;
pub mod tokenizer;

pub use splitter::{normalize, split_statements, strip_comments};
pub use statement::{
    kill_target, Assignment, ParseError, SelectItem, SessionStatement, SetValue, VariableTarget,
};
