//! Hierarchical configuration: a line-based parser producing a tree of
//! [`ConfigNode`]s with nested sections and includable sub-configurations.

mod node;
mod parser;
mod value;

pub use self::node::ConfigNode;
pub use self::parser::ConfigParser;
pub use self::value::FromConfigValue;
