//! Command grammar: raw message text in, tagged command values out.

mod parser;

pub use parser::{parse, reply_source_text, Command, ParserLimits};
