//! Permissive HTML parsing into a `gk_dom::Document`, and serialization back
//! to UTF-8 markup.

mod parser;
mod serializer;
mod tokenizer;

pub use parser::parse_document;
pub use serializer::serialize;
pub use serializer::serialize_to_string;
