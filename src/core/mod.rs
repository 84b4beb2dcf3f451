pub mod cmd;
pub mod color;
pub mod composer;
pub mod fields;
pub mod helpers;
pub mod materializer;
pub mod names;
pub mod quoting;
pub mod statement;
