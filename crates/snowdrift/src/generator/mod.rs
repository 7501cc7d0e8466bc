mod builder;
mod snowflake;

pub use builder::*;
pub use snowflake::*;
