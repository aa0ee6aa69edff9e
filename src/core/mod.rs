// Core modules: keys, values, queries, cursors, pagination planning, and error modeling.
pub mod cursor;
pub mod error;
pub mod key;
pub mod mutation;
pub mod plan;
pub mod query;
pub mod structured;
pub mod value;
