//! Output retrieval for deployed modules.
//!
//! Strict accessors fail when a named output is absent; `_safe` accessors log
//! a warning and return an empty value instead.

mod accessor;
mod parse;

pub use accessor::{OutputAccessor, OutputView};
pub use parse::{
    is_empty_value, parse_json_payload, parse_output_map, render_list, render_scalar, OutputMap,
};

pub(crate) use parse::type_name;
