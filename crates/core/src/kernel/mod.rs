//! Actions are the fundamental unit of work in a tablelog table. Each action
//! performs a single atomic operation on the state of the table. Actions are
//! stored in the `_delta_log` directory of a table in JSON format. The log is
//! a time series of actions that represent all the changes made to a table.

pub mod actions;

pub use actions::*;
