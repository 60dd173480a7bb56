// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Common libray functions for Arbitray

pub mod config;
pub mod control;
pub mod fork;
pub mod logging;
pub mod msg;
pub mod pipe;
pub mod platform;
pub mod procs;
pub mod program;
pub mod trigger;

pub mod error;

pub use error::Error;
