//! Test utilities for buildchain-lib.
//!
//! Item types shared by the unit tests, modeled on the
//! count/doubled/report scenario used throughout the crate's tests.

use crate::{empty_build_item, multi_build_item, simple_build_item};

#[derive(Debug, Clone, PartialEq)]
pub struct Count(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Doubled(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Report(pub String);

#[derive(Debug, Clone, PartialEq)]
pub struct Summary(pub String);

#[derive(Debug, Default)]
pub struct Finished;

simple_build_item!(Count, Doubled, Summary);
multi_build_item!(Report);
empty_build_item!(Finished);
