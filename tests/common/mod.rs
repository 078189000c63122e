#![allow(dead_code)]

pub mod builders;
pub mod scripted_provider;
pub mod strategies;

pub use builders::*;
pub use scripted_provider::*;
