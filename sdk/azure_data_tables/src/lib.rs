#![doc = include_str!("../README.md")]

pub mod entity;
pub mod request;
pub mod table;
pub mod transaction;
