#[macro_use]
extern crate rocket;

pub mod api;
pub mod background;
pub mod common;
pub mod config;
pub mod models;
pub mod process;
pub mod storage;
pub mod utils;
