#![allow(non_snake_case)]

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod tasks;
