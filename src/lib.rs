// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod cache;
mod guard;
mod otel;
mod reaper;

pub mod broker;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod errors;
pub mod headers;
pub mod pool;
pub mod publisher;
pub mod queue;
pub mod reader;
pub mod session;
