// Package http provides the outbound request substrate and the admin server.

pub mod client;
pub mod server;
pub mod useragent;

#[cfg(test)]
mod client_test;

pub use client::{HttpClient, RequestError, RequestSpec, Response, ResponseBody, ResponseKind};
pub use server::{AdminServer, Controller};
