//! HTTP adapters

pub mod gateway;

pub use gateway::{HttpApiGateway, HttpApiGatewayBuilder};
