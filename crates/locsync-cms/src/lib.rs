mod client;
mod wire;

pub use client::ManagementClient;
