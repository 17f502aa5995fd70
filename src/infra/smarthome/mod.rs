mod client;

pub use client::SmartHomeClient;
