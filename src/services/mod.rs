pub mod usage_api;
