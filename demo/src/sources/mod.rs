pub mod api;
pub mod postgres;
