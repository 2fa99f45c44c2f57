pub mod catalog;
pub mod features;
pub mod requirement;
pub mod transcript;
