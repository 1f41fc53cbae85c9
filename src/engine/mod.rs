pub mod action;
pub mod binding;
pub mod context;
pub mod core;
pub mod data_source;
pub mod evaluator;
pub mod fetch;
pub mod registry;
pub mod runtime;
pub mod store;
