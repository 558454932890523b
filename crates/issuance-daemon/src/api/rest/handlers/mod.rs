//! API request handlers

mod events;
mod health;
mod pipeline;
mod projects;
mod treasury;
mod webhook;

pub use events::*;
pub use health::*;
pub use pipeline::*;
pub use projects::*;
pub use treasury::*;
pub use webhook::*;
