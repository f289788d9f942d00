//! HTTP adapters for the external collaborators.

pub mod openai_generator;
pub mod x_client;

pub use openai_generator::OpenAiGenerator;
pub use x_client::XClient;
