pub mod conversation;
pub mod relay;
pub mod settings;
