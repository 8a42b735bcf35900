pub mod schema;

pub use schema::{
    Config, MenuConfig, OllamaConfig, RelayConfig, StorageConfig, TelegramConfig,
};
