pub mod config;
pub mod consumer;
pub mod error;
pub mod models;
pub mod publisher;

pub use config::MqConfig;
pub use consumer::{Delivery, MessageHandler, consume_with_retry, handle_delivery};
pub use error::MqError;
pub use models::{BrokerMessage, BroccoliError, MqQueue, init_mq};
pub use publisher::MqPublisher;

pub type Mq = MqQueue;
