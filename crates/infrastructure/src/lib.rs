//! 消息代理与数据存储的具体实现

pub mod broker_factory;
pub mod in_memory_broker;
pub mod in_memory_datastore;
pub mod rabbitmq_broker;

pub use broker_factory::create_broker;
pub use in_memory_broker::InMemoryBroker;
pub use in_memory_datastore::InMemoryDatastore;
pub use rabbitmq_broker::RabbitMqBroker;
