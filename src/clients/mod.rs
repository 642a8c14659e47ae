pub mod broker;
pub mod circuit_breaker;
pub mod consumer;
pub mod delivery;
pub mod dispatch;
pub mod health;
pub mod publisher;
pub mod rbmq;
pub mod redis;
pub mod service;
pub mod template;
pub mod user;
