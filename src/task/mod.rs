//! Background tasks.

pub mod notification_publisher;
