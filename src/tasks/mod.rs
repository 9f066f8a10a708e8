pub mod cleanup_loop;
pub mod notification_loop;
pub mod sender;
pub mod task_runner;
