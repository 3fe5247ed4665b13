pub mod execution_logs;
pub mod health;
pub mod procedures;
