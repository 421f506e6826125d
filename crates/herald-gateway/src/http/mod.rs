pub mod cron;
pub mod feed;
pub mod health;
pub mod settings;
pub mod tasks;
pub mod templates;
