pub mod audit;
pub mod config;
pub mod init;
pub mod run;
pub mod show;
pub mod status;
pub mod submit;
