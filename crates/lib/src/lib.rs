//! Courier core library: email, Telegram and Signal behind one send-and-wait contract,
//! plus the config, gateway and init pieces shared with the CLI.

pub mod channels;
pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod envelope;
pub mod gateway;
pub mod init;
pub mod wait;
