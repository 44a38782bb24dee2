//! # discord-chat-archive
//!
//! A CLI tool that incrementally archives Discord channels by driving
//! [DiscordChatExporter](https://github.com/Tyrrrz/DiscordChatExporter) once
//! per configured channel.
//!
//! ## What it does
//!
//! Channels are listed in an INI file as `[server_id.channel_id]` sections.
//! Settings inherit from `[DEFAULT]`, then from the optional `[server_id]`
//! section, then from the channel section itself:
//!
//! ```ini
//! [DEFAULT]
//! format = json
//! partition = 1000
//! token = main
//!
//! [123456789]
//! name = My Server
//!
//! [123456789.987654321]
//! name = general
//! partition = 100
//! ```
//!
//! Tokens live in a separate INI file, one section per name:
//!
//! ```ini
//! [main]
//! token = xxxxxxxx
//! bot = true
//! ```
//!
//! ## Incremental export
//!
//! After a channel exports successfully, the time the export *started* is
//! written back into that channel's section as `after`. The next run passes
//! it to the exporter as `--after`, so only newer messages are fetched. A
//! failed export leaves `after` untouched and the same window is retried next
//! time. Only that one line of the config file is rewritten; comments and
//! every other setting are preserved.
//!
//! ## Usage
//!
//! ```sh
//! # Export everything configured in ./config.ini using ./tokens.ini
//! discord-chat-archive
//!
//! # Four exports at a time, each limited to ten minutes
//! discord-chat-archive -j 4 --timeout 600 -o ~/archive
//! ```
//!
//! Defaults can be persisted in
//! `~/.config/discord-chat-archive/preferences.toml`.

pub mod error;
pub mod ini;
pub mod logging;
pub mod parallel;
pub mod planner;
pub mod runner;
#[cfg(feature = "sequential")]
pub mod sequential;
pub mod settings;
pub mod tokens;
pub mod utils;
pub mod watermark;
