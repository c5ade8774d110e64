pub mod aggregator;
pub mod badge;
pub mod error;
pub mod export;
pub mod fetch;
pub mod network;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod view;

pub use aggregator::{Aggregator, TabEvent, TabStatus};
pub use badge::{Badge, BadgeBoard};
pub use error::{ExportError, FetchError, StoreError};
pub use runtime::RuntimeClient;
pub use storage::{MemoryStorage, SqliteStorage, Storage};

use colored::Colorize;

pub fn print_banner() {
    let banner = r#"
              _  __ _           _
   __ _  __ _| |/ _(_)_ __   __| | ___ _ __
  / _` |/ _` | | |_| | '_ \ / _` |/ _ \ '__|
 | (_| | (_| | |  _| | | | | (_| |  __/ |
  \__, |\__, |_|_| |_|_| |_|\__,_|\___|_|
  |___/    |_|
"#;
    println!("{}", banner.bright_magenta().bold());
    println!(
        "  {} {}\n",
        "GraphQL endpoint finder".bright_white(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
}
