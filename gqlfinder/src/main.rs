use colored::Colorize;
use gqlfinder::commands::command_argument_builder;
use gqlfinder::handlers::{
    db_path_from_args, handle_clear, handle_export, handle_init, handle_list, handle_scan,
};
use gqlfinder_core::print_banner;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "gqlfinder=debug,gqlfinder_core=debug,gqlfinder_scanner=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(chosen_command.get_flag("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let db_path = db_path_from_args(&chosen_command);

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command, &db_path),
        Some(("scan", primary_command)) => handle_scan(primary_command, &db_path).await,
        Some(("list", primary_command)) => handle_list(primary_command, &db_path).await,
        Some(("clear", primary_command)) => handle_clear(primary_command, &db_path).await,
        Some(("export", primary_command)) => handle_export(primary_command, &db_path).await,
        // No subcommand provided, just show the banner
        None => Ok(()),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
