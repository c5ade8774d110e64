use clap::{arg, command};
use url::Url;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/gqlfinder/";

fn tab_arg() -> clap::Arg {
    arg!(-t --"tab" <TAB_ID>)
        .required(false)
        .help("Tab identifier the endpoints are recorded under")
        .value_parser(clap::value_parser!(i64))
        .default_value("1")
}

fn format_arg() -> clap::Arg {
    arg!(-f --"format" <FORMAT>)
        .required(false)
        .help("Output format: text, json")
        .value_parser(["text", "json"])
        .default_value("text")
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("gqlfinder")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("gqlfinder")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log detections and storage activity")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"config-dir" <PATH>)
                .required(false)
                .global(true)
                .help("Directory holding the gqlfinder database")
                .default_value(DEFAULT_CONFIG_DIR),
        )
        .arg(
            arg!(--"db" <FILE>)
                .required(false)
                .global(true)
                .help("Database file to use instead of <config-dir>/gqlfinder.db")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the gqlfinder database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Overwrites any existing database at the configured location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("scan")
                .about(
                    "Load a page into a tab and record every GraphQL endpoint its markup, \
                scripts, globals and traffic reveal.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The page to scan")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of pages, one tab each")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(tab_arg())
                .arg(
                    arg!(-g --"globals" <PATH>)
                        .required(false)
                        .help("JSON object of page globals to probe (e.g. a window dump)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                )
                .arg(format_arg()),
        )
        .subcommand(
            command!("list")
                .about("Show the endpoints recorded for a tab, grouped by URL")
                .arg(tab_arg())
                .arg(format_arg()),
        )
        .subcommand(
            command!("clear")
                .about("Forget every endpoint recorded for a tab")
                .arg(tab_arg()),
        )
        .subcommand(
            command!("export")
                .about("Write a tab's endpoints to a JSON file")
                .arg(tab_arg())
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Destination file (default: graphql-endpoints-<millis>.json)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
